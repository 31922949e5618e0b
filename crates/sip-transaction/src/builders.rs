// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Messages the transaction layer derives from other messages: response
//! skeletons, the ACK for a non-2xx final response and CANCEL.

use bytes::Bytes;
use sip_core::{
    HeaderAccess, Headers, Method, Request, RequestLine, Response, StatusLine,
};
use smol_str::SmolStr;

use crate::branch_from_via;

fn copy_all(from: &Headers, to: &mut Headers, name: &str) {
    for value in from.get_all(name) {
        to.push(SmolStr::new(name), value.clone());
    }
}

fn top_via_only(request: &Request, headers: &mut Headers) {
    if let Some(via) = request.headers.get_list("Via").into_iter().next() {
        headers.push("Via", via);
    }
}

/// Builds a response skeleton for `request` (RFC 3261 §8.2.6.2).
///
/// Via, From, To, Call-ID and CSeq are copied verbatim, and a 100 also
/// echoes Timestamp (§8.2.6.1). No To tag is added here; dialog-aware
/// callers use [`ensure_to_tag`].
pub fn build_response(request: &Request, code: u16, reason: Option<&str>) -> Response {
    let mut headers = Headers::new();
    copy_all(&request.headers, &mut headers, "Via");
    copy_all(&request.headers, &mut headers, "From");
    copy_all(&request.headers, &mut headers, "To");
    copy_all(&request.headers, &mut headers, "Call-ID");
    copy_all(&request.headers, &mut headers, "CSeq");
    if code == 100 {
        copy_all(&request.headers, &mut headers, "Timestamp");
    }
    let start = match reason {
        Some(reason) => StatusLine::new(code, reason),
        None => StatusLine::from_code(code),
    };
    Response::new(start, headers, Bytes::new())
}

/// The `100 Trying` an INVITE server transaction sends on creation.
pub fn build_trying(invite: &Request) -> Response {
    build_response(invite, 100, None)
}

/// Adds `tag` to the To header unless the To header already carries one.
pub fn ensure_to_tag(response: &mut Response, tag: &str) {
    let Some(to) = response.to_addr() else {
        return;
    };
    if to.tag().is_some() {
        return;
    }
    let tagged = to.with_tag(tag);
    response.headers.set("To", tagged.to_string());
}

/// ACK for a non-2xx final response (RFC 3261 §17.1.1.3).
///
/// Request-URI, Call-ID, From and the CSeq number come from the INVITE,
/// To comes from the response (with its tag), the single Via is the
/// INVITE's top Via so the ACK matches the server transaction, and the
/// INVITE's Route set is repeated.
pub fn build_ack_for_non_2xx(invite: &Request, response: &Response) -> Request {
    let mut headers = Headers::new();
    top_via_only(invite, &mut headers);
    headers.push("Max-Forwards", "70");
    copy_all(&invite.headers, &mut headers, "Route");
    copy_all(&invite.headers, &mut headers, "From");
    match response.header("To") {
        Some(to) => headers.push("To", to),
        None => copy_all(&invite.headers, &mut headers, "To"),
    }
    copy_all(&invite.headers, &mut headers, "Call-ID");
    let seq = invite.cseq().map(|cseq| cseq.seq).unwrap_or_default();
    headers.push("CSeq", format!("{} ACK", seq));
    Request::new(
        RequestLine::new(Method::Ack, invite.uri().clone()),
        headers,
        Bytes::new(),
    )
}

/// CANCEL for a pending INVITE (RFC 3261 §9.1).
///
/// The CANCEL shares the INVITE's top Via (and therefore its branch), its
/// Request-URI, Call-ID, From, To and Route set, and the CSeq number with
/// method CANCEL.
pub fn build_cancel(invite: &Request, extra_headers: &[(SmolStr, SmolStr)]) -> Request {
    let mut headers = Headers::new();
    top_via_only(invite, &mut headers);
    headers.push("Max-Forwards", "70");
    copy_all(&invite.headers, &mut headers, "Route");
    copy_all(&invite.headers, &mut headers, "From");
    copy_all(&invite.headers, &mut headers, "To");
    copy_all(&invite.headers, &mut headers, "Call-ID");
    let seq = invite.cseq().map(|cseq| cseq.seq).unwrap_or_default();
    headers.push("CSeq", format!("{} CANCEL", seq));
    for (name, value) in extra_headers {
        headers.push(name.clone(), value.clone());
    }
    Request::new(
        RequestLine::new(Method::Cancel, invite.uri().clone()),
        headers,
        Bytes::new(),
    )
}

/// Returns the branch of every Via in the request, topmost first.
pub fn via_branches(request: &Request) -> Vec<SmolStr> {
    request
        .headers
        .get_list("Via")
        .iter()
        .filter_map(|via| branch_from_via(via).map(SmolStr::new))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_core::{CSeq, SipUri};

    fn invite() -> Request {
        let mut headers = Headers::new();
        headers.push("Via", "SIP/2.0/UDP ua.example.com;branch=z9hG4bKua");
        headers.push("Via", "SIP/2.0/UDP edge.example.com;branch=z9hG4bKedge");
        headers.push("Route", "<sip:edge.example.com;lr>");
        headers.push("From", "<sip:alice@example.com>;tag=from1");
        headers.push("To", "<sip:bob@example.com>");
        headers.push("Call-ID", "call-1");
        headers.push("CSeq", "7 INVITE");
        headers.push("Timestamp", "54");
        Request::new(
            RequestLine::new(Method::Invite, SipUri::parse("sip:bob@example.com").unwrap()),
            headers,
            Bytes::new(),
        )
    }

    #[test]
    fn trying_echoes_timestamp_without_tag() {
        let trying = build_trying(&invite());
        assert_eq!(trying.code(), 100);
        assert_eq!(trying.header("Timestamp"), Some("54"));
        assert_eq!(trying.headers.get_all("Via").count(), 2);
        assert!(trying.to_tag().is_none());
    }

    #[test]
    fn ensure_to_tag_keeps_existing_tag() {
        let mut response = build_response(&invite(), 486, None);
        ensure_to_tag(&mut response, "t1");
        ensure_to_tag(&mut response, "t2");
        assert_eq!(response.to_tag().as_deref(), Some("t1"));
        assert_eq!(response.reason(), "Busy Here");
    }

    #[test]
    fn non_2xx_ack_reuses_invite_branch_and_response_to() {
        let invite = invite();
        let mut response = build_response(&invite, 486, None);
        ensure_to_tag(&mut response, "callee");

        let ack = build_ack_for_non_2xx(&invite, &response);
        assert_eq!(ack.method(), &Method::Ack);
        assert_eq!(via_branches(&ack), vec![SmolStr::new("z9hG4bKua")]);
        assert_eq!(ack.to_tag().as_deref(), Some("callee"));
        assert_eq!(ack.cseq(), Some(CSeq::new(7, Method::Ack)));
        assert_eq!(ack.header("Route"), Some("<sip:edge.example.com;lr>"));
    }

    #[test]
    fn cancel_matches_invite_transaction() {
        let cancel = build_cancel(
            &invite(),
            &[(SmolStr::new("Reason"), SmolStr::new("SIP;cause=480"))],
        );
        assert_eq!(cancel.branch().as_deref(), Some("z9hG4bKua"));
        assert_eq!(cancel.cseq(), Some(CSeq::new(7, Method::Cancel)));
        assert!(cancel.to_tag().is_none());
        assert_eq!(cancel.header("Reason"), Some("SIP;cause=480"));
    }
}
