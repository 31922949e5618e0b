// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3261 dialog state with session and subscription usages.
//!
//! [`Dialog`] holds the state every usage shares: the id, both CSeq
//! spaces, the local and remote identities, the remote target and the
//! route set. [`SessionDialog`] adds offer/answer tracking and 2xx/ACK
//! reliability for INVITE sessions; [`SubscriptionDialog`] adds the
//! RFC 6665 subscriber/notifier lifecycle.
//!
//! Like the transaction state machines, the usages never read a clock or
//! arm a timer themselves. They return actions naming a timer and a
//! duration, and their owner feeds expiries back in.
//!
//! # Example
//! ```
//! use sip_dialog::{Dialog, OutgoingRequestOptions};
//! use sip_core::{HeaderAccess, Headers, Method, Request, RequestLine, Response, SipUri, StatusLine};
//! use bytes::Bytes;
//!
//! let mut headers = Headers::new();
//! headers.push("From", "<sip:alice@example.com>;tag=a1");
//! headers.push("To", "<sip:bob@example.com>");
//! headers.push("Call-ID", "c1");
//! headers.push("CSeq", "1 INVITE");
//! let invite = Request::new(
//!     RequestLine::new(Method::Invite, SipUri::parse("sip:bob@example.com").unwrap()),
//!     headers.clone(),
//!     Bytes::new(),
//! );
//! headers.set("To", "<sip:bob@example.com>;tag=b1");
//! headers.push("Contact", "<sip:bob@192.0.2.4>");
//! let ok = Response::new(StatusLine::from_code(200), headers, Bytes::new());
//!
//! let mut dialog = Dialog::new_uac(&invite, &ok).unwrap();
//! let bye = dialog.create_outgoing_request(Method::Bye, OutgoingRequestOptions::default());
//! assert_eq!(bye.cseq().unwrap().seq, 2);
//! assert_eq!(bye.uri().host, "192.0.2.4");
//! ```

pub mod session;
pub mod subscription;

use std::fmt;

use bytes::Bytes;
use sip_core::{
    Body, HeaderAccess, Headers, Method, NameAddr, Request, RequestLine, Response, SipUri,
};
use smol_str::SmolStr;
use tracing::debug;

pub use session::{OfferSide, SessionAction, SessionDialog, SessionTimer, SignalingState};
pub use subscription::{
    SubscriptionAction, SubscriptionDialog, SubscriptionDialogState, SubscriptionTimer,
};

/// Dialog identifier: Call-ID plus local and remote tags (RFC 3261 §12).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: SmolStr,
    pub local_tag: SmolStr,
    pub remote_tag: SmolStr,
}

impl DialogId {
    pub fn new(
        call_id: impl Into<SmolStr>,
        local_tag: impl Into<SmolStr>,
        remote_tag: impl Into<SmolStr>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// The dialog an inbound in-dialog request addresses: To tag is ours,
    /// From tag is the peer's. `None` unless both tags are present.
    pub fn from_incoming_request(req: &Request) -> Option<Self> {
        Some(Self::new(req.call_id()?, req.to_tag()?, req.from_tag()?))
    }

    /// The dialog a response to one of our requests belongs to: From tag is
    /// ours, To tag is the peer's.
    pub fn from_uac_response(resp: &Response) -> Option<Self> {
        Some(Self::new(resp.call_id()?, resp.from_tag()?, resp.to_tag()?))
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};local={};remote={}", self.call_id, self.local_tag, self.remote_tag)
    }
}

/// Errors raised by dialog operations.
///
/// Protocol violations carry enough detail for the caller to pick the
/// response code; misuse variants are programming errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialogError {
    #[error("message has no usable {0} header")]
    MissingHeader(&'static str),
    #[error("dialog-forming message carries no tag")]
    MissingTag,
    #[error("remote CSeq {received} is lower than {current}")]
    OutOfOrder { received: u32, current: u32 },
    #[error("{side:?} offer/answer is not valid in signaling state {state:?}")]
    InvalidSignaling {
        state: SignalingState,
        side: OfferSide,
    },
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("Event header does not match the subscription")]
    BadEvent,
    #[error("Subscription-State header is missing or invalid")]
    BadSubscriptionState,
    #[error("dialog is terminated")]
    Terminated,
}

/// Options for [`Dialog::create_outgoing_request`].
#[derive(Debug, Clone, Default)]
pub struct OutgoingRequestOptions {
    /// Reuse this CSeq number instead of taking the next one.
    pub cseq: Option<u32>,
    /// Contact to advertise, for target refresh requests.
    pub contact: Option<NameAddr>,
    pub extra_headers: Vec<(SmolStr, SmolStr)>,
    pub body: Option<Body>,
}

/// Shared dialog state (RFC 3261 §12).
///
/// One object per dialog id for the dialog's whole life: the early dialog
/// created by a tagged provisional is promoted in place on 2xx.
#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: DialogId,
    early: bool,
    local_seq: Option<u32>,
    remote_seq: Option<u32>,
    /// Our identity (From of our requests), without tag.
    pub local_uri: NameAddr,
    /// The peer's identity (To of our requests), without tag.
    pub remote_uri: NameAddr,
    pub remote_target: SipUri,
    /// Route header values in the order they are sent.
    pub route_set: Vec<SmolStr>,
    pub secure: bool,
    terminated: bool,
}

fn without_tag(mut addr: NameAddr) -> NameAddr {
    addr.params.retain(|(name, _)| !name.eq_ignore_ascii_case("tag"));
    addr
}

fn record_route(headers: &Headers) -> Vec<SmolStr> {
    headers.get_list("Record-Route")
}

fn contact_uri(msg: &impl HeaderAccess) -> Result<SipUri, DialogError> {
    msg.contact()
        .map(|contact| contact.uri)
        .ok_or(DialogError::MissingHeader("Contact"))
}

impl Dialog {
    /// Builds the UAC side of a dialog from our request and the peer's
    /// tagged 1xx or 2xx (RFC 3261 §12.1.2).
    pub fn new_uac(request: &Request, response: &Response) -> Result<Self, DialogError> {
        let call_id = response
            .call_id()
            .ok_or(DialogError::MissingHeader("Call-ID"))?;
        let local_tag = request.from_tag().ok_or(DialogError::MissingTag)?;
        let remote_tag = response.to_tag().ok_or(DialogError::MissingTag)?;
        let cseq = request.cseq().ok_or(DialogError::MissingHeader("CSeq"))?;
        let local_uri = request.from_addr().ok_or(DialogError::MissingHeader("From"))?;
        let remote_uri = request.to_addr().ok_or(DialogError::MissingHeader("To"))?;

        let mut route_set = record_route(&response.headers);
        route_set.reverse();

        Ok(Self {
            id: DialogId::new(call_id, local_tag, remote_tag),
            early: response.is_provisional(),
            local_seq: Some(cseq.seq),
            remote_seq: None,
            local_uri: without_tag(local_uri),
            remote_uri: without_tag(remote_uri),
            remote_target: contact_uri(response)?,
            route_set,
            secure: request.uri().sips,
            terminated: false,
        })
    }

    /// Builds the UAS side of a dialog from the peer's request
    /// (RFC 3261 §12.1.1). `local_tag` is the To tag we answer with.
    pub fn new_uas(request: &Request, local_tag: &str, early: bool) -> Result<Self, DialogError> {
        let call_id = request
            .call_id()
            .ok_or(DialogError::MissingHeader("Call-ID"))?;
        let remote_tag = request.from_tag().ok_or(DialogError::MissingTag)?;
        let cseq = request.cseq().ok_or(DialogError::MissingHeader("CSeq"))?;
        let local_uri = request.to_addr().ok_or(DialogError::MissingHeader("To"))?;
        let remote_uri = request.from_addr().ok_or(DialogError::MissingHeader("From"))?;

        Ok(Self {
            id: DialogId::new(call_id, local_tag, remote_tag),
            early,
            local_seq: None,
            remote_seq: Some(cseq.seq),
            local_uri: without_tag(local_uri),
            remote_uri: without_tag(remote_uri),
            remote_target: contact_uri(request)?,
            route_set: record_route(&request.headers),
            secure: request.uri().sips,
            terminated: false,
        })
    }

    /// Subscriber side of a dialog created by a NOTIFY that arrived before
    /// the 2xx to our SUBSCRIBE (RFC 6665 §4.1.2.4). The route set comes
    /// from the NOTIFY's Record-Route as for any UAS.
    pub fn new_subscriber(subscribe: &Request, notify: &Request) -> Result<Self, DialogError> {
        let local_tag = subscribe.from_tag().ok_or(DialogError::MissingTag)?;
        let cseq = subscribe.cseq().ok_or(DialogError::MissingHeader("CSeq"))?;
        let mut dialog = Self::new_uas(notify, &local_tag, false)?;
        dialog.local_seq = Some(cseq.seq);
        Ok(dialog)
    }

    pub fn is_early(&self) -> bool {
        self.early
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn local_seq(&self) -> Option<u32> {
        self.local_seq
    }

    pub fn remote_seq(&self) -> Option<u32> {
        self.remote_seq
    }

    /// Early to confirmed. Never goes back.
    pub fn confirm(&mut self) {
        if self.early {
            debug!(dialog = %self.id, "dialog confirmed");
        }
        self.early = false;
    }

    /// Promotes an early UAC dialog with the 2xx that confirms it; the route
    /// set and remote target are taken from the 2xx (RFC 3261 §12.1.2).
    pub fn confirm_with(&mut self, response: &Response) {
        if self.early {
            let mut route_set = record_route(&response.headers);
            route_set.reverse();
            self.route_set = route_set;
            if let Ok(target) = contact_uri(response) {
                self.remote_target = target;
            }
        }
        self.confirm();
    }

    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    /// Sequences an inbound in-dialog request (RFC 3261 §12.2.2).
    ///
    /// ACK is exempt. A CSeq lower than the remote sequence number fails
    /// with [`DialogError::OutOfOrder`] and leaves state untouched; the
    /// caller answers 500. Target refresh requests update the remote target.
    pub fn receive_request(&mut self, request: &Request) -> Result<(), DialogError> {
        if request.method() == &Method::Ack {
            return Ok(());
        }
        let cseq = request.cseq().ok_or(DialogError::MissingHeader("CSeq"))?;
        if let Some(current) = self.remote_seq {
            if cseq.seq < current {
                return Err(DialogError::OutOfOrder {
                    received: cseq.seq,
                    current,
                });
            }
        }
        self.remote_seq = Some(cseq.seq);

        if is_target_refresh(request.method()) {
            if let Some(contact) = request.contact() {
                self.remote_target = contact.uri;
            }
        }
        Ok(())
    }

    /// Applies the Contact of a 2xx to one of our target refresh requests.
    pub fn receive_target_refresh_response(&mut self, response: &Response) {
        if let Ok(target) = contact_uri(response) {
            self.remote_target = target;
        }
    }

    /// Builds an in-dialog request (RFC 3261 §12.2.1.1).
    ///
    /// To/From carry the dialog tags, the local CSeq is incremented (ACK and
    /// CANCEL reuse the current number unless `options.cseq` is given), and
    /// the route set becomes Route headers. A strict first route turns into
    /// the Request-URI with the remote target appended as the last Route.
    /// No Via is added; the sending client stamps it.
    pub fn create_outgoing_request(
        &mut self,
        method: Method,
        options: OutgoingRequestOptions,
    ) -> Request {
        let seq = match (options.cseq, &method) {
            (Some(seq), _) => seq,
            (None, Method::Ack | Method::Cancel) => self.local_seq.unwrap_or(1),
            (None, _) => {
                let next = self.local_seq.map_or(1, |seq| seq.wrapping_add(1));
                self.local_seq = Some(next);
                next
            }
        };

        let mut headers = Headers::new();
        let (uri, routes) = self.request_target();
        for route in routes {
            headers.push("Route", route);
        }
        headers.push(
            "From",
            self.local_uri.clone().with_tag(&self.id.local_tag).to_string(),
        );
        headers.push(
            "To",
            self.remote_uri.clone().with_tag(&self.id.remote_tag).to_string(),
        );
        headers.push("Call-ID", self.id.call_id.clone());
        headers.push("CSeq", format!("{} {}", seq, method));
        if let Some(contact) = &options.contact {
            headers.push("Contact", contact.to_string());
        }
        for (name, value) in options.extra_headers {
            headers.push(name, value);
        }

        let mut request = Request::new(RequestLine::new(method, uri), headers, Bytes::new());
        request.set_body(options.body.as_ref());
        request
    }

    fn request_target(&self) -> (SipUri, Vec<SmolStr>) {
        let first = self
            .route_set
            .first()
            .and_then(|route| NameAddr::parse(route));
        match first {
            Some(first) if !first.uri.is_loose_route() => {
                let mut routes: Vec<SmolStr> = self.route_set[1..].to_vec();
                routes.push(SmolStr::new(format!("<{}>", self.remote_target)));
                (first.uri, routes)
            }
            _ => (self.remote_target.clone(), self.route_set.clone()),
        }
    }
}

/// Methods whose Contact replaces the remote target (RFC 3261 §12.2,
/// RFC 3311, RFC 6665).
pub fn is_target_refresh(method: &Method) -> bool {
    matches!(
        method,
        Method::Invite | Method::Update | Method::Subscribe | Method::Notify | Method::Refer
    )
}
