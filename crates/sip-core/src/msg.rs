// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use bytes::Bytes;
use smol_str::SmolStr;

use crate::{Body, CSeq, Headers, Method, NameAddr, SipUri, ViaHeader};

/// First line of a SIP request: `Method SP Request-URI SP SIP/2.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub uri: SipUri,
}

impl RequestLine {
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self { method, uri }
    }
}

/// First line of a SIP response: `SIP/2.0 SP Status-Code SP Reason-Phrase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub reason: SmolStr,
}

impl StatusLine {
    pub fn new(code: u16, reason: impl Into<SmolStr>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Status line with the default reason phrase for `code`.
    pub fn from_code(code: u16) -> Self {
        Self::new(code, reason_phrase(code))
    }
}

/// Read access to the header fields the signaling core interprets.
///
/// Implemented by [`Request`], [`Response`] and [`SipMessage`]; every
/// accessor returns `None` for absent or unparsable values.
pub trait HeaderAccess {
    fn headers(&self) -> &Headers;

    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).map(|value| value.as_str())
    }

    fn call_id(&self) -> Option<&str> {
        self.header("Call-ID").map(str::trim)
    }

    fn cseq(&self) -> Option<CSeq> {
        self.header("CSeq").and_then(CSeq::parse)
    }

    fn from_addr(&self) -> Option<NameAddr> {
        self.header("From").and_then(NameAddr::parse)
    }

    fn to_addr(&self) -> Option<NameAddr> {
        self.header("To").and_then(NameAddr::parse)
    }

    fn from_tag(&self) -> Option<SmolStr> {
        self.from_addr().and_then(|addr| addr.tag().map(SmolStr::new))
    }

    fn to_tag(&self) -> Option<SmolStr> {
        self.to_addr().and_then(|addr| addr.tag().map(SmolStr::new))
    }

    /// First Contact value, if any.
    fn contact(&self) -> Option<NameAddr> {
        self.headers()
            .get_list("Contact")
            .first()
            .and_then(|value| NameAddr::parse(value))
    }

    fn top_via(&self) -> Option<ViaHeader> {
        self.headers()
            .get_list("Via")
            .first()
            .and_then(|value| ViaHeader::parse(value))
    }

    /// Branch parameter of the topmost Via.
    fn branch(&self) -> Option<SmolStr> {
        self.top_via()
            .and_then(|via| via.branch().map(SmolStr::new))
    }

    /// True when `option-tag` appears in the named option list header
    /// (Require, Supported, Unsupported).
    fn has_option_tag(&self, header: &str, option_tag: &str) -> bool {
        self.headers()
            .get_list(header)
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(option_tag))
    }
}

/// SIP request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub start: RequestLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(start: RequestLine, headers: Headers, body: Bytes) -> Self {
        Self {
            start,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.start.method
    }

    pub fn uri(&self) -> &SipUri {
        &self.start.uri
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The body as an opaque offer/answer payload, if one is present.
    pub fn body(&self) -> Option<Body> {
        Body::from_parts(&self.headers, &self.body)
    }

    /// Replaces the body and its describing headers.
    pub fn set_body(&mut self, body: Option<&Body>) {
        match body {
            Some(body) => self.body = body.apply_to(&mut self.headers),
            None => {
                self.headers.remove("Content-Type");
                self.headers.remove("Content-Disposition");
                self.body = Bytes::new();
            }
        }
    }
}

impl HeaderAccess for Request {
    fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// SIP response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub start: StatusLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(start: StatusLine, headers: Headers, body: Bytes) -> Self {
        Self {
            start,
            headers,
            body,
        }
    }

    pub fn code(&self) -> u16 {
        self.start.code
    }

    pub fn reason(&self) -> &str {
        &self.start.reason
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.start.code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.start.code)
    }

    pub fn is_final(&self) -> bool {
        self.start.code >= 200
    }

    pub fn body(&self) -> Option<Body> {
        Body::from_parts(&self.headers, &self.body)
    }

    pub fn set_body(&mut self, body: Option<&Body>) {
        match body {
            Some(body) => self.body = body.apply_to(&mut self.headers),
            None => {
                self.headers.remove("Content-Type");
                self.headers.remove("Content-Disposition");
                self.body = Bytes::new();
            }
        }
    }
}

impl HeaderAccess for Response {
    fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// Either a request or a response, as handed to and from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl SipMessage {
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            SipMessage::Request(request) => Some(request),
            SipMessage::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            SipMessage::Response(response) => Some(response),
            SipMessage::Request(_) => None,
        }
    }
}

impl HeaderAccess for SipMessage {
    fn headers(&self) -> &Headers {
        match self {
            SipMessage::Request(request) => &request.headers,
            SipMessage::Response(response) => &response.headers,
        }
    }
}

impl From<Request> for SipMessage {
    fn from(request: Request) -> Self {
        SipMessage::Request(request)
    }
}

impl From<Response> for SipMessage {
    fn from(response: Response) -> Self {
        SipMessage::Response(response)
    }
}

fn write_headers_and_body(f: &mut fmt::Formatter<'_>, headers: &Headers, body: &Bytes) -> fmt::Result {
    for header in headers {
        if header.name.eq_ignore_ascii_case("Content-Length") || header.name == "l" {
            continue;
        }
        write!(f, "{}: {}\r\n", header.name, header.value)?;
    }
    write!(f, "Content-Length: {}\r\n\r\n", body.len())?;
    f.write_str(&String::from_utf8_lossy(body))
}

impl fmt::Display for Request {
    /// Renders the request in wire format with a computed Content-Length.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n", self.start.method, self.start.uri)?;
        write_headers_and_body(f, &self.headers, &self.body)
    }
}

impl fmt::Display for Response {
    /// Renders the response in wire format with a computed Content-Length.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {} {}\r\n", self.start.code, self.start.reason)?;
        write_headers_and_body(f, &self.headers, &self.body)
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMessage::Request(request) => request.fmt(f),
            SipMessage::Response(response) => response.fmt(f),
        }
    }
}

/// Default reason phrase for a status code (RFC 3261 §21 and extensions).
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        182 => "Queued",
        183 => "Session Progress",
        199 => "Early Dialog Terminated",
        200 => "OK",
        202 => "Accepted",
        204 => "No Notification",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        305 => "Use Proxy",
        380 => "Alternative Service",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        410 => "Gone",
        415 => "Unsupported Media Type",
        416 => "Unsupported URI Scheme",
        420 => "Bad Extension",
        421 => "Extension Required",
        423 => "Interval Too Brief",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        482 => "Loop Detected",
        483 => "Too Many Hops",
        484 => "Address Incomplete",
        485 => "Ambiguous",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        489 => "Bad Event",
        491 => "Request Pending",
        500 => "Server Internal Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        504 => "Server Time-out",
        505 => "Version Not Supported",
        600 => "Busy Everywhere",
        603 => "Decline",
        604 => "Does Not Exist Anywhere",
        606 => "Not Acceptable",
        _ => match code / 100 {
            1 => "Provisional",
            2 => "Success",
            3 => "Redirection",
            4 => "Client Error",
            5 => "Server Error",
            _ => "Global Failure",
        },
    }
}
