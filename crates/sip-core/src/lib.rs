// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP types consumed by the transaction, dialog and user agent layers.
//!
//! This crate provides the message model the signaling core operates on:
//! - **Messages**: [`Request`], [`Response`], [`SipMessage`]
//! - **Addressing**: [`SipUri`] and [`NameAddr`] (From/To/Contact/Route values)
//! - **Headers**: ordered [`Headers`] container plus typed views for the fields
//!   the core interprets ([`CSeq`], [`ViaHeader`], [`EventHeader`],
//!   [`SubscriptionStateHeader`], [`RAckHeader`])
//! - **Bodies**: [`Body`], an opaque payload with its content type
//!
//! Strings use [`SmolStr`](smol_str::SmolStr) and payloads use
//! [`Bytes`](bytes::Bytes) so messages are cheap to clone into caches.
//!
//! # Examples
//!
//! ```
//! use sip_core::{HeaderAccess, Headers, Method, Request, RequestLine, SipUri};
//! use bytes::Bytes;
//! use smol_str::SmolStr;
//!
//! let mut headers = Headers::new();
//! headers.push(SmolStr::new("Call-ID"), SmolStr::new("abc@host"));
//! headers.push(SmolStr::new("CSeq"), SmolStr::new("1 OPTIONS"));
//! let uri = SipUri::parse("sip:bob@example.com").unwrap();
//! let request = Request::new(RequestLine::new(Method::Options, uri), headers, Bytes::new());
//!
//! assert_eq!(request.call_id(), Some("abc@host"));
//! assert_eq!(request.cseq().unwrap().seq, 1);
//! ```

pub mod body;
pub mod cseq;
pub mod event;
pub mod headers;
pub mod method;
pub mod msg;
pub mod name_addr;
pub mod rseq;
pub mod uri;
pub mod via;

pub use body::Body;
pub use cseq::CSeq;
pub use event::{EventHeader, SubscriptionState, SubscriptionStateHeader};
pub use headers::{Header, Headers};
pub use method::Method;
pub use msg::{reason_phrase, HeaderAccess, Request, RequestLine, Response, SipMessage, StatusLine};
pub use name_addr::NameAddr;
pub use rseq::RAckHeader;
pub use uri::SipUri;
pub use via::ViaHeader;

/// Splits a `;`-separated parameter list into `(name, value)` pairs.
///
/// Names are lowercased; values keep their case with surrounding quotes
/// removed. Empty segments are skipped.
pub(crate) fn parse_params(input: &str) -> Vec<(smol_str::SmolStr, Option<smol_str::SmolStr>)> {
    input
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.split_once('=') {
            Some((name, value)) => (
                smol_str::SmolStr::new(name.trim().to_ascii_lowercase()),
                Some(smol_str::SmolStr::new(value.trim().trim_matches('"'))),
            ),
            None => (smol_str::SmolStr::new(segment.to_ascii_lowercase()), None),
        })
        .collect()
}

/// Renders parameters back into `;name=value` form.
pub(crate) fn write_params(
    f: &mut std::fmt::Formatter<'_>,
    params: &[(smol_str::SmolStr, Option<smol_str::SmolStr>)],
) -> std::fmt::Result {
    for (name, value) in params {
        match value {
            Some(value) => write!(f, ";{}={}", name, value)?,
            None => write!(f, ";{}", name)?,
        }
    }
    Ok(())
}
