// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use smol_str::SmolStr;

use crate::Headers;

/// Opaque message body with the headers that describe it.
///
/// The core never inspects `content`; it only tracks whether a body was
/// exchanged as part of an offer/answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub content_type: SmolStr,
    pub content_disposition: Option<SmolStr>,
    pub content: Bytes,
}

impl Body {
    pub fn new(content_type: impl Into<SmolStr>, content: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            content_disposition: None,
            content: content.into(),
        }
    }

    /// Convenience constructor for an `application/sdp` session body.
    pub fn sdp(content: impl Into<Bytes>) -> Self {
        Self::new("application/sdp", content)
    }

    /// Extracts the body described by `headers`, if the payload is non-empty.
    pub fn from_parts(headers: &Headers, content: &Bytes) -> Option<Self> {
        if content.is_empty() {
            return None;
        }
        Some(Self {
            content_type: headers
                .get("Content-Type")
                .cloned()
                .unwrap_or_else(|| SmolStr::new("application/octet-stream")),
            content_disposition: headers.get("Content-Disposition").cloned(),
            content: content.clone(),
        })
    }

    /// True when the body takes part in session offer/answer, i.e. its
    /// disposition is absent or `session` (RFC 3261 §13.2.1).
    pub fn is_session(&self) -> bool {
        match &self.content_disposition {
            None => true,
            Some(disposition) => disposition
                .split(';')
                .next()
                .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("session")),
        }
    }

    /// Writes the describing headers and returns the payload.
    pub fn apply_to(&self, headers: &mut Headers) -> Bytes {
        headers.set("Content-Type", self.content_type.clone());
        if let Some(disposition) = &self.content_disposition {
            headers.set("Content-Disposition", disposition.clone());
        }
        self.content.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_no_body() {
        assert!(Body::from_parts(&Headers::new(), &Bytes::new()).is_none());
    }

    #[test]
    fn render_disposition_is_not_session() {
        let mut body = Body::new("text/html", "<p>hi</p>");
        assert!(body.is_session());
        body.content_disposition = Some(SmolStr::new("render;handling=optional"));
        assert!(!body.is_session());
    }
}
