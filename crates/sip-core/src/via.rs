// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use smol_str::SmolStr;

use crate::{parse_params, write_params};

/// Parsed representation of a single Via header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaHeader {
    pub transport: SmolStr,
    pub sent_by: SmolStr,
    pub params: Vec<(SmolStr, Option<SmolStr>)>,
}

impl ViaHeader {
    /// Builds `SIP/2.0/<transport> <sent-by>;branch=<branch>`.
    pub fn new(transport: &str, sent_by: &str, branch: &str) -> Self {
        Self {
            transport: SmolStr::new(transport.to_ascii_uppercase()),
            sent_by: SmolStr::new(sent_by),
            params: vec![(SmolStr::new("branch"), Some(SmolStr::new(branch)))],
        }
    }

    /// Parses `SIP/2.0/UDP host:port;param=value`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (protocol, rest) = value.split_once(char::is_whitespace)?;
        let mut proto_parts = protocol.split('/');
        let name = proto_parts.next()?;
        let version = proto_parts.next()?;
        let transport = proto_parts.next()?;
        if !name.eq_ignore_ascii_case("SIP") || version != "2.0" {
            return None;
        }
        let rest = rest.trim();
        let (sent_by, params) = match rest.split_once(';') {
            Some((sent_by, params)) => (sent_by.trim(), parse_params(params)),
            None => (rest, Vec::new()),
        };
        if sent_by.is_empty() {
            return None;
        }
        Some(Self {
            transport: SmolStr::new(transport.to_ascii_uppercase()),
            sent_by: SmolStr::new(sent_by),
            params,
        })
    }

    /// Returns the transport token (e.g. UDP/TCP/WSS).
    pub fn transport(&self) -> &str {
        self.transport.as_str()
    }

    /// Looks up the provided parameter ignoring ASCII case.
    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_deref())
    }

    /// Returns the `branch` parameter, the transaction identifier.
    pub fn branch(&self) -> Option<&str> {
        self.param("branch").flatten()
    }
}

impl fmt::Display for ViaHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
        write_params(f, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_branch_and_received() {
        let via =
            ViaHeader::parse("SIP/2.0/udp pc33.atlanta.com;branch=z9hG4bK776asdhds;rport").unwrap();
        assert_eq!(via.transport(), "UDP");
        assert_eq!(via.sent_by, "pc33.atlanta.com");
        assert_eq!(via.branch(), Some("z9hG4bK776asdhds"));
        assert_eq!(via.param("rport"), Some(None));
    }

    #[test]
    fn renders_new_via() {
        let via = ViaHeader::new("wss", "df7jal23ls0d.invalid", "z9hG4bKabc");
        assert_eq!(via.to_string(), "SIP/2.0/WSS df7jal23ls0d.invalid;branch=z9hG4bKabc");
    }
}
