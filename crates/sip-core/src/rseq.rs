// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use crate::Method;

/// Represents the RAck header (RFC 3262 §7.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RAckHeader {
    pub rseq: u32,
    pub cseq_number: u32,
    pub cseq_method: Method,
}

impl RAckHeader {
    /// Parses `"<rseq> <cseq> <METHOD>"`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split_whitespace();
        let rseq = parts.next()?.parse().ok()?;
        let cseq_number = parts.next()?.parse().ok()?;
        let cseq_method = Method::from_token(parts.next()?);
        Some(Self {
            rseq,
            cseq_number,
            cseq_method,
        })
    }
}

impl fmt::Display for RAckHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.rseq, self.cseq_number, self.cseq_method)
    }
}

/// Parses an RSeq header value (RFC 3262 §7.1).
pub fn parse_rseq(value: &str) -> Option<u32> {
    value.trim().parse().ok()
}
