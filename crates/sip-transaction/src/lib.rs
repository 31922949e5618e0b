// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP transaction layer (RFC 3261 §17, amended by RFC 6026).
//!
//! The four transaction state machines are sans-IO: each consumes an event
//! and returns the [`fsm::ClientAction`]s or [`fsm::ServerAction`]s the
//! caller must carry out (transmit, deliver, arm or cancel a timer,
//! terminate). Timers are named by [`TransactionTimer`]; the owner of the
//! state machine maps each name to a scheduled token and feeds expiries
//! back as `TimerFired` events.

pub mod builders;
pub mod fsm;
pub mod timers;

use rand::{distributions::Alphanumeric, Rng};
use sip_core::{HeaderAccess, Method, Request, Response};
use smol_str::SmolStr;

pub use fsm::{
    ClientAction, ClientInviteEvent, ClientInviteFsm, ClientNonInviteEvent, ClientNonInviteFsm,
    ServerAction, ServerInviteEvent, ServerInviteFsm, ServerNonInviteEvent, ServerNonInviteFsm,
};
pub use timers::{TimerDefaults, Transport, TransportAwareTimers};

/// RFC 3261 magic cookie every compliant branch starts with.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Extracts the `branch=` parameter from a Via header string.
pub fn branch_from_via(via: &str) -> Option<&str> {
    via.split(';').skip(1).find_map(|part| {
        let (name, value) = part.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("branch") {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Generates a new RFC 3261 magic-cookie branch identifier.
pub fn generate_branch_id() -> SmolStr {
    SmolStr::new(format!("{}{}", BRANCH_MAGIC_COOKIE, random_token(16)))
}

/// Generates a From/To tag (RFC 3261 §19.3 asks for at least 32 bits of randomness).
pub fn generate_tag() -> SmolStr {
    SmolStr::new(random_token(10))
}

/// Generates a globally unique Call-ID.
pub fn generate_call_id() -> SmolStr {
    SmolStr::new(random_token(22))
}

/// Timers referenced by the SIP transaction state machines (RFC 3261 §17,
/// RFC 6026 §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionTimer {
    /// INVITE request retransmit (client, unreliable transport).
    A,
    /// INVITE transaction timeout (client).
    B,
    /// Wait time for response retransmits after a non-2xx (client INVITE).
    D,
    /// Non-INVITE request retransmit (client, unreliable transport).
    E,
    /// Non-INVITE transaction timeout (client).
    F,
    /// INVITE final response retransmit (server, unreliable transport).
    G,
    /// Wait time for ACK receipt (server INVITE).
    H,
    /// Wait time for ACK retransmits (server INVITE).
    I,
    /// Wait time for request retransmits (server non-INVITE).
    J,
    /// Wait time for response retransmits (client non-INVITE).
    K,
    /// Wait time for accepted INVITE retransmits (server, RFC 6026).
    L,
    /// Wait time for retransmitted 2xx responses (client, RFC 6026).
    M,
    /// Periodic resend of the last non-100 provisional (server INVITE).
    ProvisionalResend,
}

/// Client INVITE transaction states (RFC 6026 Figure 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientInviteState {
    Calling,
    Proceeding,
    Accepted,
    Completed,
    Terminated,
}

/// Server INVITE transaction states (RFC 6026 Figure 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerInviteState {
    Proceeding,
    Accepted,
    Completed,
    Confirmed,
    Terminated,
}

/// Client non-INVITE transaction states (RFC 3261 Figure 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientNonInviteState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// Server non-INVITE transaction states (RFC 3261 Figure 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerNonInviteState {
    Trying,
    Proceeding,
    Completed,
    Terminated,
}

/// Unique key identifying a transaction (branch + method + direction).
///
/// ACK is keyed as INVITE so that the ACK for a non-2xx final response
/// finds the INVITE server transaction it belongs to. CANCEL keeps its own
/// method and therefore never collides with the INVITE it targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: SmolStr,
    pub method: Method,
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<SmolStr>, method: Method, is_server: bool) -> Self {
        let method = match method {
            Method::Ack => Method::Invite,
            other => other,
        };
        Self {
            branch: branch.into(),
            method,
            is_server,
        }
    }

    /// Builds a transaction key from a request's top Via branch.
    pub fn from_request(req: &Request, is_server: bool) -> Option<Self> {
        let branch = req.branch()?;
        Some(Self::new(branch, req.method().clone(), is_server))
    }

    /// Builds the client transaction key a response belongs to, using the
    /// top Via branch and the CSeq method.
    pub fn from_response(resp: &Response) -> Option<Self> {
        let branch = resp.branch()?;
        let cseq = resp.cseq()?;
        Some(Self::new(branch, cseq.method, false))
    }
}

impl std::fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = if self.is_server { "server" } else { "client" };
        write!(f, "{}/{}/{}", side, self.method, self.branch)
    }
}

/// Misuse of a transaction by its user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("cannot send {code} response in state {state}")]
    InvalidResponse { code: u16, state: &'static str },
    #[error("request has no Via branch")]
    MissingBranch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_has_magic_cookie() {
        let branch = generate_branch_id();
        assert!(branch.starts_with(BRANCH_MAGIC_COOKIE));
        assert_eq!(branch.len(), BRANCH_MAGIC_COOKIE.len() + 16);
    }

    #[test]
    fn ack_keys_as_invite() {
        let key = TransactionKey::new("z9hG4bKabc", Method::Ack, true);
        assert_eq!(key, TransactionKey::new("z9hG4bKabc", Method::Invite, true));
        assert_ne!(key, TransactionKey::new("z9hG4bKabc", Method::Cancel, true));
    }

    #[test]
    fn branch_parsing_ignores_other_params() {
        assert_eq!(
            branch_from_via("SIP/2.0/UDP host;rport;branch=z9hG4bK1;received=1.2.3.4"),
            Some("z9hG4bK1")
        );
        assert_eq!(branch_from_via("SIP/2.0/UDP host"), None);
    }
}
