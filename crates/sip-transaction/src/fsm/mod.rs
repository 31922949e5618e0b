// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The four transaction state machines.
//!
//! Each machine is driven by `on_event` and answers with a list of actions
//! executed in order by its owner. A machine never blocks, never reads a
//! clock and never touches the network.

mod client_invite;
mod client_non_invite;
mod server_invite;
mod server_non_invite;

use std::time::Duration;

use sip_core::{Request, Response};
use smol_str::SmolStr;

use crate::TransactionTimer;

pub use client_invite::{ClientInviteEvent, ClientInviteFsm};
pub use client_non_invite::{ClientNonInviteEvent, ClientNonInviteFsm};
pub use server_invite::{ServerInviteEvent, ServerInviteFsm};
pub use server_non_invite::{ServerNonInviteEvent, ServerNonInviteFsm};

/// Actions emitted by the client transaction state machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send (or resend) a request: the original, a retransmission, or the
    /// ACK generated for a non-2xx final response.
    Transmit(Request),
    /// Hand a response to the transaction user.
    Deliver(Response),
    /// Timer B/F fired, or a 408 arrived (non-INVITE).
    Timeout,
    /// The transport refused a message; the transaction is gone.
    TransportFailed,
    /// A CANCEL requested earlier may now be sent (INVITE only).
    SendCancel,
    Schedule {
        timer: TransactionTimer,
        duration: Duration,
    },
    Cancel(TransactionTimer),
    Terminate {
        reason: SmolStr,
    },
}

/// Actions emitted by the server transaction state machines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Send (or resend) a response.
    Transmit(Response),
    /// Timer H fired: the ACK for a non-2xx final never arrived.
    AckTimeout,
    /// The transport refused a message; the transaction is gone.
    TransportFailed,
    Schedule {
        timer: TransactionTimer,
        duration: Duration,
    },
    Cancel(TransactionTimer),
    Terminate {
        reason: SmolStr,
    },
}

pub(crate) fn terminate_reason(reason: &str) -> SmolStr {
    SmolStr::new(reason)
}
