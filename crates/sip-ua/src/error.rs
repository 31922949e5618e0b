// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use sip_dialog::{DialogError, DialogId};
use sip_transaction::{TransactionError, TransactionKey};

/// Failure reported by a [`Transport`](crate::transport::Transport) send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// Synchronous errors returned to callers of the User Agent Core.
///
/// These are caller mistakes or configuration problems. Network
/// conditions (timeouts, transport failures, rejections) reach the
/// application through delegates instead.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no transaction {0}")]
    UnknownTransaction(TransactionKey),

    #[error("no dialog {0}")]
    UnknownDialog(DialogId),

    #[error("status {code} is not valid for {operation}")]
    InvalidStatus { code: u16, operation: &'static str },

    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("a session body is required to complete offer/answer")]
    BodyRequired,

    #[error("request is missing {0}")]
    MalformedRequest(&'static str),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Dialog(#[from] DialogError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
