// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transport contract consumed by the User Agent Core.
//!
//! The core hands fully built messages to [`Transport::send`] and never
//! looks at sockets. Inbound messages are pushed into the core with
//! [`UserAgentCore::receive_message`](crate::UserAgentCore::receive_message).

use sip_core::SipMessage;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Outbound half of a SIP transport.
pub trait Transport: Send {
    fn send(&mut self, message: &SipMessage) -> Result<(), TransportError>;
}

/// Transport that forwards every message into a tokio channel, for a
/// writer task (or a test) to drain.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<SipMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SipMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, message: &SipMessage) -> Result<(), TransportError> {
        self.tx
            .send(message.clone())
            .map_err(|_| TransportError::Closed)
    }
}
