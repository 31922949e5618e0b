// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::time::Duration;

use sip_core::{Request, Response};
use tracing::debug;

use super::{terminate_reason, ClientAction};
use crate::builders::build_ack_for_non_2xx;
use crate::timers::TransportAwareTimers;
use crate::{ClientInviteState, TransactionTimer};

/// Events that drive the client INVITE transaction (RFC 3261 §17.1.1,
/// RFC 6026 §7.2).
#[derive(Debug, Clone)]
pub enum ClientInviteEvent {
    SendInvite(Request),
    ReceiveResponse(Response),
    TimerFired(TransactionTimer),
    /// The transaction user wants to CANCEL this INVITE.
    CancelRequested,
    TransportError,
}

/// Implements the client INVITE transaction state machine.
///
/// A 2xx moves the machine to Accepted where it stays for Timer M, passing
/// every retransmitted 2xx up so the session layer can re-ACK. A 3xx-6xx
/// moves it to Completed; the ACK is generated here and resent for each
/// retransmitted final response without notifying the user again.
#[derive(Debug)]
pub struct ClientInviteFsm {
    pub state: ClientInviteState,
    timers: TransportAwareTimers,
    a_interval: Duration,
    invite: Option<Request>,
    ack: Option<Request>,
    cancel_requested: bool,
}

impl ClientInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ClientInviteState::Calling,
            timers,
            a_interval: timers.duration(TransactionTimer::A),
            invite: None,
            ack: None,
            cancel_requested: false,
        }
    }

    /// The INVITE this transaction carries.
    pub fn request(&self) -> Option<&Request> {
        self.invite.as_ref()
    }

    /// True while a CANCEL waits for the first provisional response.
    pub fn cancel_pending(&self) -> bool {
        self.cancel_requested
    }

    /// Handles an INVITE transaction event and returns actions for the runtime.
    pub fn on_event(&mut self, event: ClientInviteEvent) -> Vec<ClientAction> {
        use ClientInviteState::*;
        match (self.state, event) {
            (Calling, ClientInviteEvent::SendInvite(invite)) if self.invite.is_none() => {
                self.handle_send(invite)
            }
            (Calling | Proceeding, ClientInviteEvent::ReceiveResponse(response))
                if response.is_provisional() =>
            {
                self.handle_provisional(response)
            }
            (Calling | Proceeding, ClientInviteEvent::ReceiveResponse(response))
                if response.is_success() =>
            {
                self.handle_2xx(response)
            }
            (Calling | Proceeding, ClientInviteEvent::ReceiveResponse(response))
                if response.code() >= 300 =>
            {
                self.handle_failure(response)
            }
            // Forward every retransmitted 2xx; the session layer re-ACKs.
            (Accepted, ClientInviteEvent::ReceiveResponse(response)) if response.is_success() => {
                vec![ClientAction::Deliver(response)]
            }
            (Completed, ClientInviteEvent::ReceiveResponse(response)) if response.code() >= 300 => {
                self.resend_ack()
            }
            (Calling, ClientInviteEvent::TimerFired(TransactionTimer::A)) => self.handle_timer_a(),
            (Calling, ClientInviteEvent::TimerFired(TransactionTimer::B)) => self.handle_timer_b(),
            (Completed, ClientInviteEvent::TimerFired(TransactionTimer::D)) => {
                self.terminate("timer D")
            }
            (Accepted, ClientInviteEvent::TimerFired(TransactionTimer::M)) => {
                self.terminate("timer M")
            }
            (Calling, ClientInviteEvent::CancelRequested) => {
                debug!("CANCEL deferred until a provisional response arrives");
                self.cancel_requested = true;
                Vec::new()
            }
            (Proceeding, ClientInviteEvent::CancelRequested) => vec![ClientAction::SendCancel],
            // RFC 6026: the call already succeeded, nothing to tear down here.
            (Accepted, ClientInviteEvent::TransportError) => Vec::new(),
            (Terminated, _) => Vec::new(),
            (_, ClientInviteEvent::TransportError) => self.handle_transport_error(),
            _ => Vec::new(),
        }
    }

    fn handle_send(&mut self, invite: Request) -> Vec<ClientAction> {
        self.invite = Some(invite.clone());
        let mut actions = vec![
            ClientAction::Transmit(invite),
            ClientAction::Schedule {
                timer: TransactionTimer::B,
                duration: self.timers.duration(TransactionTimer::B),
            },
        ];
        if self.timers.should_retransmit() {
            actions.push(ClientAction::Schedule {
                timer: TransactionTimer::A,
                duration: self.a_interval,
            });
        }
        actions
    }

    fn handle_provisional(&mut self, response: Response) -> Vec<ClientAction> {
        let mut actions = Vec::new();
        if self.state == ClientInviteState::Calling {
            actions.push(ClientAction::Cancel(TransactionTimer::A));
            actions.push(ClientAction::Cancel(TransactionTimer::B));
        }
        self.state = ClientInviteState::Proceeding;
        actions.push(ClientAction::Deliver(response));
        if std::mem::take(&mut self.cancel_requested) {
            actions.push(ClientAction::SendCancel);
        }
        actions
    }

    fn handle_2xx(&mut self, response: Response) -> Vec<ClientAction> {
        self.state = ClientInviteState::Accepted;
        self.cancel_requested = false;
        vec![
            ClientAction::Cancel(TransactionTimer::A),
            ClientAction::Cancel(TransactionTimer::B),
            ClientAction::Schedule {
                timer: TransactionTimer::M,
                duration: self.timers.duration(TransactionTimer::M),
            },
            ClientAction::Deliver(response),
        ]
    }

    fn handle_failure(&mut self, response: Response) -> Vec<ClientAction> {
        self.state = ClientInviteState::Completed;
        self.cancel_requested = false;
        let mut actions = vec![
            ClientAction::Cancel(TransactionTimer::A),
            ClientAction::Cancel(TransactionTimer::B),
        ];
        if let Some(invite) = &self.invite {
            let ack = build_ack_for_non_2xx(invite, &response);
            self.ack = Some(ack.clone());
            actions.push(ClientAction::Transmit(ack));
        }
        actions.push(ClientAction::Deliver(response));
        actions.push(ClientAction::Schedule {
            timer: TransactionTimer::D,
            duration: self.timers.duration(TransactionTimer::D),
        });
        actions
    }

    fn resend_ack(&self) -> Vec<ClientAction> {
        self.ack
            .iter()
            .cloned()
            .map(ClientAction::Transmit)
            .collect()
    }

    fn handle_timer_a(&mut self) -> Vec<ClientAction> {
        let Some(invite) = self.invite.clone() else {
            return Vec::new();
        };
        // Timer A doubles without the T2 cap that applies to E and G.
        self.a_interval = self.a_interval.saturating_mul(2);
        vec![
            ClientAction::Transmit(invite),
            ClientAction::Schedule {
                timer: TransactionTimer::A,
                duration: self.a_interval,
            },
        ]
    }

    fn handle_timer_b(&mut self) -> Vec<ClientAction> {
        self.state = ClientInviteState::Terminated;
        vec![
            ClientAction::Cancel(TransactionTimer::A),
            ClientAction::Timeout,
            ClientAction::Terminate {
                reason: terminate_reason("timer B"),
            },
        ]
    }

    fn handle_transport_error(&mut self) -> Vec<ClientAction> {
        self.state = ClientInviteState::Terminated;
        vec![
            ClientAction::Cancel(TransactionTimer::A),
            ClientAction::Cancel(TransactionTimer::B),
            ClientAction::Cancel(TransactionTimer::D),
            ClientAction::TransportFailed,
            ClientAction::Terminate {
                reason: terminate_reason("transport error"),
            },
        ]
    }

    fn terminate(&mut self, reason: &str) -> Vec<ClientAction> {
        self.state = ClientInviteState::Terminated;
        vec![ClientAction::Terminate {
            reason: terminate_reason(reason),
        }]
    }
}
