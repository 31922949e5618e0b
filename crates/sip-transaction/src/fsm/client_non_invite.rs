// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::time::Duration;

use sip_core::{Request, Response};

use super::{terminate_reason, ClientAction};
use crate::timers::TransportAwareTimers;
use crate::{ClientNonInviteState, TransactionTimer};

/// Events that drive the client non-INVITE transaction (RFC 3261 §17.1.2).
#[derive(Debug, Clone)]
pub enum ClientNonInviteEvent {
    SendRequest(Request),
    ReceiveResponse(Response),
    TimerFired(TransactionTimer),
    TransportError,
}

/// Implements RFC 3261 Figure 6 for non-INVITE client transactions.
#[derive(Debug)]
pub struct ClientNonInviteFsm {
    pub state: ClientNonInviteState,
    timers: TransportAwareTimers,
    e_interval: Duration,
    request: Option<Request>,
}

impl ClientNonInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ClientNonInviteState::Trying,
            timers,
            e_interval: timers.duration(TransactionTimer::E),
            request: None,
        }
    }

    /// The request this transaction carries.
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn on_event(&mut self, event: ClientNonInviteEvent) -> Vec<ClientAction> {
        use ClientNonInviteState::*;
        match (self.state, event) {
            (Trying, ClientNonInviteEvent::SendRequest(request)) if self.request.is_none() => {
                self.handle_send(request)
            }
            (Trying | Proceeding, ClientNonInviteEvent::ReceiveResponse(response))
                if response.is_provisional() =>
            {
                self.state = Proceeding;
                vec![ClientAction::Deliver(response)]
            }
            (Trying | Proceeding, ClientNonInviteEvent::ReceiveResponse(response))
                if response.is_final() =>
            {
                self.handle_final(response)
            }
            // Retransmitted final responses are absorbed.
            (Completed, ClientNonInviteEvent::ReceiveResponse(_)) => Vec::new(),
            (Trying | Proceeding, ClientNonInviteEvent::TimerFired(TransactionTimer::E)) => {
                self.handle_timer_e()
            }
            (Trying | Proceeding, ClientNonInviteEvent::TimerFired(TransactionTimer::F)) => {
                self.state = Terminated;
                vec![
                    ClientAction::Cancel(TransactionTimer::E),
                    ClientAction::Timeout,
                    ClientAction::Terminate {
                        reason: terminate_reason("timer F"),
                    },
                ]
            }
            (Completed, ClientNonInviteEvent::TimerFired(TransactionTimer::K)) => {
                self.state = Terminated;
                vec![ClientAction::Terminate {
                    reason: terminate_reason("timer K"),
                }]
            }
            (Terminated, _) => Vec::new(),
            (_, ClientNonInviteEvent::TransportError) => {
                self.state = Terminated;
                vec![
                    ClientAction::Cancel(TransactionTimer::E),
                    ClientAction::Cancel(TransactionTimer::F),
                    ClientAction::Cancel(TransactionTimer::K),
                    ClientAction::TransportFailed,
                    ClientAction::Terminate {
                        reason: terminate_reason("transport error"),
                    },
                ]
            }
            _ => Vec::new(),
        }
    }

    fn handle_send(&mut self, request: Request) -> Vec<ClientAction> {
        self.request = Some(request.clone());
        let mut actions = vec![
            ClientAction::Transmit(request),
            ClientAction::Schedule {
                timer: TransactionTimer::F,
                duration: self.timers.duration(TransactionTimer::F),
            },
        ];
        if self.timers.should_retransmit() {
            actions.push(ClientAction::Schedule {
                timer: TransactionTimer::E,
                duration: self.e_interval,
            });
        }
        actions
    }

    fn handle_final(&mut self, response: Response) -> Vec<ClientAction> {
        self.state = ClientNonInviteState::Completed;
        let outcome = if response.code() == 408 {
            ClientAction::Timeout
        } else {
            ClientAction::Deliver(response)
        };
        vec![
            ClientAction::Cancel(TransactionTimer::E),
            ClientAction::Cancel(TransactionTimer::F),
            outcome,
            ClientAction::Schedule {
                timer: TransactionTimer::K,
                duration: self.timers.duration(TransactionTimer::K),
            },
        ]
    }

    fn handle_timer_e(&mut self) -> Vec<ClientAction> {
        let Some(request) = self.request.clone() else {
            return Vec::new();
        };
        // In Proceeding the interval pins to T2 (RFC 3261 §17.1.2.2).
        self.e_interval = if self.state == ClientNonInviteState::Proceeding {
            self.timers.t2()
        } else {
            self.e_interval.saturating_mul(2).min(self.timers.t2())
        };
        vec![
            ClientAction::Transmit(request),
            ClientAction::Schedule {
                timer: TransactionTimer::E,
                duration: self.e_interval,
            },
        ]
    }
}
