// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::time::Duration;

use sip_core::{Request, Response};
use tracing::trace;

use super::{terminate_reason, ServerAction};
use crate::builders::build_trying;
use crate::timers::TransportAwareTimers;
use crate::{ServerInviteState, TransactionError, TransactionTimer};

/// Events that drive the server INVITE transaction (RFC 3261 §17.2.1,
/// RFC 6026 §7.1).
#[derive(Debug, Clone)]
pub enum ServerInviteEvent {
    ReceiveInvite(Request),
    /// The same INVITE arrived again.
    ReceiveRetransmission,
    ReceiveAck,
    SendResponse(Response),
    TimerFired(TransactionTimer),
    TransportError,
}

/// Server INVITE transaction state machine.
///
/// The 100 Trying goes out as soon as the INVITE is received. Retransmitted
/// INVITEs are answered with the last provisional while Proceeding and with
/// the final response once Completed; after a 2xx the machine sits in
/// Accepted for Timer L and leaves 2xx retransmission to the dialog layer.
#[derive(Debug)]
pub struct ServerInviteFsm {
    pub state: ServerInviteState,
    timers: TransportAwareTimers,
    g_interval: Duration,
    request: Option<Request>,
    last_provisional: Option<Response>,
    last_final: Option<Response>,
    provisional_timer_armed: bool,
}

impl ServerInviteFsm {
    pub fn new(timers: TransportAwareTimers) -> Self {
        Self {
            state: ServerInviteState::Proceeding,
            timers,
            g_interval: timers.duration(TransactionTimer::G),
            request: None,
            last_provisional: None,
            last_final: None,
            provisional_timer_armed: false,
        }
    }

    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn last_final(&self) -> Option<&Response> {
        self.last_final.as_ref()
    }

    /// Sends a response after checking that the current state allows it.
    ///
    /// Only Proceeding accepts provisional and final responses; Accepted
    /// still accepts a repeated 2xx.
    pub fn try_send(&mut self, response: Response) -> Result<Vec<ServerAction>, TransactionError> {
        let allowed = match self.state {
            ServerInviteState::Proceeding => true,
            ServerInviteState::Accepted => response.is_success(),
            _ => false,
        };
        if !allowed {
            return Err(TransactionError::InvalidResponse {
                code: response.code(),
                state: state_name(self.state),
            });
        }
        Ok(self.on_event(ServerInviteEvent::SendResponse(response)))
    }

    pub fn on_event(&mut self, event: ServerInviteEvent) -> Vec<ServerAction> {
        use ServerInviteState::*;
        match (self.state, event) {
            (Proceeding, ServerInviteEvent::ReceiveInvite(invite)) if self.request.is_none() => {
                let trying = build_trying(&invite);
                self.request = Some(invite);
                self.last_provisional = Some(trying.clone());
                vec![ServerAction::Transmit(trying)]
            }
            (Proceeding, ServerInviteEvent::ReceiveRetransmission) => self
                .last_provisional
                .iter()
                .cloned()
                .map(ServerAction::Transmit)
                .collect(),
            (Completed, ServerInviteEvent::ReceiveRetransmission) => self
                .last_final
                .iter()
                .cloned()
                .map(ServerAction::Transmit)
                .collect(),
            (Proceeding, ServerInviteEvent::SendResponse(response)) => {
                if response.is_provisional() {
                    self.handle_provisional(response)
                } else if response.is_success() {
                    self.handle_2xx(response)
                } else {
                    self.handle_failure(response)
                }
            }
            // Retransmissions of the 2xx are driven from above.
            (Accepted, ServerInviteEvent::SendResponse(response)) if response.is_success() => {
                vec![ServerAction::Transmit(response)]
            }
            (Completed, ServerInviteEvent::ReceiveAck) => {
                self.state = Confirmed;
                vec![
                    ServerAction::Cancel(TransactionTimer::G),
                    ServerAction::Cancel(TransactionTimer::H),
                    ServerAction::Schedule {
                        timer: TransactionTimer::I,
                        duration: self.timers.duration(TransactionTimer::I),
                    },
                ]
            }
            (Proceeding, ServerInviteEvent::TimerFired(TransactionTimer::ProvisionalResend)) => {
                self.handle_provisional_resend()
            }
            (Completed, ServerInviteEvent::TimerFired(TransactionTimer::G)) => {
                self.handle_timer_g()
            }
            (Completed, ServerInviteEvent::TimerFired(TransactionTimer::H)) => {
                self.state = Terminated;
                vec![
                    ServerAction::Cancel(TransactionTimer::G),
                    ServerAction::AckTimeout,
                    ServerAction::Terminate {
                        reason: terminate_reason("timer H"),
                    },
                ]
            }
            (Confirmed, ServerInviteEvent::TimerFired(TransactionTimer::I)) => {
                self.terminate("timer I")
            }
            (Accepted, ServerInviteEvent::TimerFired(TransactionTimer::L)) => {
                self.terminate("timer L")
            }
            (Terminated, _) => Vec::new(),
            (_, ServerInviteEvent::TransportError) => {
                self.state = Terminated;
                vec![
                    ServerAction::Cancel(TransactionTimer::ProvisionalResend),
                    ServerAction::Cancel(TransactionTimer::G),
                    ServerAction::Cancel(TransactionTimer::H),
                    ServerAction::TransportFailed,
                    ServerAction::Terminate {
                        reason: terminate_reason("transport error"),
                    },
                ]
            }
            (state, event) => {
                trace!(?state, ?event, "server INVITE transaction ignored event");
                Vec::new()
            }
        }
    }

    fn handle_provisional(&mut self, response: Response) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        if response.code() > 100 {
            self.last_provisional = Some(response.clone());
            if !self.provisional_timer_armed {
                self.provisional_timer_armed = true;
                actions.push(ServerAction::Schedule {
                    timer: TransactionTimer::ProvisionalResend,
                    duration: self.timers.duration(TransactionTimer::ProvisionalResend),
                });
            }
        }
        actions.insert(0, ServerAction::Transmit(response));
        actions
    }

    fn handle_provisional_resend(&mut self) -> Vec<ServerAction> {
        let Some(provisional) = self.last_provisional.clone() else {
            return Vec::new();
        };
        vec![
            ServerAction::Transmit(provisional),
            ServerAction::Schedule {
                timer: TransactionTimer::ProvisionalResend,
                duration: self.timers.duration(TransactionTimer::ProvisionalResend),
            },
        ]
    }

    fn handle_2xx(&mut self, response: Response) -> Vec<ServerAction> {
        self.state = ServerInviteState::Accepted;
        self.last_final = Some(response.clone());
        vec![
            ServerAction::Cancel(TransactionTimer::ProvisionalResend),
            ServerAction::Transmit(response),
            ServerAction::Schedule {
                timer: TransactionTimer::L,
                duration: self.timers.duration(TransactionTimer::L),
            },
        ]
    }

    fn handle_failure(&mut self, response: Response) -> Vec<ServerAction> {
        self.state = ServerInviteState::Completed;
        self.last_final = Some(response.clone());
        let mut actions = vec![
            ServerAction::Cancel(TransactionTimer::ProvisionalResend),
            ServerAction::Transmit(response),
            ServerAction::Schedule {
                timer: TransactionTimer::H,
                duration: self.timers.duration(TransactionTimer::H),
            },
        ];
        if self.timers.should_retransmit() {
            actions.push(ServerAction::Schedule {
                timer: TransactionTimer::G,
                duration: self.g_interval,
            });
        }
        actions
    }

    fn handle_timer_g(&mut self) -> Vec<ServerAction> {
        let Some(response) = self.last_final.clone() else {
            return Vec::new();
        };
        self.g_interval = self.g_interval.saturating_mul(2).min(self.timers.t2());
        vec![
            ServerAction::Transmit(response),
            ServerAction::Schedule {
                timer: TransactionTimer::G,
                duration: self.g_interval,
            },
        ]
    }

    fn terminate(&mut self, reason: &str) -> Vec<ServerAction> {
        self.state = ServerInviteState::Terminated;
        vec![ServerAction::Terminate {
            reason: terminate_reason(reason),
        }]
    }
}

fn state_name(state: ServerInviteState) -> &'static str {
    match state {
        ServerInviteState::Proceeding => "Proceeding",
        ServerInviteState::Accepted => "Accepted",
        ServerInviteState::Completed => "Completed",
        ServerInviteState::Confirmed => "Confirmed",
        ServerInviteState::Terminated => "Terminated",
    }
}
