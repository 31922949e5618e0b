// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use sip_core::{Request, Response};

use super::{terminate_reason, ServerAction};
use crate::timers::TransportAwareTimers;
use crate::{ServerNonInviteState, TransactionError, TransactionTimer};

/// Events for the server non-INVITE transaction (RFC 3261 §17.2.2).
#[derive(Debug, Clone)]
pub enum ServerNonInviteEvent {
    ReceiveRetransmission,
    SendResponse(Response),
    TimerFired(TransactionTimer),
    TransportError,
}

/// Server non-INVITE transaction state machine.
#[derive(Debug)]
pub struct ServerNonInviteFsm {
    pub state: ServerNonInviteState,
    timers: TransportAwareTimers,
    request: Request,
    last_response: Option<Response>,
}

impl ServerNonInviteFsm {
    /// Creates the transaction for a freshly received request, in Trying.
    pub fn new(request: Request, timers: TransportAwareTimers) -> Self {
        Self {
            state: ServerNonInviteState::Trying,
            timers,
            request,
            last_response: None,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn last_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }

    /// Sends a response after checking that the current state allows it.
    pub fn try_send(&mut self, response: Response) -> Result<Vec<ServerAction>, TransactionError> {
        let allowed = match self.state {
            ServerNonInviteState::Trying | ServerNonInviteState::Proceeding => true,
            ServerNonInviteState::Completed | ServerNonInviteState::Terminated => false,
        };
        if !allowed {
            return Err(TransactionError::InvalidResponse {
                code: response.code(),
                state: state_name(self.state),
            });
        }
        Ok(self.on_event(ServerNonInviteEvent::SendResponse(response)))
    }

    pub fn on_event(&mut self, event: ServerNonInviteEvent) -> Vec<ServerAction> {
        use ServerNonInviteState::*;
        match (self.state, event) {
            // Nothing has been sent yet, so there is nothing to repeat.
            (Trying, ServerNonInviteEvent::ReceiveRetransmission) => Vec::new(),
            (Proceeding | Completed, ServerNonInviteEvent::ReceiveRetransmission) => self
                .last_response
                .iter()
                .cloned()
                .map(ServerAction::Transmit)
                .collect(),
            (Trying | Proceeding, ServerNonInviteEvent::SendResponse(response))
                if response.is_provisional() =>
            {
                self.state = Proceeding;
                // A late 100 must not replace a more informative provisional.
                let keeps_cached = response.code() == 100
                    && self
                        .last_response
                        .as_ref()
                        .is_some_and(|cached| cached.code() > 100);
                if !keeps_cached {
                    self.last_response = Some(response.clone());
                }
                vec![ServerAction::Transmit(response)]
            }
            (Trying | Proceeding, ServerNonInviteEvent::SendResponse(response)) => {
                self.state = Completed;
                self.last_response = Some(response.clone());
                vec![
                    ServerAction::Transmit(response),
                    ServerAction::Schedule {
                        timer: TransactionTimer::J,
                        duration: self.timers.duration(TransactionTimer::J),
                    },
                ]
            }
            (Completed, ServerNonInviteEvent::TimerFired(TransactionTimer::J)) => {
                self.state = Terminated;
                vec![ServerAction::Terminate {
                    reason: terminate_reason("timer J"),
                }]
            }
            (Terminated, _) => Vec::new(),
            (_, ServerNonInviteEvent::TransportError) => {
                self.state = Terminated;
                vec![
                    ServerAction::Cancel(TransactionTimer::J),
                    ServerAction::TransportFailed,
                    ServerAction::Terminate {
                        reason: terminate_reason("transport error"),
                    },
                ]
            }
            _ => Vec::new(),
        }
    }
}

fn state_name(state: ServerNonInviteState) -> &'static str {
    match state {
        ServerNonInviteState::Trying => "Trying",
        ServerNonInviteState::Proceeding => "Proceeding",
        ServerNonInviteState::Completed => "Completed",
        ServerNonInviteState::Terminated => "Terminated",
    }
}
