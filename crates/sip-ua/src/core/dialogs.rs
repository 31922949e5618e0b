// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session and subscription bookkeeping shared by the method modules.

use sip_core::{Method, Request, Response};
use sip_dialog::{
    is_target_refresh, Dialog, DialogError, DialogId, OfferSide, OutgoingRequestOptions,
    SessionAction, SignalingState, SubscriptionAction, SubscriptionDialogState,
};
use sip_transaction::TransactionKey;
use tracing::{info, warn};

use super::{ClientUser, TimerTarget, UserAgentCore};
use crate::error::CoreError;
use crate::session::SessionHandle;
use crate::subscription::SubscriptionHandle;

impl UserAgentCore {
    pub(crate) fn apply_session_actions(&mut self, id: &DialogId, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Transmit(response) => {
                    let _ = self.send_to_transport(response.into());
                }
                SessionAction::Schedule { timer, duration } => {
                    if self.session(id).is_some() {
                        self.arm(TimerTarget::Session(id.clone(), timer), duration);
                    }
                }
                SessionAction::Cancel(timer) => {
                    self.disarm(&TimerTarget::Session(id.clone(), timer));
                }
                SessionAction::AckTimeout => {
                    let id = id.clone();
                    self.notify(move |core| {
                        core.with_session_delegate(&id, |delegate, core| {
                            delegate.on_ack_timeout(core, SessionHandle::new(id.clone()));
                        });
                    });
                }
            }
        }
    }

    /// Closes a session: timers go now, the entry goes after its
    /// `on_terminated` callback has run.
    pub(crate) fn terminate_session(&mut self, id: &DialogId) {
        let Some(entry) = self.sessions.get_mut(id) else {
            return;
        };
        if entry.session.signaling_state() == SignalingState::Closed {
            return;
        }
        let actions = entry.session.close();
        self.apply_session_actions(id, actions);
        self.disarm_where(|target| matches!(target, TimerTarget::Session(owner, _) if owner == id));
        info!(dialog = %id, "session terminated");
        let id = id.clone();
        self.notify(move |core| {
            core.with_session_delegate(&id, |delegate, core| delegate.on_terminated(core, &id));
            core.sessions.remove(&id);
        });
    }

    pub(crate) fn apply_subscription_actions(
        &mut self,
        id: &DialogId,
        actions: Vec<SubscriptionAction>,
    ) {
        for action in actions {
            match action {
                SubscriptionAction::Schedule { timer, duration } => {
                    if self.subscription(id).is_some() {
                        self.arm(TimerTarget::Subscription(id.clone(), timer), duration);
                    }
                }
                SubscriptionAction::Cancel(timer) => {
                    self.disarm(&TimerTarget::Subscription(id.clone(), timer));
                }
                SubscriptionAction::Refresh => {
                    if let Err(err) = self.refresh_subscription(id) {
                        warn!(dialog = %id, %err, "automatic refresh failed");
                    }
                }
                SubscriptionAction::StateChanged(state) => {
                    let changed = id.clone();
                    self.notify(move |core| {
                        core.with_subscription_delegate(&changed, |delegate, core| {
                            delegate.on_state_changed(
                                core,
                                SubscriptionHandle::new(changed.clone()),
                                state,
                            );
                        });
                    });
                    if state == SubscriptionDialogState::Terminated {
                        self.finish_subscription(id);
                    }
                }
            }
        }
    }

    fn finish_subscription(&mut self, id: &DialogId) {
        self.disarm_where(
            |target| matches!(target, TimerTarget::Subscription(owner, _) if owner == id),
        );
        info!(dialog = %id, "subscription terminated");
        let id = id.clone();
        self.notify(move |core| {
            core.with_subscription_delegate(&id, |delegate, core| {
                delegate.on_terminated(core, &id)
            });
            core.subscriptions.remove(&id);
        });
    }

    /// Ends a subscription locally, without signaling.
    pub(crate) fn terminate_subscription(&mut self, id: &DialogId) {
        let Some(entry) = self.subscriptions.get_mut(id) else {
            return;
        };
        let actions = entry.subscription.terminate();
        self.apply_subscription_actions(id, actions);
    }

    /// Ends whichever usage `id` names.
    pub(crate) fn terminate_dialog(&mut self, id: &DialogId) {
        if self.sessions.contains_key(id) {
            self.terminate_session(id);
        } else {
            self.terminate_subscription(id);
        }
    }

    pub(crate) fn rollback_session(&mut self, id: &DialogId) {
        if let Some(entry) = self.sessions.get_mut(id) {
            entry.session.rollback_offer();
        }
    }

    /// The live dialog behind a session or subscription.
    pub(crate) fn dialog_mut(&mut self, id: &DialogId) -> Result<&mut Dialog, CoreError> {
        let dialog = if let Some(entry) = self.sessions.get_mut(id) {
            &mut entry.session.dialog
        } else if let Some(entry) = self.subscriptions.get_mut(id) {
            &mut entry.subscription.dialog
        } else {
            return Err(CoreError::UnknownDialog(id.clone()));
        };
        if dialog.is_terminated() {
            return Err(DialogError::Terminated.into());
        }
        Ok(dialog)
    }

    /// Builds an in-dialog request; target refresh requests advertise our
    /// Contact.
    pub(crate) fn make_in_dialog_request(
        &mut self,
        id: &DialogId,
        method: Method,
        mut options: OutgoingRequestOptions,
    ) -> Result<Request, CoreError> {
        if is_target_refresh(&method) && options.contact.is_none() {
            options.contact = Some(self.resolved.contact.clone());
        }
        let invite = method == Method::Invite;
        let mut request = self.dialog_mut(id)?.create_outgoing_request(method, options);
        request
            .headers
            .push("Max-Forwards", self.config.max_forwards.to_string());
        if invite {
            request.headers.push("Allow", self.config.allow_header());
        }
        self.decorate_request(&mut request.headers);
        Ok(request)
    }

    /// Sends an in-dialog request through a new client transaction.
    pub(crate) fn send_in_dialog(
        &mut self,
        id: &DialogId,
        method: Method,
        options: OutgoingRequestOptions,
        user: ClientUser,
    ) -> Result<TransactionKey, CoreError> {
        let request = self.make_in_dialog_request(id, method, options)?;
        self.send_request(request, user)
    }

    /// Final response to an UPDATE we sent.
    pub(crate) fn update_response(&mut self, id: &DialogId, response: &Response) {
        if response.is_provisional() {
            return;
        }
        let Some(entry) = self.sessions.get_mut(id) else {
            return;
        };
        if response.is_success() {
            entry.session.dialog.receive_target_refresh_response(response);
            if let Err(err) = entry
                .session
                .signaling_transition(response.body().as_ref(), OfferSide::Remote)
            {
                warn!(dialog = %id, %err, "ignoring UPDATE answer");
            }
        } else {
            entry.session.rollback_offer();
        }
    }
}
