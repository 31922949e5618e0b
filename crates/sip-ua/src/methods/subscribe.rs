// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SUBSCRIBE on both sides, and the subscriber's refresh cycle.

use sip_core::{EventHeader, HeaderAccess, Method, Request, Response};
use sip_dialog::{
    Dialog, DialogId, OutgoingRequestOptions, SubscriptionAction, SubscriptionDialog,
    SubscriptionTimer,
};
use sip_transaction::TransactionKey;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use super::deref_to_server;
use crate::core::{
    ClientUser, PendingSubscribe, RequestClient, RequestRole, SubscriptionEntry, TimerTarget,
    UserAgentCore,
};
use crate::delegate::{DefaultSubscriptionDelegate, SubscriptionDelegate};
use crate::error::CoreError;
use crate::subscription::SubscriptionHandle;
use crate::uac::UserAgentClient;
use crate::uas::{ResponseOptions, UserAgentServer};

fn expires_header(message: &impl HeaderAccess) -> Option<u32> {
    message
        .header("Expires")
        .and_then(|value| value.trim().parse().ok())
}

/// Sends an initial SUBSCRIBE (RFC 6665 §4.1.2.1).
///
/// The subscription exists once a 2xx or the first NOTIFY arrives,
/// whichever comes first; until then Timer N bounds the wait.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscribeUac {
    uac: UserAgentClient,
}

impl SubscribeUac {
    /// `request` must carry an Event header; a missing Expires is filled in
    /// from the configuration. With `auto_refresh` the subscription is
    /// refreshed at 90% of every granted duration.
    pub fn send(
        core: &mut UserAgentCore,
        mut request: Request,
        delegate: Box<dyn SubscriptionDelegate>,
        auto_refresh: bool,
    ) -> Result<Self, CoreError> {
        if request.method() != &Method::Subscribe {
            return Err(CoreError::MalformedRequest("method"));
        }
        let event = request
            .header("Event")
            .and_then(EventHeader::parse)
            .ok_or(CoreError::MalformedRequest("Event"))?;
        let expires = match expires_header(&request) {
            Some(expires) => expires,
            None => {
                let expires = core.config.subscribe_expires;
                request.headers.push("Expires", expires.to_string());
                expires
            }
        };
        core.prepare_request(&mut request);
        let key = TransactionKey::from_request(&request, false)
            .ok_or(CoreError::MalformedRequest("Via branch"))?;

        let sent_at = core.now();
        core.pending_subscribes.insert(
            key.clone(),
            PendingSubscribe {
                request: request.clone(),
                event,
                delegate: Some(delegate),
                auto_refresh,
                expires,
                sent_at,
                dialog: None,
            },
        );
        core.arm(
            TimerTarget::SubscribeWait(key.clone()),
            core.resolved.timers.timer_n(),
        );
        let user = ClientUser::Request(RequestClient {
            delegate: None,
            dialog: None,
            role: RequestRole::Subscribe,
        });
        let result = core.start_client_transaction(request, user);
        if result.is_err() {
            core.pending_subscribes.remove(&key);
            core.disarm(&TimerTarget::SubscribeWait(key));
        }
        core.drain();
        result.map(|key| Self {
            uac: UserAgentClient::new(key),
        })
    }

    pub fn key(&self) -> &TransactionKey {
        self.uac.key()
    }

    /// True until a final response, a NOTIFY or Timer N settles the
    /// SUBSCRIBE.
    pub fn is_pending(&self, core: &UserAgentCore) -> bool {
        core.pending_subscribes
            .get(self.uac.key())
            .is_some_and(|pending| pending.dialog.is_none())
    }
}

/// An out-of-dialog SUBSCRIBE; we are the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscribeUas {
    uas: UserAgentServer,
}

deref_to_server!(SubscribeUas);

impl SubscribeUas {
    pub(crate) fn new(uas: UserAgentServer) -> Self {
        Self { uas }
    }

    pub fn event(&self, core: &UserAgentCore) -> Option<EventHeader> {
        self.uas
            .request(core)?
            .header("Event")
            .and_then(EventHeader::parse)
    }

    /// The duration the subscriber asked for.
    pub fn requested_expires(&self, core: &UserAgentCore) -> Option<u32> {
        self.uas.request(core).and_then(expires_header)
    }

    /// 200 granting at most `max_expires` seconds. The subscription starts
    /// without state; the first NOTIFY sent through the returned handle
    /// sets it.
    pub fn accept(
        &self,
        core: &mut UserAgentCore,
        max_expires: u32,
        delegate: Box<dyn SubscriptionDelegate>,
    ) -> Result<SubscriptionHandle, CoreError> {
        let key = self.uas.key();
        let entry = core
            .live_server(key)
            .ok_or_else(|| CoreError::UnknownTransaction(key.clone()))?;
        let request = entry.request.clone();
        let event = request
            .header("Event")
            .and_then(EventHeader::parse)
            .ok_or(CoreError::MalformedRequest("Event"))?;
        let requested = expires_header(&request).unwrap_or(core.config.subscribe_expires);
        let granted = requested.min(max_expires);
        let dialog = Dialog::new_uas(&request, &entry.local_tag, false)?;
        let id = dialog.id.clone();

        let options = ResponseOptions::default()
            .with_header("Expires", granted.to_string())
            .with_header("Contact", core.resolved.contact.to_string());
        self.uas.accept(core, options)?;

        let now = core.now();
        let mut subscription = SubscriptionDialog::new(dialog, event, core.resolved.timers);
        let actions = subscription.set_subscription_expires(granted, now);
        info!(dialog = %id, expires = granted, "subscription accepted");
        core.subscriptions.insert(
            id.clone(),
            SubscriptionEntry {
                subscription,
                delegate: Some(delegate),
                expires: granted,
                notifier: true,
            },
        );
        core.apply_subscription_actions(&id, actions);
        core.drain();
        Ok(SubscriptionHandle::new(id))
    }
}

impl UserAgentCore {
    /// Response to an initial SUBSCRIBE.
    pub(crate) fn subscribe_response(&mut self, key: &TransactionKey, response: &Response) {
        if response.is_provisional() {
            return;
        }
        if !response.is_success() {
            self.subscribe_failed(key, Some(response.clone()));
            return;
        }
        let Some(id) = DialogId::from_uac_response(response) else {
            warn!(%key, "2xx to SUBSCRIBE without To tag");
            self.subscribe_failed(key, Some(response.clone()));
            return;
        };
        self.disarm(&TimerTarget::SubscribeWait(key.clone()));
        let Some(mut pending) = self.pending_subscribes.remove(key) else {
            return;
        };
        let granted = expires_header(response).unwrap_or(pending.expires);
        let now = self.now();

        let mut actions = Vec::new();
        if pending.dialog.as_ref() != Some(&id) || !self.subscriptions.contains_key(&id) {
            let dialog = match Dialog::new_uac(&pending.request, response) {
                Ok(dialog) => dialog,
                Err(err) => {
                    warn!(%key, %err, "2xx cannot form a subscription");
                    return;
                }
            };
            let mut subscription =
                SubscriptionDialog::new(dialog, pending.event.clone(), self.resolved.timers);
            subscription.set_auto_refresh(pending.auto_refresh);
            // Timer N keeps the deadline it got when the SUBSCRIBE was sent.
            let remaining = self
                .resolved
                .timers
                .timer_n()
                .saturating_sub(now.saturating_duration_since(pending.sent_at));
            actions.extend(subscription.start().into_iter().map(|action| match action {
                SubscriptionAction::Schedule {
                    timer: SubscriptionTimer::N,
                    ..
                } => SubscriptionAction::Schedule {
                    timer: SubscriptionTimer::N,
                    duration: remaining,
                },
                action => action,
            }));
            let delegate = pending
                .delegate
                .take()
                .unwrap_or_else(|| Box::new(DefaultSubscriptionDelegate));
            self.subscriptions.insert(
                id.clone(),
                SubscriptionEntry {
                    subscription,
                    delegate: Some(delegate),
                    expires: pending.expires,
                    notifier: false,
                },
            );
            debug!(dialog = %id, "subscription created by 2xx");
        }
        if let Some(entry) = self.subscriptions.get_mut(&id) {
            actions.extend(entry.subscription.set_subscription_expires(granted, now));
        }
        let response = response.clone();
        let accepted = id.clone();
        self.notify(move |core| {
            core.with_subscription_delegate(&accepted, |delegate, core| {
                delegate.on_accept(core, SubscriptionHandle::new(accepted.clone()), &response)
            });
        });
        self.apply_subscription_actions(&id, actions);
    }

    /// The initial SUBSCRIBE failed or timed out.
    pub(crate) fn subscribe_failed(&mut self, key: &TransactionKey, response: Option<Response>) {
        self.disarm(&TimerTarget::SubscribeWait(key.clone()));
        let Some(pending) = self.pending_subscribes.remove(key) else {
            return;
        };
        if let Some(id) = &pending.dialog {
            self.terminate_subscription(id);
        }
        if let Some(mut delegate) = pending.delegate {
            info!(%key, code = response.as_ref().map(Response::code), "subscribe failed");
            self.notify(move |core| match &response {
                Some(response) => delegate.on_reject(core, response),
                None => delegate.on_timeout(core),
            });
        }
    }

    /// Timer N for an initial SUBSCRIBE that never produced a dialog.
    pub(crate) fn subscribe_wait_expired(&mut self, key: &TransactionKey) {
        let created = self
            .pending_subscribes
            .get(key)
            .is_some_and(|pending| pending.dialog.is_some());
        if !created {
            info!(%key, "timer N expired before any response or NOTIFY");
            self.subscribe_failed(key, None);
        }
    }

    /// Final response to a re-SUBSCRIBE or unsubscribe.
    pub(crate) fn resubscribe_response(&mut self, id: &DialogId, response: &Response) {
        if response.is_provisional() {
            return;
        }
        let now = self.now();
        let Some(entry) = self.subscriptions.get_mut(id) else {
            return;
        };
        if response.is_success() {
            entry.subscription.dialog.receive_target_refresh_response(response);
        }
        let actions = entry.subscription.on_refresh_response(response, now);
        self.apply_subscription_actions(id, actions);
    }

    /// Sends a re-SUBSCRIBE asking for the subscription's usual duration.
    pub(crate) fn refresh_subscription(&mut self, id: &DialogId) -> Result<TransactionKey, CoreError> {
        let entry = self
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownDialog(id.clone()))?;
        let actions = entry.subscription.subscribe()?;
        let expires = entry.expires;
        self.apply_subscription_actions(id, actions);
        self.send_subscribe(id, expires)
    }

    pub(crate) fn send_subscribe(
        &mut self,
        id: &DialogId,
        expires: u32,
    ) -> Result<TransactionKey, CoreError> {
        let event = self
            .subscriptions
            .get(id)
            .map(|entry| entry.subscription.event.to_string())
            .ok_or_else(|| CoreError::UnknownDialog(id.clone()))?;
        let options = OutgoingRequestOptions {
            extra_headers: vec![
                (SmolStr::new("Event"), SmolStr::new(event)),
                (SmolStr::new("Expires"), SmolStr::new(expires.to_string())),
            ],
            ..Default::default()
        };
        let user = ClientUser::Request(RequestClient {
            delegate: None,
            dialog: Some(id.clone()),
            role: RequestRole::Resubscribe,
        });
        debug!(dialog = %id, expires, "re-SUBSCRIBE");
        self.send_in_dialog(id, Method::Subscribe, options, user)
    }
}
