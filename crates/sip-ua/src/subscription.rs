// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Handle to an event subscription, from either side.

use sip_core::{Body, Method, SubscriptionState, SubscriptionStateHeader};
use sip_dialog::{DialogId, OutgoingRequestOptions, SubscriptionDialogState};
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::core::{ClientUser, RequestClient, RequestRole, SubscriptionEntry, UserAgentCore};
use crate::delegate::SubscriptionDelegate;
use crate::error::CoreError;
use crate::uac::UserAgentClient;

/// Names one subscription held by a [`UserAgentCore`].
///
/// Subscriber operations (`refresh`, `unsubscribe`) and notifier
/// operations (`notify`, `terminate_with_notify`) fail with
/// [`CoreError::InvalidState`] on the wrong side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: DialogId,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: DialogId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &DialogId {
        &self.id
    }

    pub fn state(&self, core: &UserAgentCore) -> Option<SubscriptionDialogState> {
        core.subscription(&self.id).map(|subscription| subscription.state())
    }

    /// Seconds until the subscription runs out.
    pub fn expires(&self, core: &UserAgentCore) -> Option<u32> {
        let now = core.now();
        core.subscription(&self.id)
            .map(|subscription| subscription.subscription_expires(now))
    }

    pub fn is_notifier(&self, core: &UserAgentCore) -> bool {
        core.subscriptions
            .get(&self.id)
            .is_some_and(|entry| entry.notifier)
    }

    pub fn set_delegate(
        &self,
        core: &mut UserAgentCore,
        delegate: Box<dyn SubscriptionDelegate>,
    ) -> Result<(), CoreError> {
        self.entry_mut(core)?.delegate = Some(delegate);
        Ok(())
    }

    /// Re-SUBSCRIBE for the usual duration.
    pub fn refresh(&self, core: &mut UserAgentCore) -> Result<UserAgentClient, CoreError> {
        self.side(core, false, "refresh")?;
        let result = core.refresh_subscription(&self.id);
        core.drain();
        result.map(UserAgentClient::new)
    }

    /// SUBSCRIBE with Expires 0. The subscription ends with the notifier's
    /// final NOTIFY, or when Timer N runs out.
    pub fn unsubscribe(&self, core: &mut UserAgentCore) -> Result<UserAgentClient, CoreError> {
        self.side(core, false, "unsubscribe")?;
        let actions = self.entry_mut(core)?.subscription.unsubscribe()?;
        core.apply_subscription_actions(&self.id, actions);
        info!(dialog = %self.id, "unsubscribing");
        let result = core.send_subscribe(&self.id, 0);
        core.drain();
        result.map(UserAgentClient::new)
    }

    /// Sends a NOTIFY carrying `state`. The remaining duration is added as
    /// `expires` unless `state` has one or is terminated. The subscription
    /// follows the state once the NOTIFY is on its way.
    pub fn notify(
        &self,
        core: &mut UserAgentCore,
        mut state: SubscriptionStateHeader,
        body: Option<Body>,
    ) -> Result<UserAgentClient, CoreError> {
        self.side(core, true, "notify")?;
        let now = core.now();
        let (event, remaining) = {
            let entry = self.entry_mut(core)?;
            (
                entry.subscription.event.to_string(),
                entry.subscription.subscription_expires(now),
            )
        };
        if state.state != SubscriptionState::Terminated && state.expires().is_none() {
            state = state.with_param("expires", remaining);
        }
        let options = OutgoingRequestOptions {
            extra_headers: vec![
                (SmolStr::new("Event"), SmolStr::new(event)),
                (
                    SmolStr::new("Subscription-State"),
                    SmolStr::new(state.to_string()),
                ),
            ],
            body,
            ..Default::default()
        };
        let user = ClientUser::Request(RequestClient {
            delegate: None,
            dialog: Some(self.id.clone()),
            role: RequestRole::Plain,
        });
        debug!(dialog = %self.id, state = %state, "NOTIFY");
        let key = core.send_in_dialog(&self.id, Method::Notify, options, user);
        if key.is_ok() {
            if let Some(entry) = core.subscriptions.get_mut(&self.id) {
                let actions = entry.subscription.record_sent_notify(&state, now);
                core.apply_subscription_actions(&self.id, actions);
            }
        }
        core.drain();
        key.map(UserAgentClient::new)
    }

    /// Final NOTIFY with `Subscription-State: terminated;reason=<reason>`.
    pub fn terminate_with_notify(
        &self,
        core: &mut UserAgentCore,
        reason: &str,
        body: Option<Body>,
    ) -> Result<UserAgentClient, CoreError> {
        let state =
            SubscriptionStateHeader::new(SubscriptionState::Terminated).with_param("reason", reason);
        self.notify(core, state, body)
    }

    /// Ends the subscription locally without signaling.
    pub fn terminate(&self, core: &mut UserAgentCore) {
        core.terminate_subscription(&self.id);
        core.drain();
    }

    fn entry_mut<'c>(&self, core: &'c mut UserAgentCore) -> Result<&'c mut SubscriptionEntry, CoreError> {
        core.subscriptions
            .get_mut(&self.id)
            .filter(|entry| !entry.subscription.dialog.is_terminated())
            .ok_or_else(|| CoreError::UnknownDialog(self.id.clone()))
    }

    fn side(
        &self,
        core: &UserAgentCore,
        notifier: bool,
        operation: &'static str,
    ) -> Result<(), CoreError> {
        let entry = core
            .subscriptions
            .get(&self.id)
            .filter(|entry| !entry.subscription.dialog.is_terminated())
            .ok_or_else(|| CoreError::UnknownDialog(self.id.clone()))?;
        if entry.notifier == notifier {
            Ok(())
        } else {
            Err(CoreError::InvalidState {
                operation,
                state: if entry.notifier { "notifier" } else { "subscriber" },
            })
        }
    }
}
