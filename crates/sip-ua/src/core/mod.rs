// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The User Agent Core: owner of every transaction, session and
//! subscription, and the router between them.
//!
//! The core is single-threaded and sans-IO. Three entry points move it
//! forward: [`UserAgentCore::receive_message`] for inbound messages,
//! [`UserAgentCore::poll_timers`] when the clock passes
//! [`UserAgentCore::next_timer_deadline`], and the operations on the
//! handle types (UAC/UAS, sessions, subscriptions), which all take the
//! core by `&mut`.
//!
//! Application delegates never run in the middle of a state change. Each
//! entry point queues its notifications and drains the queue before
//! returning, so a callback sees consistent tables and may call back into
//! the core.

mod client;
mod dialogs;
mod inbound;
mod server;
mod timers;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use sip_core::{EventHeader, Request, SipMessage};
use sip_dialog::{DialogId, SessionDialog, SubscriptionDialog};
use sip_transaction::fsm::{ClientInviteFsm, ClientNonInviteFsm, ServerInviteFsm, ServerNonInviteFsm};
use sip_transaction::{TransactionKey, TransportAwareTimers};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::config::{ResolvedConfig, UserAgentCoreConfig};
use crate::delegate::{
    DefaultSessionDelegate, InviteClientDelegate, OutgoingRequestDelegate, SessionDelegate,
    SubscriptionDelegate, UserAgentCoreDelegate,
};
use crate::error::{CoreError, TransportError};
use crate::timer::{Clock, SystemClock, TimerQueue, TimerToken};
use crate::transport::Transport;

pub(crate) use client::Outcome;
pub(crate) use timers::TimerTarget;

pub(crate) type Notification = Box<dyn FnOnce(&mut UserAgentCore) + Send>;

pub(crate) enum ClientFsm {
    Invite(ClientInviteFsm),
    NonInvite(ClientNonInviteFsm),
}

/// What a client transaction's responses mean to the core.
pub(crate) enum ClientUser {
    Invite(InviteClient),
    Request(RequestClient),
    /// Lent out to a running notification.
    Detached,
}

pub(crate) struct InviteClient {
    pub delegate: Option<Box<dyn InviteClientDelegate>>,
    /// Set for a re-INVITE inside this session.
    pub reinvite: Option<DialogId>,
    /// Sessions created by tagged provisionals to this INVITE.
    pub early: Vec<DialogId>,
    /// Headers for the CANCEL (Reason), if one was asked for.
    pub cancel_headers: Vec<(SmolStr, SmolStr)>,
}

pub(crate) struct RequestClient {
    pub delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    /// The dialog an in-dialog request belongs to.
    pub dialog: Option<DialogId>,
    pub role: RequestRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestRole {
    Plain,
    Update,
    Subscribe,
    Resubscribe,
}

pub(crate) struct ClientEntry {
    pub fsm: ClientFsm,
    pub request: Request,
    pub user: ClientUser,
    pub terminated: bool,
}

pub(crate) enum ServerFsm {
    Invite(ServerInviteFsm),
    NonInvite(ServerNonInviteFsm),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServerRole {
    Invite,
    ReInvite,
    Update,
    Plain,
}

pub(crate) struct ServerEntry {
    pub fsm: ServerFsm,
    pub request: Request,
    /// To tag used on every non-100 response.
    pub local_tag: SmolStr,
    pub dialog: Option<DialogId>,
    pub role: ServerRole,
    pub terminated: bool,
}

pub(crate) struct SessionEntry {
    pub session: SessionDialog,
    /// `None` only while lent out to a callback.
    pub delegate: Option<Box<dyn SessionDelegate>>,
}

impl SessionEntry {
    pub fn new(session: SessionDialog) -> Self {
        Self {
            session,
            delegate: Some(Box::new(DefaultSessionDelegate)),
        }
    }
}

pub(crate) struct SubscriptionEntry {
    pub subscription: SubscriptionDialog,
    pub delegate: Option<Box<dyn SubscriptionDelegate>>,
    /// Expires asked for on refresh.
    pub expires: u32,
    pub notifier: bool,
}

/// An initial SUBSCRIBE waiting for its 2xx or first NOTIFY.
pub(crate) struct PendingSubscribe {
    pub request: Request,
    pub event: EventHeader,
    pub delegate: Option<Box<dyn SubscriptionDelegate>>,
    pub auto_refresh: bool,
    pub expires: u32,
    /// When the SUBSCRIBE went out; Timer N runs from here.
    pub sent_at: Instant,
    /// Set once a response or NOTIFY created the dialog.
    pub dialog: Option<DialogId>,
}

/// See the [module documentation](self).
pub struct UserAgentCore {
    pub(crate) config: UserAgentCoreConfig,
    pub(crate) resolved: ResolvedConfig,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    delegate: Option<Box<dyn UserAgentCoreDelegate>>,
    pub(crate) clients: HashMap<TransactionKey, ClientEntry>,
    pub(crate) servers: HashMap<TransactionKey, ServerEntry>,
    pub(crate) sessions: HashMap<DialogId, SessionEntry>,
    pub(crate) subscriptions: HashMap<DialogId, SubscriptionEntry>,
    pub(crate) pending_subscribes: HashMap<TransactionKey, PendingSubscribe>,
    timers: TimerQueue<TimerTarget>,
    armed: HashMap<TimerTarget, TimerToken>,
    notifications: VecDeque<Notification>,
    draining: bool,
}

impl UserAgentCore {
    pub fn new(
        config: UserAgentCoreConfig,
        transport: Box<dyn Transport>,
        delegate: Box<dyn UserAgentCoreDelegate>,
    ) -> Result<Self, CoreError> {
        Self::with_clock(config, transport, delegate, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: UserAgentCoreConfig,
        transport: Box<dyn Transport>,
        delegate: Box<dyn UserAgentCoreDelegate>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        let resolved = config.resolve()?;
        info!(
            aor = %resolved.aor,
            transport = resolved.transport.as_str(),
            "user agent core started"
        );
        Ok(Self {
            config,
            resolved,
            transport,
            clock,
            delegate: Some(delegate),
            clients: HashMap::new(),
            servers: HashMap::new(),
            sessions: HashMap::new(),
            subscriptions: HashMap::new(),
            pending_subscribes: HashMap::new(),
            timers: TimerQueue::new(),
            armed: HashMap::new(),
            notifications: VecDeque::new(),
            draining: false,
        })
    }

    pub fn config(&self) -> &UserAgentCoreConfig {
        &self.config
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// A live session (not yet terminated).
    pub fn session(&self, id: &DialogId) -> Option<&SessionDialog> {
        self.sessions
            .get(id)
            .map(|entry| &entry.session)
            .filter(|session| !session.dialog.is_terminated())
    }

    /// A live subscription (not yet terminated).
    pub fn subscription(&self, id: &DialogId) -> Option<&SubscriptionDialog> {
        self.subscriptions
            .get(id)
            .map(|entry| &entry.subscription)
            .filter(|subscription| !subscription.dialog.is_terminated())
    }

    pub fn session_ids(&self) -> Vec<DialogId> {
        self.sessions
            .iter()
            .filter(|(_, entry)| !entry.session.dialog.is_terminated())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn subscription_ids(&self) -> Vec<DialogId> {
        self.subscriptions
            .iter()
            .filter(|(_, entry)| !entry.subscription.dialog.is_terminated())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn client_transaction_count(&self) -> usize {
        self.clients.len()
    }

    pub fn server_transaction_count(&self) -> usize {
        self.servers.len()
    }

    /// Ends every session and subscription without signaling and drops all
    /// transactions and timers.
    pub fn dispose(&mut self) {
        info!("user agent core disposed");
        let sessions: Vec<DialogId> = self.sessions.keys().cloned().collect();
        for id in sessions {
            self.terminate_session(&id);
        }
        let subscriptions: Vec<DialogId> = self.subscriptions.keys().cloned().collect();
        for id in subscriptions {
            self.terminate_subscription(&id);
        }
        self.drain();
        self.clients.clear();
        self.servers.clear();
        self.pending_subscribes.clear();
        self.clear_timers();
    }

    pub(crate) fn transaction_timers(&self) -> TransportAwareTimers {
        TransportAwareTimers::with_defaults(self.resolved.transport, self.resolved.timers)
    }

    pub(crate) fn send_to_transport(&mut self, message: SipMessage) -> Result<(), TransportError> {
        let result = self.transport.send(&message);
        if let Err(err) = &result {
            warn!(%err, "transport send failed");
        }
        result
    }

    /// Queues a callback for the end of the current entry point.
    pub(crate) fn notify(&mut self, notification: impl FnOnce(&mut UserAgentCore) + Send + 'static) {
        self.notifications.push_back(Box::new(notification));
    }

    /// Runs queued callbacks, including any they queue in turn. A no-op
    /// when already draining.
    pub(crate) fn drain(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        while let Some(notification) = self.notifications.pop_front() {
            notification(self);
        }
        self.draining = false;
    }

    pub(crate) fn with_core_delegate(
        &mut self,
        f: impl FnOnce(&mut dyn UserAgentCoreDelegate, &mut UserAgentCore),
    ) {
        let Some(mut delegate) = self.delegate.take() else {
            debug!("core delegate busy");
            return;
        };
        f(delegate.as_mut(), self);
        self.delegate = Some(delegate);
    }

    pub(crate) fn with_session_delegate(
        &mut self,
        id: &DialogId,
        f: impl FnOnce(&mut dyn SessionDelegate, &mut UserAgentCore),
    ) {
        let Some(mut delegate) = self
            .sessions
            .get_mut(id)
            .and_then(|entry| entry.delegate.take())
        else {
            return;
        };
        f(delegate.as_mut(), self);
        // A delegate installed during the callback wins.
        if let Some(entry) = self.sessions.get_mut(id) {
            entry.delegate.get_or_insert(delegate);
        }
    }

    pub(crate) fn with_subscription_delegate(
        &mut self,
        id: &DialogId,
        f: impl FnOnce(&mut dyn SubscriptionDelegate, &mut UserAgentCore),
    ) {
        let Some(mut delegate) = self
            .subscriptions
            .get_mut(id)
            .and_then(|entry| entry.delegate.take())
        else {
            return;
        };
        f(delegate.as_mut(), self);
        if let Some(entry) = self.subscriptions.get_mut(id) {
            entry.delegate.get_or_insert(delegate);
        }
    }

    /// Lends a client transaction's user to `f`, putting it back afterwards
    /// if the transaction still exists.
    pub(crate) fn with_client_user(
        &mut self,
        key: &TransactionKey,
        f: impl FnOnce(&mut ClientUser, &mut UserAgentCore),
    ) {
        let Some(mut user) = self
            .clients
            .get_mut(key)
            .map(|entry| std::mem::replace(&mut entry.user, ClientUser::Detached))
        else {
            return;
        };
        f(&mut user, self);
        if let Some(entry) = self.clients.get_mut(key) {
            entry.user = user;
        }
    }
}
