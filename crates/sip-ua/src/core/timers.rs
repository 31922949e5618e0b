// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::time::{Duration, Instant};

use sip_dialog::{DialogId, SessionTimer, SubscriptionTimer};
use sip_transaction::{TransactionKey, TransactionTimer};
use tracing::trace;

use super::client::ClientEvent;
use super::server::ServerEvent;
use super::UserAgentCore;

/// Owner and name of an armed timer. At most one token is armed per
/// target; arming again replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TimerTarget {
    Client(TransactionKey, TransactionTimer),
    Server(TransactionKey, TransactionTimer),
    Session(DialogId, SessionTimer),
    Subscription(DialogId, SubscriptionTimer),
    /// Timer N for an initial SUBSCRIBE that has no dialog yet.
    SubscribeWait(TransactionKey),
}

impl UserAgentCore {
    pub(crate) fn arm(&mut self, target: TimerTarget, duration: Duration) {
        self.disarm(&target);
        let at = self.now() + duration;
        trace!(?target, ?duration, "timer armed");
        let token = self.timers.schedule(at, target.clone());
        self.armed.insert(target, token);
    }

    pub(crate) fn disarm(&mut self, target: &TimerTarget) {
        if let Some(token) = self.armed.remove(target) {
            self.timers.cancel(token);
        }
    }

    pub(crate) fn disarm_where(&mut self, predicate: impl Fn(&TimerTarget) -> bool) {
        let targets: Vec<TimerTarget> = self
            .armed
            .keys()
            .filter(|target| predicate(target))
            .cloned()
            .collect();
        for target in targets {
            self.disarm(&target);
        }
    }

    pub(crate) fn clear_timers(&mut self) {
        self.disarm_where(|_| true);
    }

    /// When [`poll_timers`](Self::poll_timers) next has work to do.
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn armed_timer_count(&self) -> usize {
        self.armed.len()
    }

    /// Fires every timer due by the clock's current time, including ones
    /// armed with zero delay while firing.
    pub fn poll_timers(&mut self) {
        loop {
            let now = self.now();
            let due = self.timers.pop_expired(now);
            if due.is_empty() {
                break;
            }
            for (token, target) in due {
                if self.armed.get(&target) != Some(&token) {
                    continue;
                }
                self.armed.remove(&target);
                self.fire(target);
            }
        }
        self.drain();
    }

    fn fire(&mut self, target: TimerTarget) {
        trace!(?target, "timer fired");
        match target {
            TimerTarget::Client(key, timer) => {
                let actions = self.client_event(&key, ClientEvent::Timer(timer));
                self.process_client_actions(&key, actions);
            }
            TimerTarget::Server(key, timer) => {
                let actions = self.server_event(&key, ServerEvent::Timer(timer));
                self.process_server_actions(&key, actions);
            }
            TimerTarget::Session(id, timer) => {
                let Some(entry) = self.sessions.get_mut(&id) else {
                    return;
                };
                let actions = entry.session.on_timer(timer);
                self.apply_session_actions(&id, actions);
            }
            TimerTarget::Subscription(id, timer) => {
                let Some(entry) = self.subscriptions.get_mut(&id) else {
                    return;
                };
                let actions = entry.subscription.on_timer(timer);
                self.apply_subscription_actions(&id, actions);
            }
            TimerTarget::SubscribeWait(key) => self.subscribe_wait_expired(&key),
        }
    }
}
