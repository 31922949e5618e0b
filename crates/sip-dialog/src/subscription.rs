// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SUBSCRIBE/NOTIFY usage of a dialog (RFC 6665 §4.1.2 and §4.2.2).

use std::time::{Duration, Instant};

use sip_core::{
    EventHeader, HeaderAccess, Request, Response, SubscriptionState, SubscriptionStateHeader,
};
use sip_transaction::TimerDefaults;
use tracing::{debug, info, warn};

use crate::{Dialog, DialogError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionDialogState {
    Initial,
    NotifyWait,
    Pending,
    Active,
    Terminated,
}

impl SubscriptionDialogState {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionDialogState::Initial => "Initial",
            SubscriptionDialogState::NotifyWait => "NotifyWait",
            SubscriptionDialogState::Pending => "Pending",
            SubscriptionDialogState::Active => "Active",
            SubscriptionDialogState::Terminated => "Terminated",
        }
    }

    /// Legal lifecycle edges. Staying in the same state is always allowed
    /// (except once terminated) and changes nothing.
    fn can_move_to(self, next: SubscriptionDialogState) -> bool {
        use SubscriptionDialogState::*;
        match (self, next) {
            (Terminated, _) => false,
            (Initial, NotifyWait | Pending | Active | Terminated) => true,
            (NotifyWait, Pending | Active | Terminated) => true,
            (Pending, Active | Terminated) => true,
            (Active, Terminated) => true,
            (current, next) => current == next,
        }
    }
}

/// Timers owned by a subscription usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionTimer {
    /// RFC 6665 Timer N: waiting for a NOTIFY.
    N,
    /// Auto-refresh point at 90% of the granted duration.
    Refresh,
    /// The subscription runs out.
    Expiration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionAction {
    Schedule {
        timer: SubscriptionTimer,
        duration: Duration,
    },
    Cancel(SubscriptionTimer),
    /// Time to send a re-SUBSCRIBE.
    Refresh,
    StateChanged(SubscriptionDialogState),
}

/// Response codes to a refreshing SUBSCRIBE that end the subscription
/// (RFC 6665 §4.1.2.2).
fn refresh_failure_terminates(code: u16) -> bool {
    matches!(code, 404 | 405 | 410 | 416 | 480..=485 | 489 | 501 | 604)
}

#[derive(Debug, Clone, Copy)]
struct Expiry {
    seconds: u32,
    set_at: Instant,
}

/// A dialog carrying one subscription, on either the subscriber or the
/// notifier side.
#[derive(Debug)]
pub struct SubscriptionDialog {
    pub dialog: Dialog,
    pub event: EventHeader,
    state: SubscriptionDialogState,
    timers: TimerDefaults,
    auto_refresh: bool,
    expiry: Option<Expiry>,
}

impl SubscriptionDialog {
    pub fn new(dialog: Dialog, event: EventHeader, timers: TimerDefaults) -> Self {
        Self {
            dialog,
            event,
            state: SubscriptionDialogState::Initial,
            timers,
            auto_refresh: false,
            expiry: None,
        }
    }

    pub fn state(&self) -> SubscriptionDialogState {
        self.state
    }

    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh
    }

    /// Enables or disables automatic re-SUBSCRIBE; takes effect at the next
    /// expiration update.
    pub fn set_auto_refresh(&mut self, enabled: bool) {
        self.auto_refresh = enabled;
    }

    /// Subscriber side: begins waiting for the first NOTIFY.
    pub fn start(&mut self) -> Vec<SubscriptionAction> {
        let mut actions = self.transition(SubscriptionDialogState::NotifyWait);
        actions.push(SubscriptionAction::Schedule {
            timer: SubscriptionTimer::N,
            duration: self.timers.timer_n(),
        });
        actions
    }

    /// Seconds left, computed from when the duration was last set.
    pub fn subscription_expires(&self, now: Instant) -> u32 {
        match self.expiry {
            Some(expiry) => {
                let elapsed = now.saturating_duration_since(expiry.set_at).as_secs();
                u32::try_from(u64::from(expiry.seconds).saturating_sub(elapsed)).unwrap_or(0)
            }
            None => 0,
        }
    }

    /// Sets the granted duration and re-arms the expiration timer (and the
    /// refresh timer at 90% when auto-refresh is on).
    pub fn set_subscription_expires(
        &mut self,
        seconds: u32,
        now: Instant,
    ) -> Vec<SubscriptionAction> {
        self.expiry = Some(Expiry {
            seconds,
            set_at: now,
        });
        let mut actions = vec![
            SubscriptionAction::Cancel(SubscriptionTimer::Expiration),
            SubscriptionAction::Cancel(SubscriptionTimer::Refresh),
            SubscriptionAction::Schedule {
                timer: SubscriptionTimer::Expiration,
                duration: Duration::from_secs(u64::from(seconds)),
            },
        ];
        if self.auto_refresh && seconds > 0 {
            actions.push(SubscriptionAction::Schedule {
                timer: SubscriptionTimer::Refresh,
                duration: Duration::from_millis(u64::from(seconds) * 900),
            });
        }
        actions
    }

    /// Subscriber side: applies an inbound NOTIFY (RFC 6665 §4.1.3).
    ///
    /// A missing or mismatched Event, or a missing or unknown
    /// Subscription-State, is an error and changes nothing; the caller
    /// answers 489. Otherwise Timer N is cancelled and the state follows the
    /// header. Transitions the lifecycle forbids are ignored.
    pub fn receive_notify(
        &mut self,
        notify: &Request,
        now: Instant,
    ) -> Result<Vec<SubscriptionAction>, DialogError> {
        if self.state == SubscriptionDialogState::Terminated {
            return Err(DialogError::Terminated);
        }
        let header = self.screen_notify(notify)?;
        let next = match header.state {
            SubscriptionState::Active => SubscriptionDialogState::Active,
            SubscriptionState::Pending => SubscriptionDialogState::Pending,
            _ => SubscriptionDialogState::Terminated,
        };

        let mut actions = vec![SubscriptionAction::Cancel(SubscriptionTimer::N)];
        actions.extend(self.apply_state(next, header.expires(), now));
        Ok(actions)
    }

    /// Checks a NOTIFY's Event and Subscription-State without touching
    /// any state.
    pub fn screen_notify(&self, notify: &Request) -> Result<SubscriptionStateHeader, DialogError> {
        let event = notify
            .header("Event")
            .and_then(EventHeader::parse)
            .ok_or(DialogError::BadEvent)?;
        if !event.matches(&self.event) {
            return Err(DialogError::BadEvent);
        }
        let header = notify
            .header("Subscription-State")
            .and_then(SubscriptionStateHeader::parse)
            .ok_or(DialogError::BadSubscriptionState)?;
        if matches!(header.state, SubscriptionState::Unknown(_)) {
            return Err(DialogError::BadSubscriptionState);
        }
        Ok(header)
    }

    /// Notifier side: records the Subscription-State of a NOTIFY we send.
    pub fn record_sent_notify(
        &mut self,
        header: &SubscriptionStateHeader,
        now: Instant,
    ) -> Vec<SubscriptionAction> {
        let next = match header.state {
            SubscriptionState::Active => SubscriptionDialogState::Active,
            SubscriptionState::Pending => SubscriptionDialogState::Pending,
            SubscriptionState::Terminated => SubscriptionDialogState::Terminated,
            SubscriptionState::Unknown(_) => return Vec::new(),
        };
        self.apply_state(next, header.expires(), now)
    }

    fn apply_state(
        &mut self,
        next: SubscriptionDialogState,
        expires: Option<u32>,
        now: Instant,
    ) -> Vec<SubscriptionAction> {
        if next == SubscriptionDialogState::Terminated {
            return self.terminate();
        }
        if !self.state.can_move_to(next) {
            warn!(
                dialog = %self.dialog.id,
                from = self.state.as_str(),
                to = next.as_str(),
                "invalid subscription transition ignored"
            );
            return Vec::new();
        }
        let mut actions = self.transition(next);
        if let Some(seconds) = expires {
            actions.extend(self.set_subscription_expires(seconds, now));
        }
        actions
    }

    /// Re-SUBSCRIBE: legal only while Pending or Active; re-arms Timer N.
    pub fn subscribe(&mut self) -> Result<Vec<SubscriptionAction>, DialogError> {
        match self.state {
            SubscriptionDialogState::Pending | SubscriptionDialogState::Active => {
                Ok(vec![
                    SubscriptionAction::Cancel(SubscriptionTimer::Refresh),
                    SubscriptionAction::Schedule {
                        timer: SubscriptionTimer::N,
                        duration: self.timers.timer_n(),
                    },
                ])
            }
            state => Err(DialogError::InvalidState {
                operation: "subscribe",
                state: state.as_str(),
            }),
        }
    }

    /// SUBSCRIBE with `Expires: 0`: stops refreshing and waits for the final
    /// NOTIFY under Timer N.
    pub fn unsubscribe(&mut self) -> Result<Vec<SubscriptionAction>, DialogError> {
        match self.state {
            SubscriptionDialogState::NotifyWait
            | SubscriptionDialogState::Pending
            | SubscriptionDialogState::Active => {
                self.auto_refresh = false;
                Ok(vec![
                    SubscriptionAction::Cancel(SubscriptionTimer::Refresh),
                    SubscriptionAction::Cancel(SubscriptionTimer::N),
                    SubscriptionAction::Schedule {
                        timer: SubscriptionTimer::N,
                        duration: self.timers.timer_n(),
                    },
                ])
            }
            state => Err(DialogError::InvalidState {
                operation: "unsubscribe",
                state: state.as_str(),
            }),
        }
    }

    /// Applies the final response to a refreshing SUBSCRIBE.
    pub fn on_refresh_response(
        &mut self,
        response: &Response,
        now: Instant,
    ) -> Vec<SubscriptionAction> {
        if response.is_success() {
            let granted = response
                .header("Expires")
                .and_then(|value| value.trim().parse::<u32>().ok());
            return match granted {
                Some(seconds) if seconds > 0 => {
                    let remaining = self.subscription_expires(now);
                    if self.expiry.is_none() || seconds < remaining {
                        self.set_subscription_expires(seconds, now)
                    } else {
                        Vec::new()
                    }
                }
                _ => Vec::new(),
            };
        }
        if response.code() >= 300 && refresh_failure_terminates(response.code()) {
            info!(dialog = %self.dialog.id, code = response.code(), "refresh rejected, subscription over");
            return self.terminate();
        }
        Vec::new()
    }

    pub fn on_timer(&mut self, timer: SubscriptionTimer) -> Vec<SubscriptionAction> {
        match timer {
            SubscriptionTimer::N => {
                info!(dialog = %self.dialog.id, "timer N expired without NOTIFY");
                self.terminate()
            }
            SubscriptionTimer::Expiration => {
                info!(dialog = %self.dialog.id, "subscription expired");
                self.terminate()
            }
            SubscriptionTimer::Refresh => match self.state {
                SubscriptionDialogState::Pending | SubscriptionDialogState::Active
                    if self.auto_refresh =>
                {
                    vec![SubscriptionAction::Refresh]
                }
                _ => Vec::new(),
            },
        }
    }

    /// Moves to Terminated and cancels every timer. Idempotent.
    pub fn terminate(&mut self) -> Vec<SubscriptionAction> {
        if self.state == SubscriptionDialogState::Terminated {
            return Vec::new();
        }
        self.dialog.terminate();
        let mut actions = vec![
            SubscriptionAction::Cancel(SubscriptionTimer::N),
            SubscriptionAction::Cancel(SubscriptionTimer::Refresh),
            SubscriptionAction::Cancel(SubscriptionTimer::Expiration),
        ];
        actions.extend(self.transition(SubscriptionDialogState::Terminated));
        actions
    }

    fn transition(&mut self, next: SubscriptionDialogState) -> Vec<SubscriptionAction> {
        if self.state == next {
            return Vec::new();
        }
        debug!(
            dialog = %self.dialog.id,
            from = self.state.as_str(),
            to = next.as_str(),
            "subscription state"
        );
        self.state = next;
        vec![SubscriptionAction::StateChanged(next)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{invite, response};
    use bytes::Bytes;
    use sip_core::{Headers, Method, RequestLine, SipUri, StatusLine};

    fn subscription() -> SubscriptionDialog {
        let req = invite(1);
        let dialog = Dialog::new_uac(&req, &response(200, &req)).unwrap();
        SubscriptionDialog::new(dialog, EventHeader::new("presence"), TimerDefaults::default())
    }

    fn notify(event: Option<&str>, state: Option<&str>) -> Request {
        let mut headers = Headers::new();
        headers.push("CSeq", "1 NOTIFY");
        if let Some(event) = event {
            headers.push("Event", event.to_string());
        }
        if let Some(state) = state {
            headers.push("Subscription-State", state.to_string());
        }
        Request::new(
            RequestLine::new(Method::Notify, SipUri::parse("sip:alice@example.com").unwrap()),
            headers,
            Bytes::new(),
        )
    }

    fn ok_with_expires(expires: &str) -> Response {
        let mut headers = Headers::new();
        headers.push("Expires", expires.to_string());
        Response::new(StatusLine::from_code(200), headers, Bytes::new())
    }

    #[test]
    fn notify_moves_notify_wait_to_active() {
        let mut sub = subscription();
        let start = sub.start();
        assert!(start.contains(&SubscriptionAction::Schedule {
            timer: SubscriptionTimer::N,
            duration: Duration::from_secs(32),
        }));

        let now = Instant::now();
        let actions = sub
            .receive_notify(&notify(Some("presence"), Some("active;expires=3600")), now)
            .unwrap();
        assert_eq!(actions[0], SubscriptionAction::Cancel(SubscriptionTimer::N));
        assert!(actions.contains(&SubscriptionAction::StateChanged(
            SubscriptionDialogState::Active
        )));
        assert_eq!(sub.subscription_expires(now), 3600);
        assert_eq!(sub.subscription_expires(now + Duration::from_secs(600)), 3000);
    }

    #[test]
    fn bad_notify_changes_nothing() {
        let mut sub = subscription();
        sub.start();
        let now = Instant::now();
        assert_eq!(
            sub.receive_notify(&notify(Some("dialog"), Some("active")), now),
            Err(DialogError::BadEvent)
        );
        assert_eq!(
            sub.receive_notify(&notify(Some("presence"), None), now),
            Err(DialogError::BadSubscriptionState)
        );
        assert_eq!(sub.state(), SubscriptionDialogState::NotifyWait);
    }

    #[test]
    fn active_cannot_fall_back_to_pending() {
        let mut sub = subscription();
        sub.start();
        let now = Instant::now();
        sub.receive_notify(&notify(Some("presence"), Some("active")), now)
            .unwrap();
        let actions = sub
            .receive_notify(&notify(Some("presence"), Some("pending")), now)
            .unwrap();
        assert_eq!(actions, vec![SubscriptionAction::Cancel(SubscriptionTimer::N)]);
        assert_eq!(sub.state(), SubscriptionDialogState::Active);
    }

    #[test]
    fn auto_refresh_arms_at_ninety_percent() {
        let mut sub = subscription();
        sub.set_auto_refresh(true);
        sub.start();
        let actions = sub
            .receive_notify(&notify(Some("presence"), Some("active;expires=100")), Instant::now())
            .unwrap();
        assert!(actions.contains(&SubscriptionAction::Schedule {
            timer: SubscriptionTimer::Refresh,
            duration: Duration::from_secs(90),
        }));
        assert_eq!(
            sub.on_timer(SubscriptionTimer::Refresh),
            vec![SubscriptionAction::Refresh]
        );
        assert!(sub.subscribe().is_ok());
    }

    #[test]
    fn timer_n_terminates_exactly_once() {
        let mut sub = subscription();
        sub.start();
        let actions = sub.on_timer(SubscriptionTimer::N);
        assert_eq!(
            actions
                .iter()
                .filter(|a| **a == SubscriptionAction::StateChanged(SubscriptionDialogState::Terminated))
                .count(),
            1
        );
        assert!(sub.on_timer(SubscriptionTimer::N).is_empty());
        assert!(sub.terminate().is_empty());
        assert!(sub.dialog.is_terminated());
    }

    #[test]
    fn subscribe_requires_pending_or_active() {
        let mut sub = subscription();
        assert!(matches!(
            sub.subscribe(),
            Err(DialogError::InvalidState { state: "Initial", .. })
        ));
        sub.start();
        assert!(sub.subscribe().is_err());
        sub.terminate();
        assert!(sub.unsubscribe().is_err());
    }

    #[test]
    fn refresh_response_adopts_shorter_duration() {
        let mut sub = subscription();
        sub.start();
        let now = Instant::now();
        sub.receive_notify(&notify(Some("presence"), Some("active;expires=600")), now)
            .unwrap();
        assert!(sub.on_refresh_response(&ok_with_expires("900"), now).is_empty());
        assert!(!sub.on_refresh_response(&ok_with_expires("60"), now).is_empty());
        assert_eq!(sub.subscription_expires(now), 60);

        let gone = Response::new(StatusLine::from_code(481), Headers::new(), Bytes::new());
        let actions = sub.on_refresh_response(&gone, now);
        assert!(actions.contains(&SubscriptionAction::StateChanged(
            SubscriptionDialogState::Terminated
        )));
    }

    #[test]
    fn notifier_tracks_sent_state() {
        let mut sub = subscription();
        let now = Instant::now();
        let header = SubscriptionStateHeader::new(SubscriptionState::Pending).with_param("expires", 60);
        sub.record_sent_notify(&header, now);
        assert_eq!(sub.state(), SubscriptionDialogState::Pending);
        sub.record_sent_notify(&SubscriptionStateHeader::new(SubscriptionState::Terminated), now);
        assert_eq!(sub.state(), SubscriptionDialogState::Terminated);
    }
}
