// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Clock sources and the deadline-ordered timer queue behind every
//! transaction, session and subscription timer.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Source of "now" for the core. Every timer deadline is computed from it.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Handle to a scheduled entry; only good for cancelling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Deadline-ordered queue of values.
///
/// Entries with the same deadline fire in scheduling order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: BTreeMap<(Instant, TimerToken), T>,
    deadlines: HashMap<TimerToken, Instant>,
    next_token: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_token: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn schedule(&mut self, at: Instant, value: T) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        self.entries.insert((at, token), value);
        self.deadlines.insert(token, at);
        token
    }

    pub fn cancel(&mut self, token: TimerToken) -> Option<T> {
        let at = self.deadlines.remove(&token)?;
        self.entries.remove(&(at, token))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(at, _)| *at)
    }

    /// Removes and returns every entry due at or before `now`, earliest
    /// first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(TimerToken, T)> {
        let mut expired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, token), value) = entry.remove_entry();
            self.deadlines.remove(&token);
            expired.push((token, value));
        }
        expired
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_cancel_and_poll() {
        let clock = ManualClock::new();
        let now = clock.now();
        let mut queue = TimerQueue::new();

        let first = queue.schedule(now, "task1");
        assert_eq!(queue.cancel(first), Some("task1"));
        assert_eq!(queue.cancel(first), None);

        queue.schedule(now, "task2");
        let due = queue.pop_expired(now + Duration::from_secs(1));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].1, "task2");

        queue.schedule(now + Duration::from_millis(1001), "task3");
        assert!(queue.pop_expired(now + Duration::from_secs(1)).is_empty());
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.next_deadline(),
            Some(now + Duration::from_millis(1001))
        );
    }

    #[test]
    fn equal_deadlines_fire_in_order() {
        let now = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(now, 1);
        queue.schedule(now, 2);
        queue.schedule(now - Duration::from_millis(1), 0);
        let order: Vec<_> = queue.pop_expired(now).into_iter().map(|(_, v)| v).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();
        other.advance(Duration::from_secs(32));
        assert_eq!(clock.now() - start, Duration::from_secs(32));
    }
}
