// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Transport-aware timer calculations per RFC 3261 §17 and RFC 6026.
//!
//! SIP transaction timers depend on the transport protocol:
//! - **Unreliable transports (UDP)**: full values per RFC 3261 Table 4
//! - **Reliable transports (TCP/TLS/WebSocket)**: retransmission timers are
//!   never armed and the "wait for stray retransmissions" timers collapse
//!   to zero
//!
//! | timer | role                                   | unreliable | reliable |
//! |-------|----------------------------------------|------------|----------|
//! | A     | INVITE retransmit (doubling)           | T1         | not armed|
//! | B     | INVITE client timeout                  | 64*T1      | 64*T1    |
//! | D     | response absorb after non-2xx          | 32s        | 0        |
//! | E     | non-INVITE retransmit (capped at T2)   | T1         | not armed|
//! | F     | non-INVITE client timeout              | 64*T1      | 64*T1    |
//! | G     | INVITE final retransmit (capped at T2) | T1         | not armed|
//! | H     | wait for ACK                           | 64*T1      | 64*T1    |
//! | I     | absorb ACK retransmits                 | T4         | 0        |
//! | J     | absorb non-INVITE request retransmits  | 64*T1      | 0        |
//! | K     | absorb non-INVITE response retransmits | T4         | 0        |
//! | L     | absorb accepted INVITE retransmits     | 64*T1      | 64*T1    |
//! | M     | absorb retransmitted 2xx               | 64*T1      | 64*T1    |
//!
//! ```rust
//! use sip_transaction::timers::{Transport, TransportAwareTimers};
//! use sip_transaction::TransactionTimer;
//! use std::time::Duration;
//!
//! let timers = TransportAwareTimers::new(Transport::Wss);
//! assert_eq!(timers.duration(TransactionTimer::K), Duration::ZERO);
//! assert_eq!(timers.duration(TransactionTimer::F), Duration::from_secs(32));
//! assert!(!timers.should_retransmit());
//! ```

use std::time::Duration;

use crate::TransactionTimer;

/// Transport protocol for timer calculations and Via transport tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl Transport {
    /// Returns true for connection-oriented transports.
    pub fn is_reliable(self) -> bool {
        !matches!(self, Transport::Udp)
    }

    /// Via transport token.
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Udp => "UDP",
            Transport::Tcp => "TCP",
            Transport::Tls => "TLS",
            Transport::Ws => "WS",
            Transport::Wss => "WSS",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "UDP" => Some(Transport::Udp),
            "TCP" => Some(Transport::Tcp),
            "TLS" => Some(Transport::Tls),
            "WS" => Some(Transport::Ws),
            "WSS" => Some(Transport::Wss),
            _ => None,
        }
    }
}

/// RFC 3261 base timer values (Table 4).
///
/// T1 MUST NOT be set lower than 500ms on the public Internet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerDefaults {
    /// RTT estimate - default 500ms
    pub t1: Duration,
    /// Maximum retransmit interval for non-INVITE and INVITE responses - default 4s
    pub t2: Duration,
    /// Maximum time a message remains in the network - default 5s
    pub t4: Duration,
}

impl Default for TimerDefaults {
    fn default() -> Self {
        Self {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
        }
    }
}

impl TimerDefaults {
    /// 64*T1, the common transaction lifetime.
    pub fn t1x64(&self) -> Duration {
        self.t1.saturating_mul(64)
    }

    /// RFC 6665 Timer N: how long a subscriber waits for a NOTIFY.
    pub fn timer_n(&self) -> Duration {
        self.t1x64()
    }
}

/// Transport-aware timer value calculator.
#[derive(Debug, Clone, Copy)]
pub struct TransportAwareTimers {
    transport: Transport,
    defaults: TimerDefaults,
}

impl TransportAwareTimers {
    /// Creates a new timer calculator for the specified transport.
    pub fn new(transport: Transport) -> Self {
        Self::with_defaults(transport, TimerDefaults::default())
    }

    /// Creates a timer calculator with custom base timer values.
    pub fn with_defaults(transport: Transport, defaults: TimerDefaults) -> Self {
        Self {
            transport,
            defaults,
        }
    }

    /// Returns the initial duration for a given timer.
    pub fn duration(&self, timer: TransactionTimer) -> Duration {
        let reliable = self.transport.is_reliable();
        let zero_if_reliable = |value: Duration| if reliable { Duration::ZERO } else { value };
        match timer {
            TransactionTimer::A | TransactionTimer::E | TransactionTimer::G => {
                zero_if_reliable(self.defaults.t1)
            }
            TransactionTimer::B
            | TransactionTimer::F
            | TransactionTimer::H
            | TransactionTimer::L
            | TransactionTimer::M => self.defaults.t1x64(),
            // Fixed 32s rather than 64*T1 (RFC 3261 §17.1.1.2).
            TransactionTimer::D => zero_if_reliable(Duration::from_secs(32)),
            TransactionTimer::I | TransactionTimer::K => zero_if_reliable(self.defaults.t4),
            TransactionTimer::J => zero_if_reliable(self.defaults.t1x64()),
            TransactionTimer::ProvisionalResend => self.defaults.t1,
        }
    }

    /// Retransmissions are only necessary for unreliable transports.
    pub fn should_retransmit(&self) -> bool {
        !self.transport.is_reliable()
    }

    pub fn t2(&self) -> Duration {
        self.defaults.t2
    }

    pub fn defaults(&self) -> TimerDefaults {
        self.defaults
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_uses_table_4_values() {
        let timers = TransportAwareTimers::new(Transport::Udp);
        assert_eq!(timers.duration(TransactionTimer::A), Duration::from_millis(500));
        assert_eq!(timers.duration(TransactionTimer::B), Duration::from_secs(32));
        assert_eq!(timers.duration(TransactionTimer::D), Duration::from_secs(32));
        assert_eq!(timers.duration(TransactionTimer::I), Duration::from_secs(5));
        assert_eq!(timers.duration(TransactionTimer::J), Duration::from_secs(32));
        assert_eq!(timers.duration(TransactionTimer::K), Duration::from_secs(5));
        assert!(timers.should_retransmit());
    }

    #[test]
    fn reliable_transports_collapse_wait_timers() {
        for transport in [Transport::Tcp, Transport::Tls, Transport::Ws, Transport::Wss] {
            let timers = TransportAwareTimers::new(transport);
            assert_eq!(timers.duration(TransactionTimer::D), Duration::ZERO);
            assert_eq!(timers.duration(TransactionTimer::I), Duration::ZERO);
            assert_eq!(timers.duration(TransactionTimer::J), Duration::ZERO);
            assert_eq!(timers.duration(TransactionTimer::K), Duration::ZERO);
            assert_eq!(timers.duration(TransactionTimer::H), Duration::from_secs(32));
            assert_eq!(timers.duration(TransactionTimer::L), Duration::from_secs(32));
            assert!(!timers.should_retransmit());
        }
    }

    #[test]
    fn custom_t1_scales_lifetimes() {
        let defaults = TimerDefaults {
            t1: Duration::from_secs(1),
            ..TimerDefaults::default()
        };
        let timers = TransportAwareTimers::with_defaults(Transport::Udp, defaults);
        assert_eq!(timers.duration(TransactionTimer::F), Duration::from_secs(64));
        assert_eq!(defaults.timer_n(), Duration::from_secs(64));
    }

    #[test]
    fn transport_tokens() {
        assert_eq!(Transport::from_token("wss"), Some(Transport::Wss));
        assert_eq!(Transport::Udp.as_str(), "UDP");
        assert_eq!(Transport::from_token("SCTP"), None);
    }
}
