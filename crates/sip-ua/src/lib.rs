// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP User Agent Core (RFC 3261 §8, §12-§15 and extensions).
//!
//! [`UserAgentCore`] owns every transaction, session and subscription of
//! one user agent. Inbound messages are pushed in with
//! [`UserAgentCore::receive_message`]; outbound messages leave through the
//! [`Transport`] given at construction. Requests we originate go through
//! the method clients in [`methods`] (or the generic
//! [`UserAgentClient`]); requests we receive reach the application as
//! method servers handed to its delegates.
//!
//! The core never sleeps or spawns. Its owner calls
//! [`UserAgentCore::poll_timers`] once the clock passes
//! [`UserAgentCore::next_timer_deadline`], or hands the core to
//! [`runner::spawn`], which does that on a tokio task.
//!
//! # Example
//! ```
//! use sip_core::{Method, SipUri};
//! use sip_ua::{
//!     ChannelTransport, DefaultCoreDelegate, RequestOptions, UserAgentClient, UserAgentCore,
//!     UserAgentCoreConfig,
//! };
//!
//! let config = UserAgentCoreConfig {
//!     aor: "sip:alice@example.com".into(),
//!     contact: "sip:alice@192.0.2.1:5060".into(),
//!     via_host: "192.0.2.1:5060".into(),
//!     ..Default::default()
//! };
//! let (transport, mut wire) = ChannelTransport::new();
//! let mut core =
//!     UserAgentCore::new(config, Box::new(transport), Box::new(DefaultCoreDelegate)).unwrap();
//!
//! let target = SipUri::parse("sip:bob@example.com").unwrap();
//! let request = core.make_outgoing_request(Method::Options, target, RequestOptions::default());
//! UserAgentClient::send(&mut core, request, None).unwrap();
//! assert!(wire.try_recv().is_ok());
//! ```

pub mod config;
pub mod core;
pub mod delegate;
pub mod error;
pub mod methods;
pub mod runner;
pub mod session;
pub mod subscription;
pub mod timer;
pub mod transport;
pub mod uac;
pub mod uas;

pub use crate::config::UserAgentCoreConfig;
pub use crate::core::UserAgentCore;
pub use crate::delegate::{
    DefaultCoreDelegate, DefaultSessionDelegate, DefaultSubscriptionDelegate,
    InviteClientDelegate, OutgoingRequestDelegate, SessionDelegate, SubscriptionDelegate,
    UserAgentCoreDelegate,
};
pub use crate::error::{CoreError, TransportError};
pub use crate::methods::ReferOrigin;
pub use crate::runner::{RunnerHandle, TokioClock};
pub use crate::session::SessionHandle;
pub use crate::subscription::SubscriptionHandle;
pub use crate::timer::{Clock, ManualClock, SystemClock, TimerQueue, TimerToken};
pub use crate::transport::{ChannelTransport, Transport};
pub use crate::uac::{RequestOptions, UserAgentClient};
pub use crate::uas::{ResponseOptions, UserAgentServer};
