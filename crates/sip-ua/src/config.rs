// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! User Agent Core configuration.
//!
//! Loaded from JSON (or any serde format) with every field optional;
//! timer values are given in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use sip_core::{Method, NameAddr, SipUri};
use sip_transaction::{TimerDefaults, Transport as TransportKind};
use smol_str::SmolStr;

use crate::error::CoreError;

/// Per-agent settings shared by every transaction and dialog the core
/// creates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentCoreConfig {
    /// Address of record placed in From of out-of-dialog requests.
    pub aor: String,

    /// Optional display name for the From header.
    pub display_name: Option<String>,

    /// Contact URI advertised in dialog-forming requests and responses.
    pub contact: String,

    /// Host (and optional port) for the sent-by part of our Via.
    pub via_host: String,

    /// Transport token for Via (`UDP`, `TCP`, `TLS`, `WS`, `WSS`).
    ///
    /// Also selects reliable or unreliable timer behavior.
    pub transport: String,

    /// Methods accepted from peers; anything else is answered 405.
    pub allowed_methods: Vec<String>,

    /// Option tags placed in Supported and accepted in Require.
    pub supported: Vec<String>,

    /// Body types listed in Accept for OPTIONS.
    pub accept: Vec<String>,

    /// User-Agent and Server header value.
    pub user_agent: Option<String>,

    pub max_forwards: u8,

    /// Expires requested by SUBSCRIBE when the caller gives none.
    pub subscribe_expires: u32,

    #[serde(deserialize_with = "millis")]
    pub t1: Duration,

    #[serde(deserialize_with = "millis")]
    pub t2: Duration,

    #[serde(deserialize_with = "millis")]
    pub t4: Duration,
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for UserAgentCoreConfig {
    fn default() -> Self {
        let timers = TimerDefaults::default();
        Self {
            aor: "sip:anonymous@anonymous.invalid".to_string(),
            display_name: None,
            contact: "sip:anonymous@anonymous.invalid".to_string(),
            via_host: "anonymous.invalid".to_string(),
            transport: "UDP".to_string(),
            allowed_methods: [
                "ACK", "BYE", "CANCEL", "INFO", "INVITE", "MESSAGE", "NOTIFY", "OPTIONS",
                "PRACK", "REFER", "SUBSCRIBE", "UPDATE",
            ]
            .iter()
            .map(|method| method.to_string())
            .collect(),
            supported: vec!["100rel".to_string()],
            accept: vec!["application/sdp".to_string()],
            user_agent: Some(format!("siphon-rs/{}", env!("CARGO_PKG_VERSION"))),
            max_forwards: 70,
            subscribe_expires: 3600,
            t1: timers.t1,
            t2: timers.t2,
            t4: timers.t4,
        }
    }
}

/// Configuration with its URIs parsed, as held by the running core.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub aor: NameAddr,
    pub contact: NameAddr,
    pub transport: TransportKind,
    pub allowed: Vec<Method>,
    pub timers: TimerDefaults,
}

impl UserAgentCoreConfig {
    pub fn timer_defaults(&self) -> TimerDefaults {
        TimerDefaults {
            t1: self.t1,
            t2: self.t2,
            t4: self.t4,
        }
    }

    /// `Allow` header value.
    pub fn allow_header(&self) -> String {
        self.allowed_methods.join(", ")
    }

    pub(crate) fn resolve(&self) -> Result<ResolvedConfig, CoreError> {
        let aor_uri = SipUri::parse(&self.aor)
            .ok_or_else(|| CoreError::Config(format!("invalid AOR {:?}", self.aor)))?;
        let mut aor = NameAddr::new(aor_uri);
        aor.display_name = self.display_name.as_deref().map(SmolStr::new);

        let contact = SipUri::parse(&self.contact)
            .map(NameAddr::new)
            .ok_or_else(|| CoreError::Config(format!("invalid contact {:?}", self.contact)))?;

        let transport = TransportKind::from_token(&self.transport).ok_or_else(|| {
            CoreError::Config(format!("unknown transport {:?}", self.transport))
        })?;

        if self.t1.is_zero() || self.t2 < self.t1 {
            return Err(CoreError::Config(format!(
                "timer T2 ({:?}) must be at least T1 ({:?}) and T1 non-zero",
                self.t2, self.t1
            )));
        }

        Ok(ResolvedConfig {
            aor,
            contact,
            transport,
            allowed: self
                .allowed_methods
                .iter()
                .map(|token| Method::from_token(token))
                .collect(),
            timers: self.timer_defaults(),
        })
    }
}
