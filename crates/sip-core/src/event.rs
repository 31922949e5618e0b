// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use smol_str::SmolStr;

use crate::{parse_params, write_params};

/// Represents the Event header (RFC 6665 §8.2.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub package: SmolStr,
    pub id: Option<SmolStr>,
    pub params: Vec<(SmolStr, Option<SmolStr>)>,
}

impl EventHeader {
    pub fn new(package: impl Into<SmolStr>) -> Self {
        Self {
            package: package.into(),
            id: None,
            params: Vec::new(),
        }
    }

    /// Parses `package[.template];id=x;other`.
    pub fn parse(value: &str) -> Option<Self> {
        let (package, params) = match value.split_once(';') {
            Some((package, params)) => (package.trim(), parse_params(params)),
            None => (value.trim(), Vec::new()),
        };
        if package.is_empty() {
            return None;
        }
        let id = params
            .iter()
            .find(|(name, _)| name == "id")
            .and_then(|(_, value)| value.clone());
        let params = params.into_iter().filter(|(name, _)| name != "id").collect();
        Some(Self {
            package: SmolStr::new(package.to_ascii_lowercase()),
            id,
            params,
        })
    }

    /// Two Event headers denote the same subscription when package and id
    /// agree (RFC 6665 §8.2.1). Other parameters are ignored.
    pub fn matches(&self, other: &EventHeader) -> bool {
        self.package.eq_ignore_ascii_case(&other.package) && self.id == other.id
    }
}

impl fmt::Display for EventHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.package)?;
        if let Some(id) = &self.id {
            write!(f, ";id={}", id)?;
        }
        write_params(f, &self.params)
    }
}

/// Subscription state carried by the Subscription-State header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Pending,
    Terminated,
    Unknown(SmolStr),
}

impl SubscriptionState {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionState::Active => "active",
            SubscriptionState::Pending => "pending",
            SubscriptionState::Terminated => "terminated",
            SubscriptionState::Unknown(value) => value.as_str(),
        }
    }

    fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "active" => SubscriptionState::Active,
            "pending" => SubscriptionState::Pending,
            "terminated" => SubscriptionState::Terminated,
            _ => SubscriptionState::Unknown(SmolStr::new(token)),
        }
    }
}

/// Represents the Subscription-State header (RFC 6665 §8.2.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStateHeader {
    pub state: SubscriptionState,
    pub params: Vec<(SmolStr, Option<SmolStr>)>,
}

impl SubscriptionStateHeader {
    pub fn new(state: SubscriptionState) -> Self {
        Self {
            state,
            params: Vec::new(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (state, params) = match value.split_once(';') {
            Some((state, params)) => (state.trim(), parse_params(params)),
            None => (value.trim(), Vec::new()),
        };
        if state.is_empty() {
            return None;
        }
        Some(Self {
            state: SubscriptionState::from_token(state),
            params,
        })
    }

    fn numeric(&self, name: &str) -> Option<u32> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
            .and_then(|value| value.parse().ok())
    }

    /// `expires` parameter in seconds.
    pub fn expires(&self) -> Option<u32> {
        self.numeric("expires")
    }

    /// `retry-after` parameter in seconds.
    pub fn retry_after(&self) -> Option<u32> {
        self.numeric("retry-after")
    }

    /// `reason` parameter (e.g. `timeout`, `noresource`).
    pub fn reason(&self) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == "reason")
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn with_param(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.params
            .push((SmolStr::new(name), Some(SmolStr::new(value.to_string()))));
        self
    }
}

impl fmt::Display for SubscriptionStateHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state.as_str())?;
        write_params(f, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_split_from_params() {
        let event = EventHeader::parse("Presence;id=7;foo").unwrap();
        assert_eq!(event.package, "presence");
        assert_eq!(event.id.as_deref(), Some("7"));
        assert!(event.matches(&EventHeader::parse("presence;id=7").unwrap()));
        assert!(!event.matches(&EventHeader::parse("presence").unwrap()));
    }

    #[test]
    fn subscription_state_params() {
        let header = SubscriptionStateHeader::parse("active;expires=3600").unwrap();
        assert_eq!(header.state, SubscriptionState::Active);
        assert_eq!(header.expires(), Some(3600));

        let header =
            SubscriptionStateHeader::parse("terminated;reason=timeout;retry-after=30").unwrap();
        assert_eq!(header.state, SubscriptionState::Terminated);
        assert_eq!(header.reason(), Some("timeout"));
        assert_eq!(header.retry_after(), Some(30));
    }

    #[test]
    fn unknown_state_is_preserved() {
        let header = SubscriptionStateHeader::parse("waiting").unwrap();
        assert_eq!(header.state, SubscriptionState::Unknown(SmolStr::new("waiting")));
        assert!(SubscriptionStateHeader::parse(" ").is_none());
    }
}
