// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use smol_str::SmolStr;

use crate::{parse_params, write_params, SipUri};

/// Generic SIP name-addr structure used by From/To/Contact/Route headers.
///
/// `params` holds the header parameters that follow the address (for
/// example `tag`), not the URI parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<SmolStr>,
    pub uri: SipUri,
    pub params: Vec<(SmolStr, Option<SmolStr>)>,
}

impl NameAddr {
    /// Wraps a bare URI with no display name or parameters.
    pub fn new(uri: SipUri) -> Self {
        Self {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    /// Parses `"Name" <uri>;params`, `Name <uri>;params` or `uri;params`.
    ///
    /// In the addr-spec form every `;` parameter belongs to the header, as
    /// RFC 3261 §20.10 requires.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some(open) = input.find('<') {
            let close = input[open..].find('>')? + open;
            let display = input[..open].trim().trim_matches('"').trim();
            let uri = SipUri::parse(&input[open + 1..close])?;
            let params = parse_params(&input[close + 1..]);
            return Some(Self {
                display_name: (!display.is_empty()).then(|| SmolStr::new(display)),
                uri,
                params,
            });
        }

        let (uri, params) = match input.split_once(';') {
            Some((uri, params)) => (uri, parse_params(params)),
            None => (input, Vec::new()),
        };
        Some(Self {
            display_name: None,
            uri: SipUri::parse(uri)?,
            params,
        })
    }

    /// Looks up a header parameter by name, ignoring ASCII case.
    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_deref())
    }

    /// Returns the `tag` parameter if present.
    pub fn tag(&self) -> Option<&str> {
        self.param("tag").flatten()
    }

    /// Sets (or replaces) a header parameter.
    pub fn set_param(&mut self, name: &str, value: Option<&str>) {
        let value = value.map(SmolStr::new);
        match self
            .params
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.params.push((SmolStr::new(name), value)),
        }
    }

    /// Returns a copy carrying the given tag.
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.set_param("tag", Some(tag));
        self
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        write_params(f, &self.params)
    }
}
