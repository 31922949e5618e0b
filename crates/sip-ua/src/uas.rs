// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generic User Agent Server: the response side every method shares.

use std::ops::RangeInclusive;

use sip_core::{Body, NameAddr, Request, Response};
use sip_transaction::TransactionKey;
use smol_str::SmolStr;

use crate::core::UserAgentCore;
use crate::error::CoreError;

/// How to build a response. Every field is optional; `status` overrides
/// the operation's default code and must stay inside its class.
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    pub status: Option<u16>,
    pub reason: Option<SmolStr>,
    pub extra_headers: Vec<(SmolStr, SmolStr)>,
    pub body: Option<Body>,
}

impl ResponseOptions {
    pub fn status(code: u16) -> Self {
        Self {
            status: Some(code),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<SmolStr>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// The status to send: `status` if set, otherwise `default`, refused
    /// when outside `range`.
    pub(crate) fn code(
        &self,
        default: u16,
        range: RangeInclusive<u16>,
        operation: &'static str,
    ) -> Result<u16, CoreError> {
        let code = self.status.unwrap_or(default);
        if range.contains(&code) {
            Ok(code)
        } else {
            Err(CoreError::InvalidStatus { code, operation })
        }
    }
}

/// The server side of one inbound request, bound to its server
/// transaction in the core.
///
/// Method-specific servers wrap one of these and add their own header
/// and dialog rules around its calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserAgentServer {
    key: TransactionKey,
}

impl UserAgentServer {
    pub(crate) fn new(key: TransactionKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    /// The request being answered, while its transaction lives.
    pub fn request<'c>(&self, core: &'c UserAgentCore) -> Option<&'c Request> {
        core.server_request(&self.key)
    }

    pub fn trying(&self, core: &mut UserAgentCore) -> Result<Response, CoreError> {
        self.send(core, 100, ResponseOptions::default())
    }

    /// 1xx other than 100; 180 unless `status` says otherwise.
    pub fn progress(
        &self,
        core: &mut UserAgentCore,
        options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        let code = options.code(180, 101..=199, "progress")?;
        self.send(core, code, options)
    }

    /// 2xx; 200 unless `status` says otherwise.
    pub fn accept(
        &self,
        core: &mut UserAgentCore,
        options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        let code = options.code(200, 200..=299, "accept")?;
        self.send(core, code, options)
    }

    /// 3xx with one Contact per target; 302 unless `status` says otherwise.
    pub fn redirect(
        &self,
        core: &mut UserAgentCore,
        contacts: &[NameAddr],
        mut options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        let code = options.code(302, 300..=399, "redirect")?;
        for contact in contacts {
            options
                .extra_headers
                .push((SmolStr::new("Contact"), SmolStr::new(contact.to_string())));
        }
        self.send(core, code, options)
    }

    /// 4xx-6xx; 480 unless `status` says otherwise.
    pub fn reject(
        &self,
        core: &mut UserAgentCore,
        options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        let code = options.code(480, 400..=699, "reject")?;
        self.send(core, code, options)
    }

    pub(crate) fn send(
        &self,
        core: &mut UserAgentCore,
        code: u16,
        options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        let response = core.respond(&self.key, code, options);
        core.drain();
        response
    }
}
