// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generic User Agent Client: the request side every method shares.

use sip_core::{Body, NameAddr, Request};
use sip_transaction::TransactionKey;
use smol_str::SmolStr;

use crate::core::{ClientUser, RequestClient, RequestRole, UserAgentCore};
use crate::delegate::OutgoingRequestDelegate;
use crate::error::CoreError;

/// Overrides for [`UserAgentCore::make_outgoing_request`]. Anything left
/// `None` is generated or taken from the configuration.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub to: Option<NameAddr>,
    pub from: Option<NameAddr>,
    pub call_id: Option<SmolStr>,
    pub cseq: Option<u32>,
    pub extra_headers: Vec<(SmolStr, SmolStr)>,
    pub body: Option<Body>,
}

impl RequestOptions {
    pub fn with_header(mut self, name: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }
}

/// The client side of one outbound request, bound to its client
/// transaction in the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserAgentClient {
    key: TransactionKey,
}

impl UserAgentClient {
    /// Sends an out-of-dialog request; responses go to `delegate`.
    ///
    /// The top Via is added here with a fresh branch.
    pub fn send(
        core: &mut UserAgentCore,
        request: Request,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<Self, CoreError> {
        let user = ClientUser::Request(RequestClient {
            delegate,
            dialog: None,
            role: RequestRole::Plain,
        });
        Self::send_with(core, request, user)
    }

    pub(crate) fn send_with(
        core: &mut UserAgentCore,
        request: Request,
        user: ClientUser,
    ) -> Result<Self, CoreError> {
        let key = core.send_request(request, user);
        core.drain();
        key.map(Self::new)
    }

    pub(crate) fn new(key: TransactionKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    /// The request as sent, while its transaction lives.
    pub fn request<'c>(&self, core: &'c UserAgentCore) -> Option<&'c Request> {
        core.client_request(&self.key)
    }

    /// True once the transaction has finished.
    pub fn is_terminated(&self, core: &UserAgentCore) -> bool {
        core.client_request(&self.key).is_none()
    }
}
