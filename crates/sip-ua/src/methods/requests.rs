// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Out-of-dialog non-INVITE clients.

use sip_core::{Body, EventHeader, Method, NameAddr, SipUri};

use crate::core::UserAgentCore;
use crate::delegate::OutgoingRequestDelegate;
use crate::error::CoreError;
use crate::uac::{RequestOptions, UserAgentClient};

/// MESSAGE (RFC 3428).
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageUac;

impl MessageUac {
    pub fn send(
        core: &mut UserAgentCore,
        target: SipUri,
        body: Body,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        let request =
            core.make_outgoing_request(Method::Message, target, RequestOptions::default().with_body(body));
        UserAgentClient::send(core, request, delegate)
    }
}

/// PUBLISH (RFC 3903). The first publication has no SIP-If-Match; pass
/// the entity tag from a previous 2xx to refresh or modify.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishUac;

impl PublishUac {
    pub fn send(
        core: &mut UserAgentCore,
        target: SipUri,
        event: &EventHeader,
        expires: u32,
        entity_tag: Option<&str>,
        body: Option<Body>,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        let mut options = RequestOptions::default()
            .with_header("Event", event.to_string())
            .with_header("Expires", expires.to_string());
        if let Some(tag) = entity_tag {
            options = options.with_header("SIP-If-Match", tag);
        }
        options.body = body;
        let request = core.make_outgoing_request(Method::Publish, target, options);
        UserAgentClient::send(core, request, delegate)
    }
}

/// REGISTER for our address of record; `expires` 0 removes the binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterUac;

impl RegisterUac {
    pub fn send(
        core: &mut UserAgentCore,
        registrar: SipUri,
        expires: u32,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        let aor = core.resolved.aor.clone();
        let options = RequestOptions {
            to: Some(aor.clone()),
            from: Some(aor),
            ..Default::default()
        }
        .with_header("Expires", expires.to_string());
        let request = core.make_outgoing_request(Method::Register, registrar, options);
        UserAgentClient::send(core, request, delegate)
    }
}

/// REFER outside any dialog (RFC 3515).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferUac;

impl ReferUac {
    pub fn send(
        core: &mut UserAgentCore,
        target: SipUri,
        refer_to: &NameAddr,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        let options = RequestOptions::default().with_header("Refer-To", refer_to.to_string());
        let request = core.make_outgoing_request(Method::Refer, target, options);
        UserAgentClient::send(core, request, delegate)
    }
}
