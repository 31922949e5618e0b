// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared harness: an in-memory wire, a manual clock and helpers to wire
//! two cores back to back.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use sip_core::{
    HeaderAccess, Headers, Method, Request, RequestLine, Response, SipMessage, SipUri,
};
use sip_ua::{
    ManualClock, Transport, TransportError, UserAgentCore, UserAgentCoreConfig,
    UserAgentCoreDelegate,
};

/// Recording transport. Clones share the same buffers.
#[derive(Clone, Default)]
pub struct Wire {
    outbox: Arc<Mutex<Vec<SipMessage>>>,
    history: Arc<Mutex<Vec<SipMessage>>>,
}

impl Transport for Wire {
    fn send(&mut self, message: &SipMessage) -> Result<(), TransportError> {
        self.outbox.lock().push(message.clone());
        self.history.lock().push(message.clone());
        Ok(())
    }
}

impl Wire {
    /// Messages sent since the last call.
    pub fn take(&self) -> Vec<SipMessage> {
        std::mem::take(&mut *self.outbox.lock())
    }

    /// Every message ever sent.
    pub fn history(&self) -> Vec<SipMessage> {
        self.history.lock().clone()
    }

    pub fn responses(&self) -> Vec<Response> {
        self.history()
            .into_iter()
            .filter_map(|message| message.as_response().cloned())
            .collect()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.history()
            .into_iter()
            .filter_map(|message| message.as_request().cloned())
            .collect()
    }

    pub fn response_codes(&self) -> Vec<u16> {
        self.responses().iter().map(Response::code).collect()
    }

    pub fn last_response(&self) -> Option<Response> {
        self.responses().pop()
    }

    pub fn requests_of(&self, method: Method) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|request| request.method() == &method)
            .collect()
    }
}

/// Shared event log filled by recording delegates.
pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn record(events: &Events, event: impl Into<String>) {
    events.lock().push(event.into());
}

pub fn logged(events: &Events) -> Vec<String> {
    events.lock().clone()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("sip_ua=debug")
        .try_init();
}

pub fn config(user: &str, host: &str) -> UserAgentCoreConfig {
    UserAgentCoreConfig {
        aor: format!("sip:{}@example.com", user),
        contact: format!("sip:{}@{}", user, host),
        via_host: host.to_string(),
        ..Default::default()
    }
}

/// One user agent on the test wire.
pub struct Peer {
    pub core: UserAgentCore,
    pub wire: Wire,
}

impl Peer {
    pub fn new(
        user: &str,
        host: &str,
        clock: &ManualClock,
        delegate: Box<dyn UserAgentCoreDelegate>,
    ) -> Self {
        init_tracing();
        let wire = Wire::default();
        let core = UserAgentCore::with_clock(
            config(user, host),
            Box::new(wire.clone()),
            delegate,
            Arc::new(clock.clone()),
        )
        .expect("valid test configuration");
        Self { core, wire }
    }

    pub fn uri(user: &str, host: &str) -> SipUri {
        SipUri::parse(&format!("sip:{}@{}", user, host)).expect("valid uri")
    }
}

/// Carries messages both ways until both sides fall quiet.
pub fn pump(a: &mut Peer, b: &mut Peer) {
    for _ in 0..64 {
        let from_a = a.wire.take();
        let from_b = b.wire.take();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        for message in from_a {
            b.core.receive_message(message);
        }
        for message in from_b {
            a.core.receive_message(message);
        }
    }
    panic!("peers never fell quiet");
}

/// Advances the shared clock and polls both cores.
pub fn advance(clock: &ManualClock, by: std::time::Duration, peers: &mut [&mut Peer]) {
    clock.advance(by);
    for peer in peers.iter_mut() {
        peer.core.poll_timers();
    }
}

/// A request from a third party, `carol`, as seen on the wire.
pub fn inbound(method: Method, branch: &str, to_tag: Option<&str>, cseq: u32) -> Request {
    let mut headers = Headers::new();
    headers.push(
        "Via",
        format!("SIP/2.0/UDP 198.51.100.7:5060;branch=z9hG4bK{}", branch),
    );
    headers.push("Max-Forwards", "70");
    headers.push("From", "<sip:carol@example.org>;tag=carol-1");
    match to_tag {
        Some(tag) => headers.push("To", format!("<sip:alice@example.com>;tag={}", tag)),
        None => headers.push("To", "<sip:alice@example.com>"),
    }
    headers.push("Call-ID", "carol-call-1");
    headers.push("CSeq", format!("{} {}", cseq, method));
    headers.push("Contact", "<sip:carol@198.51.100.7:5060>");
    Request::new(
        RequestLine::new(method, SipUri::parse("sip:alice@192.0.2.1").expect("valid uri")),
        headers,
        Bytes::new(),
    )
}

/// The To tag of the first response with `code`.
pub fn to_tag_of(wire: &Wire, code: u16) -> Option<String> {
    wire.responses()
        .into_iter()
        .find(|response| response.code() == code)
        .and_then(|response| response.to_tag())
        .map(|tag| tag.to_string())
}
