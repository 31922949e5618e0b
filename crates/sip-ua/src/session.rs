// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Handle to an INVITE session and the requests sent inside it.

use sip_core::rseq::parse_rseq;
use sip_core::{Body, HeaderAccess, Method, NameAddr, RAckHeader, Response};
use sip_dialog::{DialogId, OutgoingRequestOptions, SignalingState};
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::core::{ClientUser, InviteClient, RequestClient, RequestRole, UserAgentCore};
use crate::delegate::{InviteClientDelegate, OutgoingRequestDelegate, SessionDelegate};
use crate::error::CoreError;
use crate::uac::UserAgentClient;

/// Names one session held by a [`UserAgentCore`]. Cheap to clone; every
/// operation fails with [`CoreError::UnknownDialog`] once the session has
/// gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: DialogId,
}

impl SessionHandle {
    pub(crate) fn new(id: DialogId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &DialogId {
        &self.id
    }

    pub fn signaling_state(&self, core: &UserAgentCore) -> Option<SignalingState> {
        core.session(&self.id).map(|session| session.signaling_state())
    }

    pub fn is_early(&self, core: &UserAgentCore) -> bool {
        core.session(&self.id)
            .is_some_and(|session| session.dialog.is_early())
    }

    /// Replaces the delegate receiving this session's requests.
    pub fn set_delegate(
        &self,
        core: &mut UserAgentCore,
        delegate: Box<dyn SessionDelegate>,
    ) -> Result<(), CoreError> {
        let entry = core
            .sessions
            .get_mut(&self.id)
            .ok_or_else(|| CoreError::UnknownDialog(self.id.clone()))?;
        entry.delegate = Some(delegate);
        Ok(())
    }

    /// ACK for the last 2xx to our INVITE. Sent straight to the transport;
    /// retransmitted 2xx are answered from the copy kept here.
    ///
    /// A body is required when the 2xx carried an offer.
    pub fn ack(&self, core: &mut UserAgentCore, body: Option<Body>) -> Result<(), CoreError> {
        let seq = {
            let session = self.live(core)?;
            if session.dialog.is_early() {
                return Err(CoreError::InvalidState {
                    operation: "ack",
                    state: "early",
                });
            }
            if session.signaling_state() == SignalingState::HaveRemoteOffer && body.is_none() {
                return Err(CoreError::BodyRequired);
            }
            session.invite_seq()
        };
        core.signal_local(&self.id, body.as_ref())?;
        let options = OutgoingRequestOptions {
            cseq: Some(seq),
            body,
            ..Default::default()
        };
        let mut ack = core.make_in_dialog_request(&self.id, Method::Ack, options)?;
        core.stamp_via(&mut ack);
        if let Some(entry) = core.sessions.get_mut(&self.id) {
            entry.session.record_ack(ack.clone());
        }
        debug!(dialog = %self.id, seq, "ACK");
        core.send_to_transport(ack.into())?;
        Ok(())
    }

    /// Ends a confirmed session. The session is closed at once; the BYE's
    /// outcome only reaches `delegate`.
    pub fn bye(
        &self,
        core: &mut UserAgentCore,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        if self.live(core)?.dialog.is_early() {
            return Err(CoreError::InvalidState {
                operation: "bye",
                state: "early",
            });
        }
        let result = self.send(core, Method::Bye, OutgoingRequestOptions::default(), delegate);
        info!(dialog = %self.id, "hanging up");
        core.terminate_session(&self.id);
        core.drain();
        result
    }

    pub fn info(
        &self,
        core: &mut UserAgentCore,
        body: Body,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        self.send_confirmed(core, Method::Info, with_body(body), delegate)
    }

    pub fn message(
        &self,
        core: &mut UserAgentCore,
        body: Body,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        self.send_confirmed(core, Method::Message, with_body(body), delegate)
    }

    /// NOTIFY inside the session, such as REFER progress. `options` must
    /// carry Event and Subscription-State.
    pub fn notify(
        &self,
        core: &mut UserAgentCore,
        options: OutgoingRequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        for name in ["Event", "Subscription-State"] {
            if !options
                .extra_headers
                .iter()
                .any(|(header, _)| header.eq_ignore_ascii_case(name))
            {
                return Err(CoreError::MalformedRequest(name));
            }
        }
        self.send_confirmed(core, Method::Notify, options, delegate)
    }

    pub fn refer(
        &self,
        core: &mut UserAgentCore,
        refer_to: &NameAddr,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        let options = OutgoingRequestOptions {
            extra_headers: vec![(SmolStr::new("Refer-To"), SmolStr::new(refer_to.to_string()))],
            ..Default::default()
        };
        self.send_confirmed(core, Method::Refer, options, delegate)
    }

    /// PRACK for a reliable provisional (RFC 3262 §7.2). A body answers an
    /// offer the provisional carried.
    pub fn prack(
        &self,
        core: &mut UserAgentCore,
        provisional: &Response,
        body: Option<Body>,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        self.live(core)?;
        let rseq = provisional
            .header("RSeq")
            .and_then(parse_rseq)
            .ok_or(CoreError::MalformedRequest("RSeq"))?;
        let cseq = provisional.cseq().ok_or(CoreError::MalformedRequest("CSeq"))?;
        let rack = RAckHeader {
            rseq,
            cseq_number: cseq.seq,
            cseq_method: cseq.method.clone(),
        };
        core.signal_local(&self.id, body.as_ref())?;
        let options = OutgoingRequestOptions {
            extra_headers: vec![(SmolStr::new("RAck"), SmolStr::new(rack.to_string()))],
            body,
            ..Default::default()
        };
        self.send(core, Method::Prack, options, delegate)
    }

    /// UPDATE (RFC 3311), with or without a new offer. A rejected offer is
    /// rolled back.
    pub fn update(
        &self,
        core: &mut UserAgentCore,
        body: Option<Body>,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        if body.as_ref().is_some_and(Body::is_session) {
            self.check_offer_allowed(core, "update")?;
        } else {
            self.live(core)?;
        }
        core.signal_local(&self.id, body.as_ref())?;
        let options = OutgoingRequestOptions {
            body,
            ..Default::default()
        };
        let user = ClientUser::Request(RequestClient {
            delegate,
            dialog: Some(self.id.clone()),
            role: RequestRole::Update,
        });
        let result = core.send_in_dialog(&self.id, Method::Update, options, user);
        if result.is_err() {
            core.rollback_session(&self.id);
        }
        core.drain();
        result.map(UserAgentClient::new)
    }

    /// re-INVITE. Without a body the peer makes the offer in its 2xx and
    /// the answer goes in the ACK.
    pub fn invite(
        &self,
        core: &mut UserAgentCore,
        body: Option<Body>,
        delegate: Box<dyn InviteClientDelegate>,
    ) -> Result<UserAgentClient, CoreError> {
        self.check_offer_allowed(core, "invite")?;
        core.signal_local(&self.id, body.as_ref())?;
        if let Some(entry) = core.sessions.get_mut(&self.id) {
            entry.session.set_outgoing_reinvite(true);
        }
        let options = OutgoingRequestOptions {
            body,
            ..Default::default()
        };
        let user = ClientUser::Invite(InviteClient {
            delegate: Some(delegate),
            reinvite: Some(self.id.clone()),
            early: Vec::new(),
            cancel_headers: Vec::new(),
        });
        let result = core.send_in_dialog(&self.id, Method::Invite, options, user);
        if result.is_err() {
            if let Some(entry) = core.sessions.get_mut(&self.id) {
                entry.session.set_outgoing_reinvite(false);
                entry.session.rollback_offer();
            }
        }
        core.drain();
        result.map(UserAgentClient::new)
    }

    fn live<'c>(&self, core: &'c UserAgentCore) -> Result<&'c sip_dialog::SessionDialog, CoreError> {
        core.session(&self.id)
            .ok_or_else(|| CoreError::UnknownDialog(self.id.clone()))
    }

    /// A new offer needs a confirmed session with no offer or re-INVITE
    /// outstanding in either direction.
    fn check_offer_allowed(
        &self,
        core: &UserAgentCore,
        operation: &'static str,
    ) -> Result<(), CoreError> {
        let session = self.live(core)?;
        let state = if session.dialog.is_early() && operation == "invite" {
            Some("early")
        } else if session.outgoing_reinvite_pending() || session.incoming_reinvite_pending() {
            Some("re-INVITE in progress")
        } else {
            match session.signaling_state() {
                SignalingState::HaveLocalOffer => Some("local offer outstanding"),
                SignalingState::HaveRemoteOffer => Some("remote offer outstanding"),
                _ => None,
            }
        };
        match state {
            Some(state) => Err(CoreError::InvalidState { operation, state }),
            None => Ok(()),
        }
    }

    fn send_confirmed(
        &self,
        core: &mut UserAgentCore,
        method: Method,
        options: OutgoingRequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        if self.live(core)?.dialog.is_early() {
            return Err(CoreError::InvalidState {
                operation: "in-dialog request",
                state: "early",
            });
        }
        self.send(core, method, options, delegate)
    }

    fn send(
        &self,
        core: &mut UserAgentCore,
        method: Method,
        options: OutgoingRequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> Result<UserAgentClient, CoreError> {
        let user = ClientUser::Request(RequestClient {
            delegate,
            dialog: Some(self.id.clone()),
            role: RequestRole::Plain,
        });
        let result = core.send_in_dialog(&self.id, method, options, user);
        core.drain();
        result.map(UserAgentClient::new)
    }
}

fn with_body(body: Body) -> OutgoingRequestOptions {
    OutgoingRequestOptions {
        body: Some(body),
        ..Default::default()
    }
}
