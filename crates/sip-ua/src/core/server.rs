// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Server transactions and the responses sent through them.

use sip_core::{HeaderAccess, Method, Request, Response, SipMessage};
use sip_dialog::DialogId;
use sip_transaction::builders::{build_response, ensure_to_tag};
use sip_transaction::fsm::{
    ServerAction, ServerInviteEvent, ServerInviteFsm, ServerNonInviteEvent, ServerNonInviteFsm,
};
use sip_transaction::{generate_tag, ServerInviteState, TransactionKey, TransactionTimer};
use smol_str::SmolStr;
use tracing::{debug, warn};

use super::{ServerEntry, ServerFsm, ServerRole, TimerTarget, UserAgentCore};
use crate::error::CoreError;
use crate::uas::ResponseOptions;

#[derive(Debug)]
pub(crate) enum ServerEvent {
    Retransmission,
    Ack,
    Timer(TransactionTimer),
    TransportError,
}

impl UserAgentCore {
    /// Creates the server transaction for a new inbound request. An INVITE
    /// answers 100 Trying straight away.
    pub(crate) fn start_server_transaction(
        &mut self,
        request: Request,
        role: ServerRole,
        dialog: Option<DialogId>,
    ) -> Result<TransactionKey, CoreError> {
        let key = TransactionKey::from_request(&request, true)
            .ok_or(CoreError::MalformedRequest("Via branch"))?;
        let local_tag = request.to_tag().unwrap_or_else(generate_tag);
        let timers = self.transaction_timers();
        let (fsm, actions) = if request.method() == &Method::Invite {
            let mut fsm = ServerInviteFsm::new(timers);
            let actions = fsm.on_event(ServerInviteEvent::ReceiveInvite(request.clone()));
            (ServerFsm::Invite(fsm), actions)
        } else {
            (
                ServerFsm::NonInvite(ServerNonInviteFsm::new(request.clone(), timers)),
                Vec::new(),
            )
        };
        debug!(%key, ?role, "server transaction started");
        self.servers.insert(
            key.clone(),
            ServerEntry {
                fsm,
                request,
                local_tag,
                dialog,
                role,
                terminated: false,
            },
        );
        self.process_server_actions(&key, actions);
        Ok(key)
    }

    pub(crate) fn server_request(&self, key: &TransactionKey) -> Option<&Request> {
        self.live_server(key).map(|entry| &entry.request)
    }

    pub(crate) fn live_server(&self, key: &TransactionKey) -> Option<&ServerEntry> {
        self.servers.get(key).filter(|entry| !entry.terminated)
    }

    /// True while an INVITE server transaction can still send a final
    /// response.
    pub(crate) fn invite_proceeding(&self, key: &TransactionKey) -> bool {
        matches!(
            self.live_server(key).map(|entry| &entry.fsm),
            Some(ServerFsm::Invite(fsm)) if fsm.state == ServerInviteState::Proceeding
        )
    }

    pub(crate) fn server_event(
        &mut self,
        key: &TransactionKey,
        event: ServerEvent,
    ) -> Vec<ServerAction> {
        let Some(entry) = self.servers.get_mut(key) else {
            return Vec::new();
        };
        match &mut entry.fsm {
            ServerFsm::Invite(fsm) => fsm.on_event(match event {
                ServerEvent::Retransmission => ServerInviteEvent::ReceiveRetransmission,
                ServerEvent::Ack => ServerInviteEvent::ReceiveAck,
                ServerEvent::Timer(timer) => ServerInviteEvent::TimerFired(timer),
                ServerEvent::TransportError => ServerInviteEvent::TransportError,
            }),
            ServerFsm::NonInvite(fsm) => match event {
                ServerEvent::Retransmission => {
                    fsm.on_event(ServerNonInviteEvent::ReceiveRetransmission)
                }
                ServerEvent::Ack => Vec::new(),
                ServerEvent::Timer(timer) => fsm.on_event(ServerNonInviteEvent::TimerFired(timer)),
                ServerEvent::TransportError => fsm.on_event(ServerNonInviteEvent::TransportError),
            },
        }
    }

    /// Builds a response to the transaction's request: To tag on anything
    /// but 100, then reason, extra headers and body from `options`.
    pub(crate) fn build_server_response(
        &self,
        key: &TransactionKey,
        code: u16,
        options: &ResponseOptions,
    ) -> Result<Response, CoreError> {
        let entry = self
            .live_server(key)
            .ok_or_else(|| CoreError::UnknownTransaction(key.clone()))?;
        let mut response = build_response(&entry.request, code, options.reason.as_deref());
        if code > 100 {
            ensure_to_tag(&mut response, &entry.local_tag);
        }
        if let Some(server) = &self.config.user_agent {
            response.headers.push("Server", server.clone());
        }
        for (name, value) in &options.extra_headers {
            response.headers.push(name.clone(), value.clone());
        }
        response.set_body(options.body.as_ref());
        Ok(response)
    }

    /// Hands a response to the server transaction and applies what a
    /// final response means for the transaction's dialog.
    pub(crate) fn send_server_response(
        &mut self,
        key: &TransactionKey,
        response: Response,
    ) -> Result<(), CoreError> {
        let entry = self
            .servers
            .get_mut(key)
            .filter(|entry| !entry.terminated)
            .ok_or_else(|| CoreError::UnknownTransaction(key.clone()))?;
        let actions = match &mut entry.fsm {
            ServerFsm::Invite(fsm) => fsm.try_send(response.clone())?,
            ServerFsm::NonInvite(fsm) => fsm.try_send(response.clone())?,
        };
        let (role, dialog) = (entry.role, entry.dialog.clone());
        self.process_server_actions(key, actions);
        if response.is_final() {
            if let Some(id) = dialog {
                self.after_final_response(&id, role, &response);
            }
        }
        Ok(())
    }

    /// Builds and sends a response in one step.
    pub(crate) fn respond(
        &mut self,
        key: &TransactionKey,
        code: u16,
        options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        let response = self.build_server_response(key, code, &options)?;
        self.send_server_response(key, response.clone())?;
        Ok(response)
    }

    fn after_final_response(&mut self, id: &DialogId, role: ServerRole, response: &Response) {
        match role {
            ServerRole::Invite | ServerRole::ReInvite if response.is_success() => {
                let Some(entry) = self.sessions.get_mut(id) else {
                    return;
                };
                entry.session.dialog.confirm();
                let actions = entry.session.start_2xx_retransmission(response.clone());
                self.apply_session_actions(id, actions);
            }
            ServerRole::Invite => {
                if self
                    .sessions
                    .get(id)
                    .is_some_and(|entry| entry.session.dialog.is_early())
                {
                    self.terminate_session(id);
                }
            }
            ServerRole::ReInvite => {
                if let Some(entry) = self.sessions.get_mut(id) {
                    entry.session.set_incoming_reinvite(false);
                    entry.session.rollback_offer();
                }
            }
            ServerRole::Update if !response.is_success() => {
                if let Some(entry) = self.sessions.get_mut(id) {
                    entry.session.rollback_offer();
                }
            }
            ServerRole::Update | ServerRole::Plain => {}
        }
    }

    pub(crate) fn process_server_actions(
        &mut self,
        key: &TransactionKey,
        actions: Vec<ServerAction>,
    ) {
        for action in actions {
            match action {
                ServerAction::Transmit(response) => {
                    if self.send_to_transport(response.into()).is_err() {
                        let follow_up = self.server_event(key, ServerEvent::TransportError);
                        self.process_server_actions(key, follow_up);
                    }
                }
                ServerAction::AckTimeout => {
                    warn!(%key, "no ACK for final response");
                }
                ServerAction::TransportFailed => {
                    warn!(%key, "server transaction lost its transport");
                }
                ServerAction::Schedule { timer, duration } => {
                    if self.live_server(key).is_some() {
                        self.arm(TimerTarget::Server(key.clone(), timer), duration);
                    }
                }
                ServerAction::Cancel(timer) => {
                    self.disarm(&TimerTarget::Server(key.clone(), timer));
                }
                ServerAction::Terminate { reason } => self.server_terminated(key, &reason),
            }
        }
    }

    fn server_terminated(&mut self, key: &TransactionKey, reason: &str) {
        let Some(entry) = self.servers.get_mut(key) else {
            return;
        };
        if entry.terminated {
            return;
        }
        entry.terminated = true;
        debug!(%key, reason, "server transaction terminated");
        self.disarm_where(|target| matches!(target, TimerTarget::Server(owner, _) if owner == key));
        let key = key.clone();
        self.notify(move |core| {
            core.servers.remove(&key);
        });
    }

    /// Answers a request without creating a transaction. Used for requests
    /// rejected before they reach a transaction user.
    pub(crate) fn reply_stateless(
        &mut self,
        request: &Request,
        code: u16,
        extra_headers: &[(&str, SmolStr)],
    ) {
        let mut response = build_response(request, code, None);
        if code > 100 {
            ensure_to_tag(&mut response, &generate_tag());
        }
        for (name, value) in extra_headers {
            response.headers.push(*name, value.clone());
        }
        debug!(
            code,
            method = %request.method(),
            call_id = request.call_id().unwrap_or_default(),
            "stateless reply"
        );
        let _ = self.send_to_transport(SipMessage::Response(response));
    }
}
