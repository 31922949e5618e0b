// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Outbound requests: the request factory and client transactions.

use bytes::Bytes;
use sip_core::{
    HeaderAccess, Headers, Method, NameAddr, Request, RequestLine, Response, SipUri, ViaHeader,
};
use sip_dialog::DialogId;
use sip_transaction::builders::build_cancel;
use sip_transaction::fsm::{
    ClientAction, ClientInviteEvent, ClientInviteFsm, ClientNonInviteEvent, ClientNonInviteFsm,
};
use sip_transaction::{
    generate_branch_id, generate_call_id, generate_tag, TransactionKey, TransactionTimer,
};
use smol_str::SmolStr;
use tracing::{debug, warn};

use super::{
    ClientEntry, ClientFsm, ClientUser, RequestClient, RequestRole, TimerTarget, UserAgentCore,
};
use crate::error::CoreError;
use crate::uac::RequestOptions;

/// Input to a client transaction, independent of its kind.
#[derive(Debug)]
pub(crate) enum ClientEvent {
    Response(Response),
    Timer(TransactionTimer),
    TransportError,
    Cancel,
}

/// Methods whose requests advertise our Contact.
fn carries_contact(method: &Method) -> bool {
    matches!(
        method,
        Method::Invite | Method::Subscribe | Method::Refer | Method::Register | Method::Notify
    )
}

impl UserAgentCore {
    /// Builds an out-of-dialog request addressed to `target`.
    ///
    /// A fresh Call-ID and From tag are generated unless given; the To
    /// header is the target itself. No Via is added: sending stamps it.
    pub fn make_outgoing_request(
        &self,
        method: Method,
        target: SipUri,
        options: RequestOptions,
    ) -> Request {
        let to = options
            .to
            .unwrap_or_else(|| NameAddr::new(target.clone()));
        let from = options.from.unwrap_or_else(|| self.resolved.aor.clone());
        let from = match from.tag() {
            Some(_) => from,
            None => from.with_tag(&generate_tag()),
        };
        let call_id = options.call_id.unwrap_or_else(generate_call_id);
        let seq = options.cseq.unwrap_or(1);

        let mut headers = Headers::new();
        headers.push("Max-Forwards", self.config.max_forwards.to_string());
        headers.push("To", to.to_string());
        headers.push("From", from.to_string());
        headers.push("Call-ID", call_id);
        headers.push("CSeq", format!("{} {}", seq, method));
        if carries_contact(&method) {
            headers.push("Contact", self.resolved.contact.to_string());
        }
        if method == Method::Invite {
            headers.push("Allow", self.config.allow_header());
        }
        self.decorate_request(&mut headers);
        for (name, value) in options.extra_headers {
            headers.push(name, value);
        }

        let mut request = Request::new(RequestLine::new(method, target), headers, Bytes::new());
        request.set_body(options.body.as_ref());
        request
    }

    /// Supported and User-Agent, on every request we originate.
    pub(crate) fn decorate_request(&self, headers: &mut Headers) {
        if !self.config.supported.is_empty() && !headers.contains("Supported") {
            headers.push("Supported", self.config.supported.join(", "));
        }
        if let Some(user_agent) = &self.config.user_agent {
            if !headers.contains("User-Agent") {
                headers.push("User-Agent", user_agent.clone());
            }
        }
    }

    /// Pushes our Via with a fresh branch and returns the branch.
    pub(crate) fn stamp_via(&self, request: &mut Request) -> SmolStr {
        let branch = generate_branch_id();
        let via = ViaHeader::new(
            self.resolved.transport.as_str(),
            &self.config.via_host,
            &branch,
        );
        request.headers.push_front("Via", via.to_string());
        branch
    }

    /// Stamps a Via and starts a client transaction for `request`.
    pub(crate) fn send_request(
        &mut self,
        mut request: Request,
        user: ClientUser,
    ) -> Result<TransactionKey, CoreError> {
        if matches!(request.method(), Method::Ack | Method::Cancel) {
            return Err(CoreError::InvalidState {
                operation: "send_request",
                state: "ACK and CANCEL are not sent as new requests",
            });
        }
        self.prepare_request(&mut request);
        self.start_client_transaction(request, user)
    }

    /// Max-Forwards if missing, then our Via.
    pub(crate) fn prepare_request(&self, request: &mut Request) -> SmolStr {
        if !request.headers.contains("Max-Forwards") {
            request
                .headers
                .push("Max-Forwards", self.config.max_forwards.to_string());
        }
        self.stamp_via(request)
    }

    /// Starts a client transaction for a request that already carries its
    /// Via.
    pub(crate) fn start_client_transaction(
        &mut self,
        request: Request,
        user: ClientUser,
    ) -> Result<TransactionKey, CoreError> {
        let key = TransactionKey::from_request(&request, false)
            .ok_or(CoreError::MalformedRequest("Via branch"))?;
        let timers = self.transaction_timers();
        let (fsm, actions) = if request.method() == &Method::Invite {
            let mut fsm = ClientInviteFsm::new(timers);
            let actions = fsm.on_event(ClientInviteEvent::SendInvite(request.clone()));
            (ClientFsm::Invite(fsm), actions)
        } else {
            let mut fsm = ClientNonInviteFsm::new(timers);
            let actions = fsm.on_event(ClientNonInviteEvent::SendRequest(request.clone()));
            (ClientFsm::NonInvite(fsm), actions)
        };
        debug!(
            %key,
            call_id = request.call_id().unwrap_or_default(),
            "client transaction started"
        );
        self.clients.insert(
            key.clone(),
            ClientEntry {
                fsm,
                request,
                user,
                terminated: false,
            },
        );
        self.process_client_actions(&key, actions);
        Ok(key)
    }

    pub(crate) fn client_request(&self, key: &TransactionKey) -> Option<&Request> {
        self.clients
            .get(key)
            .filter(|entry| !entry.terminated)
            .map(|entry| &entry.request)
    }

    pub(crate) fn client_event(
        &mut self,
        key: &TransactionKey,
        event: ClientEvent,
    ) -> Vec<ClientAction> {
        let Some(entry) = self.clients.get_mut(key) else {
            return Vec::new();
        };
        match &mut entry.fsm {
            ClientFsm::Invite(fsm) => fsm.on_event(match event {
                ClientEvent::Response(response) => ClientInviteEvent::ReceiveResponse(response),
                ClientEvent::Timer(timer) => ClientInviteEvent::TimerFired(timer),
                ClientEvent::TransportError => ClientInviteEvent::TransportError,
                ClientEvent::Cancel => ClientInviteEvent::CancelRequested,
            }),
            ClientFsm::NonInvite(fsm) => match event {
                ClientEvent::Response(response) => {
                    fsm.on_event(ClientNonInviteEvent::ReceiveResponse(response))
                }
                ClientEvent::Timer(timer) => fsm.on_event(ClientNonInviteEvent::TimerFired(timer)),
                ClientEvent::TransportError => fsm.on_event(ClientNonInviteEvent::TransportError),
                ClientEvent::Cancel => Vec::new(),
            },
        }
    }

    pub(crate) fn process_client_actions(
        &mut self,
        key: &TransactionKey,
        actions: Vec<ClientAction>,
    ) {
        for action in actions {
            match action {
                ClientAction::Transmit(request) => {
                    if self.send_to_transport(request.into()).is_err() {
                        let follow_up = self.client_event(key, ClientEvent::TransportError);
                        self.process_client_actions(key, follow_up);
                    }
                }
                ClientAction::Deliver(response) => self.client_response(key, response),
                ClientAction::Timeout => self.client_timeout(key),
                ClientAction::TransportFailed => self.client_transport_failed(key),
                ClientAction::SendCancel => self.send_cancel(key),
                ClientAction::Schedule { timer, duration } => {
                    if self.clients.get(key).is_some_and(|entry| !entry.terminated) {
                        self.arm(TimerTarget::Client(key.clone(), timer), duration);
                    }
                }
                ClientAction::Cancel(timer) => {
                    self.disarm(&TimerTarget::Client(key.clone(), timer));
                }
                ClientAction::Terminate { reason } => self.client_terminated(key, &reason),
            }
        }
    }

    fn client_terminated(&mut self, key: &TransactionKey, reason: &str) {
        let Some(entry) = self.clients.get_mut(key) else {
            return;
        };
        if entry.terminated {
            return;
        }
        entry.terminated = true;
        debug!(%key, reason, "client transaction terminated");
        let early = match &entry.user {
            ClientUser::Invite(invite) => invite.early.clone(),
            _ => Vec::new(),
        };
        self.disarm_where(|target| matches!(target, TimerTarget::Client(owner, _) if owner == key));
        for id in early {
            if self.sessions.get(&id).is_some_and(|entry| entry.session.dialog.is_early()) {
                self.terminate_session(&id);
            }
        }
        let key = key.clone();
        self.notify(move |core| {
            core.clients.remove(&key);
        });
    }

    fn client_response(&mut self, key: &TransactionKey, response: Response) {
        let Some(entry) = self.clients.get(key) else {
            return;
        };
        match &entry.user {
            ClientUser::Invite(_) => self.invite_client_response(key, response),
            ClientUser::Request(request) => {
                let role = request.role;
                let dialog = request.dialog.clone();
                self.request_client_response(key, role, dialog, response);
            }
            ClientUser::Detached => {
                warn!(%key, "response while transaction user is busy");
            }
        }
    }

    fn request_client_response(
        &mut self,
        key: &TransactionKey,
        role: RequestRole,
        dialog: Option<DialogId>,
        response: Response,
    ) {
        match (role, &dialog) {
            (RequestRole::Update, Some(id)) => self.update_response(id, &response),
            (RequestRole::Subscribe, _) => self.subscribe_response(key, &response),
            (RequestRole::Resubscribe, Some(id)) => self.resubscribe_response(id, &response),
            _ => {}
        }
        if let Some(id) = &dialog {
            if matches!(response.code(), 408 | 481) {
                warn!(dialog = %id, code = response.code(), "in-dialog request failed, ending dialog");
                self.terminate_dialog(id);
            }
        }
        self.notify_request_outcome(key, Outcome::Response(response));
    }

    fn client_timeout(&mut self, key: &TransactionKey) {
        let Some(entry) = self.clients.get(key) else {
            return;
        };
        match &entry.user {
            ClientUser::Invite(invite) => {
                let reinvite = invite.reinvite.clone();
                self.invite_failed(key, reinvite.as_ref());
                self.notify_invite_outcome(key, Outcome::Timeout);
            }
            ClientUser::Request(request) => {
                let (role, dialog) = (request.role, request.dialog.clone());
                match (role, &dialog) {
                    (RequestRole::Update, Some(id)) => self.rollback_session(id),
                    (RequestRole::Subscribe, _) => self.subscribe_failed(key, None),
                    _ => {}
                }
                if let Some(id) = &dialog {
                    self.terminate_dialog(id);
                }
                self.notify_request_outcome(key, Outcome::Timeout);
            }
            ClientUser::Detached => {}
        }
    }

    fn client_transport_failed(&mut self, key: &TransactionKey) {
        let Some(entry) = self.clients.get(key) else {
            return;
        };
        match &entry.user {
            ClientUser::Invite(invite) => {
                let reinvite = invite.reinvite.clone();
                self.invite_failed(key, reinvite.as_ref());
                self.notify_invite_outcome(key, Outcome::TransportError);
            }
            ClientUser::Request(request) => {
                let (role, dialog) = (request.role, request.dialog.clone());
                match (role, &dialog) {
                    (RequestRole::Update, Some(id)) => self.rollback_session(id),
                    (RequestRole::Subscribe, _) => self.subscribe_failed(key, None),
                    _ => {}
                }
                self.notify_request_outcome(key, Outcome::TransportError);
            }
            ClientUser::Detached => {}
        }
    }

    fn send_cancel(&mut self, key: &TransactionKey) {
        let Some(entry) = self.clients.get(key) else {
            return;
        };
        let headers = match &entry.user {
            ClientUser::Invite(invite) => invite.cancel_headers.clone(),
            _ => Vec::new(),
        };
        let cancel = build_cancel(&entry.request, &headers);
        let user = ClientUser::Request(RequestClient {
            delegate: None,
            dialog: None,
            role: RequestRole::Plain,
        });
        if let Err(err) = self.start_client_transaction(cancel, user) {
            warn!(%key, %err, "CANCEL not sent");
        }
    }

    /// Asks an INVITE client transaction to cancel; the CANCEL goes out
    /// now or on the first provisional.
    pub(crate) fn cancel_invite(
        &mut self,
        key: &TransactionKey,
        headers: Vec<(SmolStr, SmolStr)>,
    ) -> Result<(), CoreError> {
        let entry = self
            .clients
            .get_mut(key)
            .filter(|entry| !entry.terminated)
            .ok_or_else(|| CoreError::UnknownTransaction(key.clone()))?;
        match &mut entry.user {
            ClientUser::Invite(invite) => invite.cancel_headers = headers,
            _ => {
                return Err(CoreError::InvalidState {
                    operation: "cancel",
                    state: "not an INVITE",
                })
            }
        }
        let actions = self.client_event(key, ClientEvent::Cancel);
        self.process_client_actions(key, actions);
        Ok(())
    }

    pub(crate) fn notify_request_outcome(&mut self, key: &TransactionKey, outcome: Outcome) {
        let key = key.clone();
        self.notify(move |core| {
            core.with_client_user(&key, |user, core| {
                let ClientUser::Request(RequestClient {
                    delegate: Some(delegate),
                    ..
                }) = user
                else {
                    return;
                };
                match &outcome {
                    Outcome::Response(response) => match response.code() {
                        100 => delegate.on_trying(core, response),
                        101..=199 => delegate.on_progress(core, response),
                        200..=299 => delegate.on_accept(core, response),
                        300..=399 => delegate.on_redirect(core, response),
                        _ => delegate.on_reject(core, response),
                    },
                    Outcome::Timeout => delegate.on_timeout(core),
                    Outcome::TransportError => delegate.on_transport_error(core),
                }
            });
        });
    }
}

/// What a client transaction reports to its user.
#[derive(Debug)]
pub(crate) enum Outcome {
    Response(Response),
    Timeout,
    TransportError,
}
