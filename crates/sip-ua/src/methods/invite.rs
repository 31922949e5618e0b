// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! INVITE: the client and server of initial INVITEs and re-INVITEs.

use sip_core::rseq::parse_rseq;
use sip_core::{HeaderAccess, Method, Request, Response};
use sip_dialog::{Dialog, DialogId, OfferSide, SessionDialog};
use sip_transaction::TransactionKey;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use super::deref_to_server;
use crate::core::{ClientUser, InviteClient, Outcome, SessionEntry, TimerTarget, UserAgentCore};
use crate::delegate::{InviteClientDelegate, SessionDelegate};
use crate::error::CoreError;
use crate::session::SessionHandle;
use crate::uac::UserAgentClient;
use crate::uas::{ResponseOptions, UserAgentServer};

/// Sends an initial INVITE and reports its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InviteUac {
    uac: UserAgentClient,
}

impl InviteUac {
    /// Sends `request`, typically built with
    /// [`UserAgentCore::make_outgoing_request`]. A body is the offer.
    pub fn send(
        core: &mut UserAgentCore,
        request: Request,
        delegate: Box<dyn InviteClientDelegate>,
    ) -> Result<Self, CoreError> {
        if request.method() != &Method::Invite {
            return Err(CoreError::MalformedRequest("method"));
        }
        let user = ClientUser::Invite(InviteClient {
            delegate: Some(delegate),
            reinvite: None,
            early: Vec::new(),
            cancel_headers: Vec::new(),
        });
        UserAgentClient::send_with(core, request, user).map(|uac| Self { uac })
    }

    pub fn key(&self) -> &TransactionKey {
        self.uac.key()
    }

    pub fn request<'c>(&self, core: &'c UserAgentCore) -> Option<&'c Request> {
        self.uac.request(core)
    }

    /// Cancels the call. Before any provisional the CANCEL waits for one
    /// (RFC 3261 §9.1); after a final response it is a no-op.
    pub fn cancel(&self, core: &mut UserAgentCore, reason: Option<&str>) -> Result<(), CoreError> {
        let headers = reason
            .map(|reason| vec![(SmolStr::new("Reason"), SmolStr::new(reason))])
            .unwrap_or_default();
        let result = core.cancel_invite(self.uac.key(), headers);
        core.drain();
        result
    }
}

/// An initial INVITE received out of dialog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InviteUas {
    uas: UserAgentServer,
}

deref_to_server!(InviteUas, ReInviteUas);

impl InviteUas {
    pub(crate) fn new(uas: UserAgentServer) -> Self {
        Self { uas }
    }

    /// The session this INVITE creates, once it exists: from the first
    /// tagged provisional or the 2xx.
    pub fn session(&self, core: &UserAgentCore) -> Option<SessionHandle> {
        let id = core.live_server(self.uas.key())?.dialog.clone()?;
        core.session(&id).map(|_| SessionHandle::new(id))
    }

    /// Unreliable 1xx; creates the early session.
    pub fn progress(
        &self,
        core: &mut UserAgentCore,
        options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        options.code(180, 101..=199, "progress")?;
        let early = self.session(core).is_some();
        let id = core.ensure_uas_session(self.uas.key())?;
        let options = with_contact(core, self.uas.request(core), options);
        let sent = core
            .signal_local(&id, options.body.as_ref())
            .and_then(|()| self.uas.progress(core, options));
        if sent.is_err() {
            core.discard_uas_session(&id, early);
        }
        sent
    }

    /// 1xx sent reliably (RFC 3262): Require: 100rel and a fresh RSeq. The
    /// peer must have offered 100rel.
    pub fn progress_reliable(
        &self,
        core: &mut UserAgentCore,
        options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        options.code(183, 101..=199, "progress")?;
        let offered = self.uas.request(core).is_some_and(|invite| {
            invite.has_option_tag("Supported", "100rel")
                || invite.has_option_tag("Require", "100rel")
        });
        if !offered {
            return Err(CoreError::InvalidState {
                operation: "progress_reliable",
                state: "peer does not support 100rel",
            });
        }
        let early = self.session(core).is_some();
        let id = core.ensure_uas_session(self.uas.key())?;
        let sent = core.signal_local(&id, options.body.as_ref()).and_then(|()| {
            let rseq = core
                .sessions
                .get_mut(&id)
                .map(|entry| entry.session.next_rseq())
                .ok_or_else(|| CoreError::UnknownDialog(id.clone()))?;
            let mut options = with_contact(core, self.uas.request(core), options)
                .with_header("Require", "100rel")
                .with_header("RSeq", rseq.to_string());
            if options.status.is_none() {
                options.status = Some(183);
            }
            self.uas.progress(core, options)
        });
        if sent.is_err() {
            core.discard_uas_session(&id, early);
        }
        sent
    }

    /// 2xx; the session is confirmed and `delegate` receives its in-dialog
    /// requests. A body is required when the INVITE carried an offer that
    /// is still unanswered, or carried none.
    pub fn accept(
        &self,
        core: &mut UserAgentCore,
        options: ResponseOptions,
        delegate: Box<dyn SessionDelegate>,
    ) -> Result<SessionHandle, CoreError> {
        let code = options.code(200, 200..=299, "accept")?;
        let early = self.session(core).is_some();
        let id = core.ensure_uas_session(self.uas.key())?;
        let needs_body = core
            .sessions
            .get(&id)
            .is_some_and(|entry| entry.session.needs_body_for_accept());
        if needs_body && options.body.is_none() {
            core.discard_uas_session(&id, early);
            return Err(CoreError::BodyRequired);
        }
        if let Err(err) = core.signal_local(&id, options.body.as_ref()) {
            core.discard_uas_session(&id, early);
            return Err(err);
        }
        let previous = core
            .sessions
            .get_mut(&id)
            .and_then(|entry| entry.delegate.replace(delegate));
        let options = with_dialog_headers(core, self.uas.request(core), options);
        if let Err(err) = self.uas.send(core, code, options) {
            if let Some(entry) = core.sessions.get_mut(&id) {
                entry.delegate = previous;
            }
            core.discard_uas_session(&id, early);
            return Err(err);
        }
        Ok(SessionHandle::new(id))
    }
}

/// An INVITE inside an established session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReInviteUas {
    uas: UserAgentServer,
    session: DialogId,
}

impl ReInviteUas {
    pub(crate) fn new(uas: UserAgentServer, session: DialogId) -> Self {
        Self { uas, session }
    }

    pub fn session(&self) -> SessionHandle {
        SessionHandle::new(self.session.clone())
    }

    /// True when the re-INVITE carried an offer.
    pub fn has_offer(&self, core: &UserAgentCore) -> bool {
        self.uas
            .request(core)
            .and_then(|request| request.body())
            .is_some_and(|body| body.is_session())
    }

    /// 2xx; carries the answer, or a new offer for an offerless re-INVITE.
    pub fn accept(
        &self,
        core: &mut UserAgentCore,
        options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        let code = options.code(200, 200..=299, "accept")?;
        let needs_body = core
            .session(&self.session)
            .ok_or_else(|| CoreError::UnknownDialog(self.session.clone()))?
            .needs_body_for_accept();
        if needs_body && options.body.is_none() {
            return Err(CoreError::BodyRequired);
        }
        core.signal_local(&self.session, options.body.as_ref())?;
        let options = with_dialog_headers(core, self.uas.request(core), options);
        self.uas.send(core, code, options)
    }
}

/// Record-Route echoed and Contact, on every dialog-creating response
/// (RFC 3261 §12.1.1).
fn with_contact(
    core: &UserAgentCore,
    invite: Option<&Request>,
    mut options: ResponseOptions,
) -> ResponseOptions {
    if let Some(invite) = invite {
        for route in invite.headers.get_all("Record-Route") {
            options
                .extra_headers
                .push((SmolStr::new("Record-Route"), route.clone()));
        }
    }
    options.with_header("Contact", core.resolved.contact.to_string())
}

/// [`with_contact`] plus Allow and Supported, for a 2xx to INVITE.
fn with_dialog_headers(
    core: &UserAgentCore,
    invite: Option<&Request>,
    options: ResponseOptions,
) -> ResponseOptions {
    let mut options =
        with_contact(core, invite, options).with_header("Allow", core.config.allow_header());
    if !core.config.supported.is_empty() {
        options = options.with_header("Supported", core.config.supported.join(", "));
    }
    options
}

impl UserAgentCore {
    /// The UAS session for an INVITE server transaction, created early on
    /// first use with the INVITE's offer applied.
    pub(crate) fn ensure_uas_session(&mut self, key: &TransactionKey) -> Result<DialogId, CoreError> {
        let entry = self
            .live_server(key)
            .ok_or_else(|| CoreError::UnknownTransaction(key.clone()))?;
        if !self.invite_proceeding(key) {
            return Err(CoreError::InvalidState {
                operation: "respond",
                state: "final response already sent",
            });
        }
        let id = entry
            .dialog
            .clone()
            .ok_or(CoreError::InvalidState {
                operation: "session",
                state: "request does not create a session",
            })?;
        if self.sessions.contains_key(&id) {
            return Ok(id);
        }
        let dialog = Dialog::new_uas(&entry.request, &entry.local_tag, true)?;
        let seq = entry.request.cseq().map(|cseq| cseq.seq).unwrap_or(1);
        let offer = entry.request.body();
        let mut session = SessionDialog::new(dialog, seq, self.resolved.timers);
        session.signaling_transition(offer.as_ref(), OfferSide::Remote)?;
        debug!(dialog = %id, "early UAS session");
        self.sessions.insert(id.clone(), SessionEntry::new(session));
        Ok(id)
    }

    /// Drops a UAS session that a failed response created; one that was
    /// already early stays as the provisional left it.
    fn discard_uas_session(&mut self, id: &DialogId, early: bool) {
        if !early {
            debug!(dialog = %id, "response not sent, session discarded");
            self.disarm_where(
                |target| matches!(target, TimerTarget::Session(owner, _) if owner == id),
            );
            self.sessions.remove(id);
        }
    }

    /// Applies a body we are about to send as offer or answer.
    pub(crate) fn signal_local(
        &mut self,
        id: &DialogId,
        body: Option<&sip_core::Body>,
    ) -> Result<(), CoreError> {
        let entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| CoreError::UnknownDialog(id.clone()))?;
        entry.session.signaling_transition(body, OfferSide::Local)?;
        Ok(())
    }

    pub(crate) fn invite_client_response(&mut self, key: &TransactionKey, response: Response) {
        let Some(entry) = self.clients.get(key) else {
            return;
        };
        let ClientUser::Invite(invite) = &entry.user else {
            return;
        };
        if let Some(id) = invite.reinvite.clone() {
            self.reinvite_response(key, id, response);
            return;
        }
        let request = entry.request.clone();
        match response.code() {
            100 => self.notify_invite(key, move |delegate, core| {
                delegate.on_trying(core, &response)
            }),
            101..=199 => self.invite_provisional(key, &request, response),
            200..=299 => self.invite_accepted(key, &request, response),
            _ => {
                self.invite_failed(key, None);
                self.notify_invite_outcome(key, Outcome::Response(response));
            }
        }
    }

    fn invite_provisional(&mut self, key: &TransactionKey, request: &Request, response: Response) {
        let Some(id) = DialogId::from_uac_response(&response) else {
            self.notify_invite(key, move |delegate, core| {
                delegate.on_progress(core, &response, None)
            });
            return;
        };
        if !self.sessions.contains_key(&id) {
            if let Err(err) = self.start_uac_session(key, request, &response) {
                warn!(dialog = %id, %err, "provisional cannot form an early session");
                return;
            }
        }
        let Some(entry) = self.sessions.get_mut(&id) else {
            return;
        };
        if response.has_option_tag("Require", "100rel") {
            let Some(rseq) = response.header("RSeq").and_then(parse_rseq) else {
                warn!(dialog = %id, "reliable provisional without RSeq dropped");
                return;
            };
            if !entry.session.reliable_sequence_guard(rseq) {
                debug!(dialog = %id, rseq, "reliable provisional already seen");
                return;
            }
            if let Err(err) = entry
                .session
                .signaling_transition(response.body().as_ref(), OfferSide::Remote)
            {
                warn!(dialog = %id, %err, "ignoring provisional body");
            }
        }
        self.notify_invite(key, move |delegate, core| {
            delegate.on_progress(core, &response, Some(SessionHandle::new(id)))
        });
    }

    fn invite_accepted(&mut self, key: &TransactionKey, request: &Request, response: Response) {
        let Some(id) = DialogId::from_uac_response(&response) else {
            warn!(%key, "2xx without To tag dropped");
            return;
        };
        let seq = request.cseq().map(|cseq| cseq.seq).unwrap_or(1);
        match self.sessions.get_mut(&id) {
            Some(entry) if !entry.session.dialog.is_early() => {
                self.resend_ack(&response);
                return;
            }
            Some(entry) => {
                entry.session.dialog.confirm_with(&response);
                entry.session.set_invite_seq(seq);
            }
            None => {
                if let Err(err) = self.start_uac_session(key, request, &response) {
                    warn!(dialog = %id, %err, "2xx cannot form a session");
                    return;
                }
            }
        }
        if let Some(entry) = self.sessions.get_mut(&id) {
            if let Err(err) = entry
                .session
                .signaling_transition(response.body().as_ref(), OfferSide::Remote)
            {
                warn!(dialog = %id, %err, "ignoring 2xx body");
            }
        }
        info!(dialog = %id, "session established");
        self.notify_invite(key, move |delegate, core| {
            delegate.on_accept(core, SessionHandle::new(id), &response)
        });
    }

    /// A UAC session from our INVITE and a tagged response; the INVITE's
    /// body is our offer.
    fn start_uac_session(
        &mut self,
        key: &TransactionKey,
        request: &Request,
        response: &Response,
    ) -> Result<(), CoreError> {
        let dialog = Dialog::new_uac(request, response)?;
        let id = dialog.id.clone();
        let seq = request.cseq().map(|cseq| cseq.seq).unwrap_or(1);
        let mut session = SessionDialog::new(dialog, seq, self.resolved.timers);
        session.signaling_transition(request.body().as_ref(), OfferSide::Local)?;
        self.sessions.insert(id.clone(), SessionEntry::new(session));
        if let Some(ClientUser::Invite(invite)) = self.clients.get_mut(key).map(|entry| &mut entry.user)
        {
            invite.early.push(id);
        }
        Ok(())
    }

    fn reinvite_response(&mut self, key: &TransactionKey, id: DialogId, response: Response) {
        match response.code() {
            100 => self.notify_invite(key, move |delegate, core| {
                delegate.on_trying(core, &response)
            }),
            101..=199 => self.notify_invite(key, move |delegate, core| {
                delegate.on_progress(core, &response, Some(SessionHandle::new(id)))
            }),
            200..=299 => {
                let Some(entry) = self.sessions.get_mut(&id) else {
                    return;
                };
                if !entry.session.outgoing_reinvite_pending() {
                    self.resend_ack(&response);
                    return;
                }
                entry.session.set_outgoing_reinvite(false);
                if let Some(cseq) = response.cseq() {
                    entry.session.set_invite_seq(cseq.seq);
                }
                entry.session.dialog.receive_target_refresh_response(&response);
                if let Err(err) = entry
                    .session
                    .signaling_transition(response.body().as_ref(), OfferSide::Remote)
                {
                    warn!(dialog = %id, %err, "ignoring re-INVITE answer");
                }
                self.notify_invite(key, move |delegate, core| {
                    delegate.on_accept(core, SessionHandle::new(id), &response)
                });
            }
            code => {
                self.invite_failed(key, Some(&id));
                if matches!(code, 408 | 481) {
                    warn!(dialog = %id, code, "re-INVITE failed, ending session");
                    self.terminate_session(&id);
                }
                self.notify_invite_outcome(key, Outcome::Response(response));
            }
        }
    }

    /// Undoes what a failed INVITE left behind: early sessions, or the
    /// pending offer of a re-INVITE.
    pub(crate) fn invite_failed(&mut self, key: &TransactionKey, reinvite: Option<&DialogId>) {
        if let Some(id) = reinvite {
            if let Some(entry) = self.sessions.get_mut(id) {
                entry.session.set_outgoing_reinvite(false);
                entry.session.rollback_offer();
            }
            return;
        }
        let early = match self.clients.get(key).map(|entry| &entry.user) {
            Some(ClientUser::Invite(invite)) => invite.early.clone(),
            _ => return,
        };
        for id in early {
            if self
                .sessions
                .get(&id)
                .is_some_and(|entry| entry.session.dialog.is_early())
            {
                self.terminate_session(&id);
            }
        }
    }

    fn notify_invite(
        &mut self,
        key: &TransactionKey,
        f: impl FnOnce(&mut dyn InviteClientDelegate, &mut UserAgentCore) + Send + 'static,
    ) {
        let key = key.clone();
        self.notify(move |core| {
            core.with_client_user(&key, |user, core| {
                if let ClientUser::Invite(InviteClient {
                    delegate: Some(delegate),
                    ..
                }) = user
                {
                    f(delegate.as_mut(), core);
                }
            });
        });
    }

    pub(crate) fn notify_invite_outcome(&mut self, key: &TransactionKey, outcome: Outcome) {
        self.notify_invite(key, move |delegate, core| match &outcome {
            Outcome::Response(response) if (300..=399).contains(&response.code()) => {
                delegate.on_redirect(core, response)
            }
            Outcome::Response(response) => delegate.on_reject(core, response),
            Outcome::Timeout => delegate.on_timeout(core),
            Outcome::TransportError => delegate.on_transport_error(core),
        });
    }
}
