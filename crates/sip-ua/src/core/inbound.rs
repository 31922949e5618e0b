// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Routing of inbound messages.

use rand::Rng;
use sip_core::{
    EventHeader, HeaderAccess, Method, Request, Response, SipMessage,
};
use sip_dialog::{Dialog, DialogError, DialogId, OfferSide, SubscriptionDialog};
use sip_transaction::{ServerInviteState, TransactionKey};
use smol_str::SmolStr;
use tracing::{debug, warn};

use super::client::ClientEvent;
use super::server::ServerEvent;
use super::{ServerFsm, ServerRole, SubscriptionEntry, UserAgentCore};
use crate::methods::{
    ByeUas, InfoUas, InviteUas, MessageUas, NotifyUas, PrackUas, ReInviteUas, ReferOrigin,
    ReferUas, SubscribeUas, UpdateUas,
};
use crate::session::SessionHandle;
use crate::subscription::SubscriptionHandle;
use crate::uas::{ResponseOptions, UserAgentServer};

/// Headers every request must carry before the core looks at it.
fn malformed(request: &Request) -> Option<&'static str> {
    if request.top_via().is_none() {
        return Some("Via");
    }
    if request.call_id().is_none() {
        return Some("Call-ID");
    }
    if request.from_addr().is_none() {
        return Some("From");
    }
    if request.to_addr().is_none() {
        return Some("To");
    }
    match request.cseq() {
        Some(cseq) if &cseq.method == request.method() => None,
        _ => Some("CSeq"),
    }
}

impl UserAgentCore {
    /// Feeds one inbound message to the core.
    pub fn receive_message(&mut self, message: SipMessage) {
        match message {
            SipMessage::Request(request) => self.receive_request(request),
            SipMessage::Response(response) => self.receive_response(response),
        }
        self.drain();
    }

    fn receive_response(&mut self, response: Response) {
        let Some(key) = TransactionKey::from_response(&response) else {
            warn!(code = response.code(), "response without usable Via/CSeq dropped");
            return;
        };
        if self.clients.get(&key).is_some_and(|entry| !entry.terminated) {
            let actions = self.client_event(&key, ClientEvent::Response(response));
            self.process_client_actions(&key, actions);
            return;
        }
        if key.method == Method::Invite && response.is_success() {
            self.resend_ack(&response);
            return;
        }
        debug!(%key, code = response.code(), "stray response dropped");
    }

    /// Answers a retransmitted 2xx whose transaction is gone with the ACK
    /// already sent for it.
    pub(crate) fn resend_ack(&mut self, response: &Response) {
        let ack = DialogId::from_uac_response(response)
            .and_then(|id| self.sessions.get(&id))
            .and_then(|entry| entry.session.ack_for_retransmission(response))
            .cloned();
        match ack {
            Some(ack) => {
                debug!(call_id = response.call_id().unwrap_or_default(), "2xx retransmission, ACK resent");
                let _ = self.send_to_transport(ack.into());
            }
            None => debug!(
                call_id = response.call_id().unwrap_or_default(),
                "2xx for unknown session dropped"
            ),
        }
    }

    fn receive_request(&mut self, request: Request) {
        let is_ack = request.method() == &Method::Ack;

        if let Some(header) = malformed(&request) {
            if !is_ack && request.top_via().is_some() {
                warn!(header, "malformed request rejected");
                self.reply_stateless(
                    &request,
                    400,
                    &[("Warning", SmolStr::new(format!("399 - \"bad {}\"", header)))],
                );
            } else {
                warn!(header, "malformed request dropped");
            }
            return;
        }

        if let Method::Unknown(token) = request.method() {
            debug!(method = %token, "unknown method");
            if !is_ack {
                self.reply_stateless(&request, 501, &[("Allow", self.allow_value())]);
            }
            return;
        }
        if !self.resolved.allowed.contains(request.method()) {
            if !is_ack {
                self.reply_stateless(&request, 405, &[("Allow", self.allow_value())]);
            }
            return;
        }

        if !matches!(request.method(), Method::Ack | Method::Cancel) {
            let unsupported: Vec<SmolStr> = request
                .headers
                .get_list("Require")
                .into_iter()
                .filter(|tag| {
                    !self
                        .config
                        .supported
                        .iter()
                        .any(|supported| supported.eq_ignore_ascii_case(tag))
                })
                .collect();
            if !unsupported.is_empty() {
                self.reply_stateless(
                    &request,
                    420,
                    &[("Unsupported", SmolStr::new(unsupported.join(", ")))],
                );
                return;
            }
        }

        let Some(key) = TransactionKey::from_request(&request, true) else {
            if !is_ack {
                self.reply_stateless(&request, 400, &[]);
            }
            return;
        };

        if let Some(entry) = self.servers.get(&key) {
            let accepted = matches!(
                &entry.fsm,
                ServerFsm::Invite(fsm) if fsm.state == ServerInviteState::Accepted
            );
            if !is_ack {
                debug!(%key, "retransmission absorbed");
                let actions = self.server_event(&key, ServerEvent::Retransmission);
                self.process_server_actions(&key, actions);
                return;
            }
            if !accepted {
                let actions = self.server_event(&key, ServerEvent::Ack);
                self.process_server_actions(&key, actions);
                return;
            }
        }

        if request.method() == &Method::Cancel {
            self.receive_cancel(request, key);
            return;
        }

        if request.to_tag().is_some() {
            self.receive_in_dialog(request);
            return;
        }

        if is_ack {
            debug!("ACK outside any transaction or dialog dropped");
            return;
        }

        if self.is_merged(&request, &key) || self.is_looped(&request) {
            warn!(
                call_id = request.call_id().unwrap_or_default(),
                "merged or looped request"
            );
            self.reply_stateless(&request, 482, &[]);
            return;
        }

        self.receive_out_of_dialog(request);
    }

    fn allow_value(&self) -> SmolStr {
        SmolStr::new(self.config.allow_header())
    }

    /// Same From tag, Call-ID and CSeq as a request already being served,
    /// but another branch (RFC 3261 §8.2.2.2).
    fn is_merged(&self, request: &Request, key: &TransactionKey) -> bool {
        let identity = (request.from_tag(), request.call_id(), request.cseq());
        self.servers.iter().any(|(other, entry)| {
            other != key
                && !entry.terminated
                && entry.request.to_tag().is_none()
                && (
                    entry.request.from_tag(),
                    entry.request.call_id(),
                    entry.request.cseq(),
                ) == identity
        })
    }

    /// A request we sent ourselves came back.
    fn is_looped(&self, request: &Request) -> bool {
        let identity = (request.from_tag(), request.call_id(), request.cseq());
        self.clients.values().any(|entry| {
            (
                entry.request.from_tag(),
                entry.request.call_id(),
                entry.request.cseq(),
            ) == identity
        })
    }

    fn receive_cancel(&mut self, cancel: Request, key: TransactionKey) {
        let invite_key = TransactionKey::new(key.branch.clone(), Method::Invite, true);
        let Some(invite) = self.live_server(&invite_key) else {
            self.reply_stateless(&cancel, 481, &[]);
            return;
        };
        let role = invite.role;
        let cancel_key = match self.start_server_transaction(cancel, ServerRole::Plain, None) {
            Ok(key) => key,
            Err(err) => {
                warn!(%err, "CANCEL not served");
                return;
            }
        };
        let _ = self.respond(&cancel_key, 200, ResponseOptions::default());
        if !self.invite_proceeding(&invite_key) {
            debug!(invite = %invite_key, "CANCEL after final response");
            return;
        }
        if let Err(err) = self.respond(&invite_key, 487, ResponseOptions::default()) {
            warn!(invite = %invite_key, %err, "487 not sent");
            return;
        }
        if role == ServerRole::Invite {
            self.notify(move |core| {
                core.with_core_delegate(|delegate, core| {
                    delegate.on_invite_cancelled(core, &invite_key)
                });
            });
        }
    }

    fn receive_in_dialog(&mut self, request: Request) {
        let Some(id) = DialogId::from_incoming_request(&request) else {
            return;
        };
        if self.subscription(&id).is_some() {
            self.subscription_request(id, request);
            return;
        }
        if self.session(&id).is_some() {
            self.session_request(id, request);
            return;
        }
        if request.method() == &Method::Notify {
            if let Some(id) = self.subscription_from_notify(&request) {
                self.subscription_request(id, request);
                return;
            }
        }
        if request.method() == &Method::Ack {
            debug!(dialog = %id, "ACK for unknown dialog dropped");
            return;
        }
        warn!(dialog = %id, method = %request.method(), "request for unknown dialog");
        self.reply_stateless(&request, 481, &[]);
    }

    /// A NOTIFY that beat the 2xx to our SUBSCRIBE: the dialog is created
    /// from the NOTIFY (RFC 6665 §4.1.2.4).
    fn subscription_from_notify(&mut self, notify: &Request) -> Option<DialogId> {
        let event = notify.header("Event").and_then(EventHeader::parse)?;
        let key = self
            .pending_subscribes
            .iter()
            .find(|(_, pending)| {
                pending.dialog.is_none()
                    && pending.request.call_id() == notify.call_id()
                    && pending.request.from_tag() == notify.to_tag()
                    && pending.event.matches(&event)
            })
            .map(|(key, _)| key.clone())?;
        let pending = self.pending_subscribes.get_mut(&key)?;
        let dialog = match Dialog::new_subscriber(&pending.request, notify) {
            Ok(dialog) => dialog,
            Err(err) => {
                warn!(%err, "NOTIFY cannot form a subscription");
                return None;
            }
        };
        let id = dialog.id.clone();
        pending.dialog = Some(id.clone());
        let mut subscription =
            SubscriptionDialog::new(dialog, pending.event.clone(), self.resolved.timers);
        subscription.set_auto_refresh(pending.auto_refresh);
        let delegate = pending.delegate.take();
        let expires = pending.expires;
        debug!(dialog = %id, "subscription created by NOTIFY");
        let actions = subscription.start();
        self.subscriptions.insert(
            id.clone(),
            SubscriptionEntry {
                subscription,
                delegate,
                expires,
                notifier: false,
            },
        );
        self.apply_subscription_actions(&id, actions);
        Some(id)
    }

    /// Sequences an in-dialog request; out-of-order requests get 500.
    fn sequence(&mut self, id: &DialogId, request: &Request) -> bool {
        let result = match self.dialog_mut(id) {
            Ok(dialog) => dialog.receive_request(request),
            Err(_) => Err(DialogError::Terminated),
        };
        match result {
            Ok(()) => true,
            Err(DialogError::OutOfOrder { received, current }) => {
                warn!(dialog = %id, received, current, "out-of-order request");
                self.reply_stateless(request, 500, &[]);
                false
            }
            Err(err) => {
                warn!(dialog = %id, %err, "in-dialog request refused");
                self.reply_stateless(request, 400, &[]);
                false
            }
        }
    }

    fn serve(
        &mut self,
        request: Request,
        role: ServerRole,
        dialog: Option<DialogId>,
    ) -> Option<TransactionKey> {
        match self.start_server_transaction(request, role, dialog) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(%err, "request not served");
                None
            }
        }
    }

    fn session_request(&mut self, id: DialogId, request: Request) {
        if request.method() == &Method::Ack {
            let Some(entry) = self.sessions.get_mut(&id) else {
                return;
            };
            match entry.session.receive_ack(&request) {
                Some(actions) => {
                    self.apply_session_actions(&id, actions);
                    self.notify(move |core| {
                        core.with_session_delegate(&id, |delegate, core| {
                            delegate.on_ack(core, SessionHandle::new(id.clone()))
                        });
                    });
                }
                None => debug!(dialog = %id, "ACK matched nothing"),
            }
            return;
        }

        if !self.sequence(&id, &request) {
            return;
        }

        let method = request.method().clone();
        match method {
            Method::Invite | Method::Update => {
                let body = request.body();
                let has_offer = body.as_ref().is_some_and(|body| body.is_session());
                let conflict = self.sessions.get(&id).and_then(|entry| {
                    entry
                        .session
                        .incoming_offer_conflict(method == Method::Invite, has_offer)
                });
                if let Some(code) = conflict {
                    self.reject_glare(request, code);
                    return;
                }
                let role = if method == Method::Invite {
                    ServerRole::ReInvite
                } else {
                    ServerRole::Update
                };
                let Some(key) = self.serve(request, role, Some(id.clone())) else {
                    return;
                };
                let offer = self.sessions.get_mut(&id).map(|entry| {
                    if method == Method::Invite {
                        entry.session.set_incoming_reinvite(true);
                    }
                    entry
                        .session
                        .signaling_transition(body.as_ref(), OfferSide::Remote)
                });
                if let Some(Err(err)) = offer {
                    warn!(dialog = %id, %err, "unacceptable offer");
                    let _ = self.respond(&key, 488, ResponseOptions::default());
                    return;
                }
                self.notify(move |core| {
                    let uas = UserAgentServer::new(key);
                    core.with_session_delegate(&id, |delegate, core| {
                        if method == Method::Invite {
                            delegate.on_invite(core, ReInviteUas::new(uas, id.clone()));
                        } else {
                            delegate.on_update(core, UpdateUas::new(uas, id.clone()));
                        }
                    });
                });
            }
            Method::Bye => {
                let Some(key) = self.serve(request, ServerRole::Plain, Some(id.clone())) else {
                    return;
                };
                let bye_id = id.clone();
                self.notify(move |core| {
                    core.with_session_delegate(&bye_id, |delegate, core| {
                        delegate.on_bye(core, ByeUas::new(UserAgentServer::new(key)));
                    });
                });
                self.terminate_session(&id);
            }
            Method::Prack => {
                if request.header("RAck").is_none() {
                    self.reply_stateless(&request, 400, &[]);
                    return;
                }
                let body = request.body();
                let Some(key) = self.serve(request, ServerRole::Plain, Some(id.clone())) else {
                    return;
                };
                if let Some(entry) = self.sessions.get_mut(&id) {
                    if let Err(err) = entry
                        .session
                        .signaling_transition(body.as_ref(), OfferSide::Remote)
                    {
                        warn!(dialog = %id, %err, "ignoring PRACK body");
                    }
                }
                self.notify(move |core| {
                    core.with_session_delegate(&id, |delegate, core| {
                        delegate.on_prack(core, PrackUas::new(UserAgentServer::new(key)));
                    });
                });
            }
            Method::Info | Method::Message | Method::Notify | Method::Refer => {
                let Some(key) = self.serve(request, ServerRole::Plain, Some(id.clone())) else {
                    return;
                };
                self.notify(move |core| {
                    let uas = UserAgentServer::new(key);
                    core.with_session_delegate(&id, |delegate, core| match method {
                        Method::Info => delegate.on_info(core, InfoUas::new(uas)),
                        Method::Message => delegate.on_message(core, MessageUas::new(uas)),
                        Method::Notify => delegate.on_notify(core, NotifyUas::new(uas)),
                        _ => delegate.on_refer(
                            core,
                            ReferUas::new(uas, ReferOrigin::InDialog(id.clone())),
                        ),
                    });
                });
            }
            Method::Options => {
                if let Some(key) = self.serve(request, ServerRole::Plain, Some(id)) {
                    self.answer_options(&key);
                }
            }
            Method::Subscribe => {
                debug!(dialog = %id, "SUBSCRIBE inside an INVITE session refused");
                self.reply_stateless(&request, 489, &[]);
            }
            _ => {
                self.reply_stateless(&request, 405, &[("Allow", self.allow_value())]);
            }
        }
    }

    /// 491 when our own offer is outstanding, 500 with Retry-After when
    /// theirs is (RFC 3261 §14.2).
    fn reject_glare(&mut self, request: Request, code: u16) {
        warn!(
            call_id = request.call_id().unwrap_or_default(),
            code, "offer collision"
        );
        let Some(key) = self.serve(request, ServerRole::Plain, None) else {
            return;
        };
        let mut options = ResponseOptions::status(code);
        if code == 500 {
            let retry_after = rand::thread_rng().gen_range(0..=10);
            options = options.with_header("Retry-After", retry_after.to_string());
        }
        let _ = self.respond(&key, code, options);
    }

    fn subscription_request(&mut self, id: DialogId, request: Request) {
        match request.method() {
            Method::Ack => return,
            Method::Notify | Method::Subscribe => {}
            _ => {
                self.reply_stateless(&request, 405, &[("Allow", self.allow_value())]);
                return;
            }
        }
        let notifier = self
            .subscriptions
            .get(&id)
            .is_some_and(|entry| entry.notifier);
        if request.method() == &Method::Notify && !notifier {
            let screened = self
                .subscriptions
                .get(&id)
                .map(|entry| entry.subscription.screen_notify(&request));
            if let Some(Err(err)) = screened {
                warn!(dialog = %id, %err, "NOTIFY refused");
                self.reply_stateless(&request, 489, &[]);
                return;
            }
        }
        if !self.sequence(&id, &request) {
            return;
        }
        if request.method() == &Method::Notify {
            if notifier {
                self.reply_stateless(&request, 403, &[]);
                return;
            }
            self.receive_notify(id, request);
        } else {
            if !notifier {
                self.reply_stateless(&request, 403, &[]);
                return;
            }
            self.receive_resubscribe(id, request);
        }
    }

    fn receive_notify(&mut self, id: DialogId, request: Request) {
        let now = self.now();
        let result = match self.subscriptions.get_mut(&id) {
            Some(entry) => entry.subscription.receive_notify(&request, now),
            None => return,
        };
        let Some(key) = self.serve(request, ServerRole::Plain, Some(id.clone())) else {
            return;
        };
        match result {
            Ok(actions) => {
                let notified = id.clone();
                self.notify(move |core| {
                    core.with_subscription_delegate(&notified, |delegate, core| {
                        delegate.on_notify(
                            core,
                            SubscriptionHandle::new(notified.clone()),
                            NotifyUas::new(UserAgentServer::new(key)),
                        );
                    });
                });
                self.apply_subscription_actions(&id, actions);
            }
            Err(DialogError::Terminated) => {
                let _ = self.respond(&key, 481, ResponseOptions::default());
            }
            Err(err) => {
                warn!(dialog = %id, %err, "NOTIFY refused");
                let _ = self.respond(&key, 489, ResponseOptions::default());
            }
        }
    }

    /// Notifier side: a refresh or an unsubscribe from the subscriber. A
    /// refresh never gets more than the duration first granted.
    fn receive_resubscribe(&mut self, id: DialogId, request: Request) {
        let granted = self
            .subscriptions
            .get(&id)
            .map_or(self.config.subscribe_expires, |entry| entry.expires);
        let expires = request
            .header("Expires")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(self.config.subscribe_expires)
            .min(granted);
        let Some(key) = self.serve(request, ServerRole::Plain, Some(id.clone())) else {
            return;
        };
        let options = ResponseOptions::default().with_header("Expires", expires.to_string());
        if self.respond(&key, 200, options).is_err() {
            return;
        }
        if expires > 0 {
            let now = self.now();
            if let Some(entry) = self.subscriptions.get_mut(&id) {
                let actions = entry.subscription.set_subscription_expires(expires, now);
                self.apply_subscription_actions(&id, actions);
            }
        }
        self.notify(move |core| {
            core.with_subscription_delegate(&id, |delegate, core| {
                delegate.on_resubscribe(core, SubscriptionHandle::new(id.clone()), expires)
            });
        });
    }

    fn receive_out_of_dialog(&mut self, request: Request) {
        let method = request.method().clone();
        match method {
            Method::Invite => {
                let (Some(call_id), Some(remote_tag)) =
                    (request.call_id().map(SmolStr::new), request.from_tag())
                else {
                    self.reply_stateless(&request, 400, &[]);
                    return;
                };
                let Some(key) = self.serve(request, ServerRole::Invite, None) else {
                    return;
                };
                let Some(entry) = self.servers.get_mut(&key) else {
                    return;
                };
                let id = DialogId::new(call_id, entry.local_tag.clone(), remote_tag);
                entry.dialog = Some(id);
                self.notify(move |core| {
                    core.with_core_delegate(|delegate, core| {
                        delegate.on_invite(core, InviteUas::new(UserAgentServer::new(key)))
                    });
                });
            }
            Method::Options => {
                if let Some(key) = self.serve(request, ServerRole::Plain, None) {
                    self.answer_options(&key);
                }
            }
            Method::Subscribe => {
                if request.header("Event").and_then(EventHeader::parse).is_none() {
                    self.reply_stateless(&request, 489, &[]);
                    return;
                }
                let Some(key) = self.serve(request, ServerRole::Plain, None) else {
                    return;
                };
                self.notify(move |core| {
                    core.with_core_delegate(|delegate, core| {
                        delegate.on_subscribe(core, SubscribeUas::new(UserAgentServer::new(key)))
                    });
                });
            }
            Method::Message
            | Method::Notify
            | Method::Refer
            | Method::Register
            | Method::Publish => {
                let Some(key) = self.serve(request, ServerRole::Plain, None) else {
                    return;
                };
                self.notify(move |core| {
                    let uas = UserAgentServer::new(key);
                    core.with_core_delegate(|delegate, core| match method {
                        Method::Message => delegate.on_message(core, MessageUas::new(uas)),
                        Method::Notify => delegate.on_notify(core, NotifyUas::new(uas)),
                        Method::Refer => delegate
                            .on_refer(core, ReferUas::new(uas, ReferOrigin::OutOfDialog)),
                        Method::Register => delegate.on_register(core, uas),
                        _ => delegate.on_publish(core, uas),
                    });
                });
            }
            _ => {
                debug!(method = %method, "in-dialog method without a dialog");
                self.reply_stateless(&request, 481, &[]);
            }
        }
    }

    fn answer_options(&mut self, key: &TransactionKey) {
        let mut options = ResponseOptions::default()
            .with_header("Allow", self.config.allow_header())
            .with_header("Accept", self.config.accept.join(", "));
        if !self.config.supported.is_empty() {
            options = options.with_header("Supported", self.config.supported.join(", "));
        }
        let _ = self.respond(key, 200, options);
    }
}
