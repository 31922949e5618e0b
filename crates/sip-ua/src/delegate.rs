// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Application callbacks.
//!
//! Every callback receives the core by `&mut` and may call back into it;
//! callbacks run from the core's notification queue after the event that
//! caused them has been fully processed. Default bodies give the behavior
//! of an application that does not care about the event.

use sip_core::{HeaderAccess, Response};
use sip_dialog::{DialogId, SubscriptionDialogState};
use sip_transaction::TransactionKey;
use tracing::{debug, warn};

use crate::core::UserAgentCore;
use crate::methods::{
    ByeUas, InfoUas, InviteUas, MessageUas, NotifyUas, PrackUas, ReInviteUas, ReferUas,
    SubscribeUas, UpdateUas,
};
use crate::session::SessionHandle;
use crate::subscription::SubscriptionHandle;
use crate::uas::{ResponseOptions, UserAgentServer};

/// Out-of-dialog requests the core cannot answer on its own.
pub trait UserAgentCoreDelegate: Send {
    fn on_invite(&mut self, core: &mut UserAgentCore, invite: InviteUas) {
        let _ = invite.reject(core, ResponseOptions::status(480));
    }

    /// The peer cancelled an INVITE; the core already answered 487.
    fn on_invite_cancelled(&mut self, _core: &mut UserAgentCore, invite: &TransactionKey) {
        debug!(%invite, "INVITE cancelled");
    }

    fn on_message(&mut self, core: &mut UserAgentCore, message: MessageUas) {
        let _ = message.accept(core, ResponseOptions::default());
    }

    fn on_notify(&mut self, core: &mut UserAgentCore, notify: NotifyUas) {
        let _ = notify.accept(core, ResponseOptions::default());
    }

    fn on_refer(&mut self, core: &mut UserAgentCore, refer: ReferUas) {
        let _ = refer.reject(core, ResponseOptions::status(405));
    }

    fn on_subscribe(&mut self, core: &mut UserAgentCore, subscribe: SubscribeUas) {
        let _ = subscribe.reject(core, ResponseOptions::status(480));
    }

    fn on_register(&mut self, core: &mut UserAgentCore, register: UserAgentServer) {
        let _ = register.reject(core, ResponseOptions::status(405));
    }

    fn on_publish(&mut self, core: &mut UserAgentCore, publish: UserAgentServer) {
        let _ = publish.reject(core, ResponseOptions::status(405));
    }
}

/// A delegate that keeps every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCoreDelegate;

impl UserAgentCoreDelegate for DefaultCoreDelegate {}

/// Outcome of a non-INVITE request we sent.
///
/// Exactly one of `on_accept`, `on_redirect`, `on_reject`, `on_timeout`
/// or `on_transport_error` ends the request.
pub trait OutgoingRequestDelegate: Send {
    fn on_trying(&mut self, _core: &mut UserAgentCore, _response: &Response) {}
    fn on_progress(&mut self, _core: &mut UserAgentCore, _response: &Response) {}
    fn on_accept(&mut self, _core: &mut UserAgentCore, _response: &Response) {}
    fn on_redirect(&mut self, _core: &mut UserAgentCore, _response: &Response) {}
    fn on_reject(&mut self, _core: &mut UserAgentCore, _response: &Response) {}
    fn on_timeout(&mut self, _core: &mut UserAgentCore) {}
    fn on_transport_error(&mut self, _core: &mut UserAgentCore) {}
}

/// Outcome of an INVITE or re-INVITE we sent.
///
/// Forked calls may produce several sessions; every 2xx is reported.
pub trait InviteClientDelegate: Send {
    fn on_trying(&mut self, _core: &mut UserAgentCore, _response: &Response) {}

    /// A provisional response. Tagged provisionals come with their early
    /// session; reliable ones are acknowledged with PRACK by default.
    fn on_progress(
        &mut self,
        core: &mut UserAgentCore,
        response: &Response,
        session: Option<SessionHandle>,
    ) {
        if let Some(session) = session {
            if response.has_option_tag("Require", "100rel") {
                let _ = session.prack(core, response, None, None);
            }
        }
    }

    /// A 2xx. The session must be acknowledged; the default sends an ACK
    /// without a body.
    fn on_accept(&mut self, core: &mut UserAgentCore, session: SessionHandle, _response: &Response) {
        if let Err(err) = session.ack(core, None) {
            warn!(session = %session.id(), %err, "2xx left unacknowledged");
        }
    }

    fn on_redirect(&mut self, _core: &mut UserAgentCore, _response: &Response) {}
    fn on_reject(&mut self, _core: &mut UserAgentCore, _response: &Response) {}
    fn on_timeout(&mut self, _core: &mut UserAgentCore) {}
    fn on_transport_error(&mut self, _core: &mut UserAgentCore) {}
}

/// Requests arriving inside an INVITE session, and its end.
pub trait SessionDelegate: Send {
    fn on_ack(&mut self, _core: &mut UserAgentCore, _session: SessionHandle) {}

    /// Our 2xx was never acknowledged; the default hangs up.
    fn on_ack_timeout(&mut self, core: &mut UserAgentCore, session: SessionHandle) {
        let _ = session.bye(core, None);
    }

    fn on_bye(&mut self, core: &mut UserAgentCore, bye: ByeUas) {
        let _ = bye.accept(core, ResponseOptions::default());
    }

    fn on_info(&mut self, core: &mut UserAgentCore, info: InfoUas) {
        let _ = info.reject(core, ResponseOptions::status(469));
    }

    fn on_invite(&mut self, core: &mut UserAgentCore, invite: ReInviteUas) {
        let _ = invite.reject(core, ResponseOptions::status(488));
    }

    fn on_message(&mut self, core: &mut UserAgentCore, message: MessageUas) {
        let _ = message.accept(core, ResponseOptions::default());
    }

    fn on_notify(&mut self, core: &mut UserAgentCore, notify: NotifyUas) {
        let _ = notify.accept(core, ResponseOptions::default());
    }

    fn on_prack(&mut self, core: &mut UserAgentCore, prack: PrackUas) {
        let _ = prack.accept(core, ResponseOptions::default());
    }

    fn on_refer(&mut self, core: &mut UserAgentCore, refer: ReferUas) {
        let _ = refer.reject(core, ResponseOptions::status(405));
    }

    /// An UPDATE; one carrying an offer is refused unless overridden.
    fn on_update(&mut self, core: &mut UserAgentCore, update: UpdateUas) {
        if update.has_offer(core) {
            let _ = update.reject(core, ResponseOptions::status(488));
        } else {
            let _ = update.accept(core, ResponseOptions::default());
        }
    }

    fn on_terminated(&mut self, _core: &mut UserAgentCore, _session: &DialogId) {}
}

/// Keeps every session default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionDelegate;

impl SessionDelegate for DefaultSessionDelegate {}

/// Subscriber and notifier callbacks for one subscription.
pub trait SubscriptionDelegate: Send {
    /// 2xx to the initial SUBSCRIBE.
    fn on_accept(
        &mut self,
        _core: &mut UserAgentCore,
        _subscription: SubscriptionHandle,
        _response: &Response,
    ) {
    }

    /// The initial SUBSCRIBE failed; no subscription exists.
    fn on_reject(&mut self, _core: &mut UserAgentCore, _response: &Response) {}

    /// Neither a response nor a NOTIFY arrived in time.
    fn on_timeout(&mut self, _core: &mut UserAgentCore) {}

    fn on_notify(
        &mut self,
        core: &mut UserAgentCore,
        _subscription: SubscriptionHandle,
        notify: NotifyUas,
    ) {
        let _ = notify.accept(core, ResponseOptions::default());
    }

    fn on_state_changed(
        &mut self,
        _core: &mut UserAgentCore,
        _subscription: SubscriptionHandle,
        _state: SubscriptionDialogState,
    ) {
    }

    /// Notifier side: the subscriber refreshed (or, with 0, ended) the
    /// subscription. The default sends the final NOTIFY on unsubscribe.
    fn on_resubscribe(
        &mut self,
        core: &mut UserAgentCore,
        subscription: SubscriptionHandle,
        expires: u32,
    ) {
        if expires == 0 {
            let _ = subscription.terminate_with_notify(core, "timeout", None);
        }
    }

    fn on_terminated(&mut self, _core: &mut UserAgentCore, _subscription: &DialogId) {}
}

/// Keeps every subscription default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSubscriptionDelegate;

impl SubscriptionDelegate for DefaultSubscriptionDelegate {}
