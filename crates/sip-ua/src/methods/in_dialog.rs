// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Servers for the non-INVITE methods.

use sip_core::{HeaderAccess, NameAddr, Response, SubscriptionStateHeader};
use sip_dialog::{DialogId, SignalingState};

use super::{deref_to_server, ReferOrigin};
use crate::core::UserAgentCore;
use crate::error::CoreError;
use crate::uas::{ResponseOptions, UserAgentServer};

/// A BYE. The session is already closed when this is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ByeUas {
    uas: UserAgentServer,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InfoUas {
    uas: UserAgentServer,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageUas {
    uas: UserAgentServer,
}

/// A NOTIFY, in or out of dialog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotifyUas {
    uas: UserAgentServer,
}

/// A PRACK; any body it carried has already been applied to the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrackUas {
    uas: UserAgentServer,
}

deref_to_server!(ByeUas, InfoUas, MessageUas, NotifyUas, PrackUas, ReferUas, UpdateUas);

macro_rules! plain_server {
    ($($wrapper:ident),+) => {
        $(
            impl $wrapper {
                pub(crate) fn new(uas: UserAgentServer) -> Self {
                    Self { uas }
                }
            }
        )+
    };
}

plain_server!(ByeUas, InfoUas, MessageUas, NotifyUas, PrackUas);

impl NotifyUas {
    /// The Subscription-State the notifier reported, if parsable.
    pub fn subscription_state(&self, core: &UserAgentCore) -> Option<SubscriptionStateHeader> {
        self.uas
            .request(core)?
            .header("Subscription-State")
            .and_then(SubscriptionStateHeader::parse)
    }
}

/// A REFER and where it arrived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferUas {
    uas: UserAgentServer,
    origin: ReferOrigin,
}

impl ReferUas {
    pub(crate) fn new(uas: UserAgentServer, origin: ReferOrigin) -> Self {
        Self { uas, origin }
    }

    pub fn origin(&self) -> &ReferOrigin {
        &self.origin
    }

    pub fn refer_to(&self, core: &UserAgentCore) -> Option<NameAddr> {
        self.uas
            .request(core)?
            .header("Refer-To")
            .and_then(NameAddr::parse)
    }

    /// 202 Accepted unless `status` says otherwise.
    pub fn accept(
        &self,
        core: &mut UserAgentCore,
        mut options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        options.status.get_or_insert(202);
        self.uas.accept(core, options)
    }
}

/// An UPDATE inside a session (RFC 3311). Its offer, if any, is already
/// recorded; a rejection rolls it back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateUas {
    uas: UserAgentServer,
    session: DialogId,
}

impl UpdateUas {
    pub(crate) fn new(uas: UserAgentServer, session: DialogId) -> Self {
        Self { uas, session }
    }

    /// True when the UPDATE carried an offer that now awaits our answer.
    pub fn has_offer(&self, core: &UserAgentCore) -> bool {
        core.session(&self.session)
            .is_some_and(|session| session.signaling_state() == SignalingState::HaveRemoteOffer)
    }

    /// 2xx; must carry the answer when the UPDATE carried an offer.
    pub fn accept(
        &self,
        core: &mut UserAgentCore,
        options: ResponseOptions,
    ) -> Result<Response, CoreError> {
        options.code(200, 200..=299, "accept")?;
        if self.has_offer(core) {
            if options.body.is_none() {
                return Err(CoreError::BodyRequired);
            }
            core.signal_local(&self.session, options.body.as_ref())?;
        }
        let options = options.with_header("Contact", core.resolved.contact.to_string());
        self.uas.accept(core, options)
    }
}
