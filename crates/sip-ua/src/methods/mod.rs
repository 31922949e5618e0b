// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Method-specific clients and servers.
//!
//! Each wraps the generic [`UserAgentClient`](crate::uac::UserAgentClient)
//! or [`UserAgentServer`](crate::uas::UserAgentServer) and adds the header
//! and dialog rules of its method. Server wrappers dereference to the
//! generic server, so `progress`, `redirect` and `reject` are always
//! available; a wrapper only redefines what its method changes.

/// `Deref` to the generic server for a method wrapper.
macro_rules! deref_to_server {
    ($($wrapper:ty),+ $(,)?) => {
        $(
            impl std::ops::Deref for $wrapper {
                type Target = crate::uas::UserAgentServer;

                fn deref(&self) -> &Self::Target {
                    &self.uas
                }
            }
        )+
    };
}

pub(crate) use deref_to_server;

mod in_dialog;
mod invite;
mod requests;
mod subscribe;

use sip_dialog::DialogId;

pub use in_dialog::{ByeUas, InfoUas, MessageUas, NotifyUas, PrackUas, ReferUas, UpdateUas};
pub use invite::{InviteUac, InviteUas, ReInviteUas};
pub use requests::{MessageUac, PublishUac, ReferUac, RegisterUac};
pub use subscribe::{SubscribeUac, SubscribeUas};

/// Where a REFER arrived.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferOrigin {
    /// Inside the dialog with this id.
    InDialog(DialogId),
    OutOfDialog,
}
