// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use proptest::prelude::*;
use sip_core::{Headers, Method, Request, RequestLine, SipUri};
use sip_transaction::fsm::{ClientAction, ClientNonInviteEvent, ClientNonInviteFsm};
use sip_transaction::timers::{TimerDefaults, Transport, TransportAwareTimers};
use sip_transaction::{
    branch_from_via, generate_branch_id, TransactionKey, TransactionTimer, BRANCH_MAGIC_COOKIE,
};
use std::time::Duration;

fn options_with_via(via: &str) -> Request {
    let mut headers = Headers::new();
    headers.push("Via", via.to_string());
    headers.push("CSeq", "1 OPTIONS");
    Request::new(
        RequestLine::new(Method::Options, SipUri::parse("sip:example.com").unwrap()),
        headers,
        Bytes::new(),
    )
}

proptest! {
    #[test]
    fn generated_branch_has_magic_cookie(_iteration in 0..100) {
        let branch = generate_branch_id();
        prop_assert!(branch.starts_with(BRANCH_MAGIC_COOKIE), "Branch: {}", branch);
    }

    #[test]
    fn generated_branches_are_unique(_iteration in 0..50) {
        prop_assert_ne!(generate_branch_id(), generate_branch_id());
    }

    #[test]
    fn branch_extraction_from_via(
        host in "[a-z]{3,10}",
        branch_suffix in "[a-zA-Z0-9]{8,16}",
        rport in any::<bool>(),
    ) {
        let branch = format!("z9hG4bK{}", branch_suffix);
        let via = if rport {
            format!("SIP/2.0/UDP {};rport;branch={}", host, branch)
        } else {
            format!("SIP/2.0/UDP {};branch={}", host, branch)
        };
        prop_assert_eq!(branch_from_via(&via), Some(branch.as_str()));

        let key = TransactionKey::from_request(&options_with_via(&via), true).unwrap();
        prop_assert_eq!(key.branch.as_str(), branch.as_str());
        prop_assert_eq!(key.method, Method::Options);
    }

    /// Timer E intervals never decrease and never exceed T2.
    #[test]
    fn timer_e_backoff_is_monotonic(t1_ms in 50u64..1000, t2_ms in 1000u64..8000, fires in 1usize..12) {
        let defaults = TimerDefaults {
            t1: Duration::from_millis(t1_ms),
            t2: Duration::from_millis(t2_ms),
            ..TimerDefaults::default()
        };
        let mut fsm = ClientNonInviteFsm::new(TransportAwareTimers::with_defaults(Transport::Udp, defaults));
        fsm.on_event(ClientNonInviteEvent::SendRequest(options_with_via("SIP/2.0/UDP h;branch=z9hG4bKp")));

        let mut previous = Duration::from_millis(t1_ms);
        for _ in 0..fires {
            let actions = fsm.on_event(ClientNonInviteEvent::TimerFired(TransactionTimer::E));
            let next = actions.iter().find_map(|a| match a {
                ClientAction::Schedule { timer: TransactionTimer::E, duration } => Some(*duration),
                _ => None,
            }).unwrap();
            prop_assert!(next >= previous.min(defaults.t2));
            prop_assert!(next <= defaults.t2);
            previous = next;
        }
    }
}
