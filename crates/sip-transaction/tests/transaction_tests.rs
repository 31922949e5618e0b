// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use sip_core::{HeaderAccess, Headers, Method, Request, RequestLine, Response, SipUri};
use sip_transaction::builders::{build_response, ensure_to_tag};
use sip_transaction::fsm::{
    ClientAction, ClientInviteEvent, ClientInviteFsm, ClientNonInviteEvent, ClientNonInviteFsm,
    ServerAction, ServerInviteEvent, ServerInviteFsm, ServerNonInviteEvent, ServerNonInviteFsm,
};
use sip_transaction::timers::{Transport, TransportAwareTimers};
use sip_transaction::{
    ClientInviteState, ClientNonInviteState, ServerInviteState, ServerNonInviteState,
    TransactionError, TransactionTimer,
};
use std::time::Duration;

fn request(method: Method) -> Request {
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/UDP alice.example.com;branch=z9hG4bKtest1");
    headers.push("Max-Forwards", "70");
    headers.push("From", "<sip:alice@example.com>;tag=a1");
    headers.push("To", "<sip:bob@example.com>");
    headers.push("Call-ID", "txn-test");
    headers.push("CSeq", format!("1 {}", method));
    Request::new(
        RequestLine::new(method, SipUri::parse("sip:bob@example.com").unwrap()),
        headers,
        Bytes::new(),
    )
}

fn response_to(req: &Request, code: u16) -> Response {
    let mut response = build_response(req, code, None);
    if code > 100 {
        ensure_to_tag(&mut response, "b1");
    }
    response
}

fn udp() -> TransportAwareTimers {
    TransportAwareTimers::new(Transport::Udp)
}

fn scheduled(actions: &[ClientAction], timer: TransactionTimer) -> Option<Duration> {
    actions.iter().find_map(|action| match action {
        ClientAction::Schedule { timer: t, duration } if *t == timer => Some(*duration),
        _ => None,
    })
}

fn server_scheduled(actions: &[ServerAction], timer: TransactionTimer) -> Option<Duration> {
    actions.iter().find_map(|action| match action {
        ServerAction::Schedule { timer: t, duration } if *t == timer => Some(*duration),
        _ => None,
    })
}

fn transmits(actions: &[ClientAction]) -> usize {
    actions
        .iter()
        .filter(|a| matches!(a, ClientAction::Transmit(_)))
        .count()
}

// ==========================
// Client INVITE
// ==========================

#[test]
fn client_invite_send_arms_a_and_b_over_udp() {
    let mut fsm = ClientInviteFsm::new(udp());
    let actions = fsm.on_event(ClientInviteEvent::SendInvite(request(Method::Invite)));
    assert_eq!(transmits(&actions), 1);
    assert_eq!(
        scheduled(&actions, TransactionTimer::A),
        Some(Duration::from_millis(500))
    );
    assert_eq!(
        scheduled(&actions, TransactionTimer::B),
        Some(Duration::from_secs(32))
    );
}

#[test]
fn client_invite_over_tcp_never_arms_timer_a() {
    let mut fsm = ClientInviteFsm::new(TransportAwareTimers::new(Transport::Tcp));
    let actions = fsm.on_event(ClientInviteEvent::SendInvite(request(Method::Invite)));
    assert!(scheduled(&actions, TransactionTimer::A).is_none());
    assert!(scheduled(&actions, TransactionTimer::B).is_some());
}

#[test]
fn client_invite_timer_a_doubles_without_cap() {
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientInviteEvent::SendInvite(request(Method::Invite)));
    let mut expected = Duration::from_millis(500);
    for _ in 0..5 {
        expected *= 2;
        let actions = fsm.on_event(ClientInviteEvent::TimerFired(TransactionTimer::A));
        assert_eq!(transmits(&actions), 1);
        assert_eq!(scheduled(&actions, TransactionTimer::A), Some(expected));
    }
    assert_eq!(expected, Duration::from_secs(16));
}

#[test]
fn client_invite_timer_b_times_out() {
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientInviteEvent::SendInvite(request(Method::Invite)));
    let actions = fsm.on_event(ClientInviteEvent::TimerFired(TransactionTimer::B));
    assert!(actions.contains(&ClientAction::Timeout));
    assert_eq!(fsm.state, ClientInviteState::Terminated);
}

#[test]
fn client_invite_provisional_stops_retransmission() {
    let invite = request(Method::Invite);
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientInviteEvent::SendInvite(invite.clone()));
    let actions = fsm.on_event(ClientInviteEvent::ReceiveResponse(response_to(&invite, 180)));
    assert!(actions.contains(&ClientAction::Cancel(TransactionTimer::A)));
    assert!(actions.contains(&ClientAction::Cancel(TransactionTimer::B)));
    assert!(matches!(actions.last(), Some(ClientAction::Deliver(r)) if r.code() == 180));
    assert_eq!(fsm.state, ClientInviteState::Proceeding);

    // Timer A firing late after leaving Calling does nothing.
    assert!(fsm
        .on_event(ClientInviteEvent::TimerFired(TransactionTimer::A))
        .is_empty());
}

#[test]
fn client_invite_accepted_forwards_every_2xx() {
    let invite = request(Method::Invite);
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientInviteEvent::SendInvite(invite.clone()));
    let ok = response_to(&invite, 200);

    let actions = fsm.on_event(ClientInviteEvent::ReceiveResponse(ok.clone()));
    assert_eq!(fsm.state, ClientInviteState::Accepted);
    assert_eq!(
        scheduled(&actions, TransactionTimer::M),
        Some(Duration::from_secs(32))
    );
    assert_eq!(transmits(&actions), 0, "no ACK for 2xx at this layer");

    let again = fsm.on_event(ClientInviteEvent::ReceiveResponse(ok));
    assert!(matches!(again.as_slice(), [ClientAction::Deliver(r)] if r.code() == 200));

    // A transport error after success is not reported.
    assert!(fsm.on_event(ClientInviteEvent::TransportError).is_empty());

    let end = fsm.on_event(ClientInviteEvent::TimerFired(TransactionTimer::M));
    assert!(matches!(end.as_slice(), [ClientAction::Terminate { .. }]));
}

#[test]
fn client_invite_failure_generates_ack_once_and_resends_it() {
    let invite = request(Method::Invite);
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientInviteEvent::SendInvite(invite.clone()));
    let busy = response_to(&invite, 486);

    let actions = fsm.on_event(ClientInviteEvent::ReceiveResponse(busy.clone()));
    assert_eq!(fsm.state, ClientInviteState::Completed);
    let ack = actions
        .iter()
        .find_map(|a| match a {
            ClientAction::Transmit(r) => Some(r.clone()),
            _ => None,
        })
        .expect("ACK transmitted");
    assert_eq!(ack.method(), &Method::Ack);
    assert_eq!(ack.branch().as_deref(), Some("z9hG4bKtest1"));
    assert_eq!(ack.to_tag().as_deref(), Some("b1"));
    assert!(actions
        .iter()
        .any(|a| matches!(a, ClientAction::Deliver(r) if r.code() == 486)));
    assert_eq!(
        scheduled(&actions, TransactionTimer::D),
        Some(Duration::from_secs(32))
    );

    // Retransmitted final: ACK again, nothing delivered.
    let again = fsm.on_event(ClientInviteEvent::ReceiveResponse(busy));
    assert_eq!(again, vec![ClientAction::Transmit(ack)]);
}

#[test]
fn client_invite_cancel_waits_for_provisional() {
    let invite = request(Method::Invite);
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientInviteEvent::SendInvite(invite.clone()));

    assert!(fsm.on_event(ClientInviteEvent::CancelRequested).is_empty());
    assert!(fsm.cancel_pending());

    let actions = fsm.on_event(ClientInviteEvent::ReceiveResponse(response_to(&invite, 100)));
    assert_eq!(actions.last(), Some(&ClientAction::SendCancel));
    assert!(!fsm.cancel_pending());

    assert_eq!(
        fsm.on_event(ClientInviteEvent::CancelRequested),
        vec![ClientAction::SendCancel]
    );
}

#[test]
fn client_invite_transport_error_terminates() {
    let mut fsm = ClientInviteFsm::new(udp());
    fsm.on_event(ClientInviteEvent::SendInvite(request(Method::Invite)));
    let actions = fsm.on_event(ClientInviteEvent::TransportError);
    assert!(actions.contains(&ClientAction::TransportFailed));
    assert_eq!(fsm.state, ClientInviteState::Terminated);
}

// ==========================
// Client non-INVITE
// ==========================

#[test]
fn client_non_invite_timer_e_caps_at_t2() {
    let mut fsm = ClientNonInviteFsm::new(udp());
    fsm.on_event(ClientNonInviteEvent::SendRequest(request(Method::Options)));
    let expected = [1000, 2000, 4000, 4000, 4000];
    for millis in expected {
        let actions = fsm.on_event(ClientNonInviteEvent::TimerFired(TransactionTimer::E));
        assert_eq!(
            scheduled(&actions, TransactionTimer::E),
            Some(Duration::from_millis(millis))
        );
    }
}

#[test]
fn client_non_invite_proceeding_retransmits_at_t2() {
    let req = request(Method::Options);
    let mut fsm = ClientNonInviteFsm::new(udp());
    fsm.on_event(ClientNonInviteEvent::SendRequest(req.clone()));
    fsm.on_event(ClientNonInviteEvent::ReceiveResponse(response_to(&req, 100)));
    assert_eq!(fsm.state, ClientNonInviteState::Proceeding);

    let actions = fsm.on_event(ClientNonInviteEvent::TimerFired(TransactionTimer::E));
    assert_eq!(
        scheduled(&actions, TransactionTimer::E),
        Some(Duration::from_secs(4))
    );
}

#[test]
fn client_non_invite_final_absorbs_retransmissions() {
    let req = request(Method::Options);
    let mut fsm = ClientNonInviteFsm::new(udp());
    fsm.on_event(ClientNonInviteEvent::SendRequest(req.clone()));
    let ok = response_to(&req, 200);

    let actions = fsm.on_event(ClientNonInviteEvent::ReceiveResponse(ok.clone()));
    assert_eq!(fsm.state, ClientNonInviteState::Completed);
    assert!(actions
        .iter()
        .any(|a| matches!(a, ClientAction::Deliver(r) if r.code() == 200)));
    assert_eq!(
        scheduled(&actions, TransactionTimer::K),
        Some(Duration::from_secs(5))
    );

    assert!(fsm
        .on_event(ClientNonInviteEvent::ReceiveResponse(ok))
        .is_empty());
    let end = fsm.on_event(ClientNonInviteEvent::TimerFired(TransactionTimer::K));
    assert!(matches!(end.as_slice(), [ClientAction::Terminate { .. }]));
}

#[test]
fn client_non_invite_408_reports_timeout() {
    let req = request(Method::Message);
    let mut fsm = ClientNonInviteFsm::new(udp());
    fsm.on_event(ClientNonInviteEvent::SendRequest(req.clone()));
    let actions = fsm.on_event(ClientNonInviteEvent::ReceiveResponse(response_to(&req, 408)));
    assert!(actions.contains(&ClientAction::Timeout));
    assert!(!actions
        .iter()
        .any(|a| matches!(a, ClientAction::Deliver(_))));
}

#[test]
fn client_non_invite_timer_f_times_out() {
    let mut fsm = ClientNonInviteFsm::new(TransportAwareTimers::new(Transport::Tls));
    let actions = fsm.on_event(ClientNonInviteEvent::SendRequest(request(Method::Bye)));
    assert!(scheduled(&actions, TransactionTimer::E).is_none());
    let actions = fsm.on_event(ClientNonInviteEvent::TimerFired(TransactionTimer::F));
    assert!(actions.contains(&ClientAction::Timeout));
    assert_eq!(fsm.state, ClientNonInviteState::Terminated);
}

// ==========================
// Server INVITE
// ==========================

#[test]
fn server_invite_sends_trying_immediately() {
    let invite = request(Method::Invite);
    let mut fsm = ServerInviteFsm::new(udp());
    let actions = fsm.on_event(ServerInviteEvent::ReceiveInvite(invite));
    assert!(matches!(actions.as_slice(), [ServerAction::Transmit(r)] if r.code() == 100));

    // Retransmitted INVITE gets the 100 again.
    let actions = fsm.on_event(ServerInviteEvent::ReceiveRetransmission);
    assert!(matches!(actions.as_slice(), [ServerAction::Transmit(r)] if r.code() == 100));
}

#[test]
fn server_invite_provisional_resend_armed_once() {
    let invite = request(Method::Invite);
    let mut fsm = ServerInviteFsm::new(udp());
    fsm.on_event(ServerInviteEvent::ReceiveInvite(invite.clone()));

    let first = fsm.try_send(response_to(&invite, 180)).unwrap();
    assert_eq!(
        server_scheduled(&first, TransactionTimer::ProvisionalResend),
        Some(Duration::from_millis(500))
    );
    let second = fsm.try_send(response_to(&invite, 183)).unwrap();
    assert!(server_scheduled(&second, TransactionTimer::ProvisionalResend).is_none());

    let resend = fsm.on_event(ServerInviteEvent::TimerFired(TransactionTimer::ProvisionalResend));
    assert!(resend
        .iter()
        .any(|a| matches!(a, ServerAction::Transmit(r) if r.code() == 183)));

    let retrans = fsm.on_event(ServerInviteEvent::ReceiveRetransmission);
    assert!(matches!(retrans.as_slice(), [ServerAction::Transmit(r)] if r.code() == 183));
}

#[test]
fn server_invite_2xx_enters_accepted_for_timer_l() {
    let invite = request(Method::Invite);
    let mut fsm = ServerInviteFsm::new(udp());
    fsm.on_event(ServerInviteEvent::ReceiveInvite(invite.clone()));

    let actions = fsm.try_send(response_to(&invite, 200)).unwrap();
    assert_eq!(fsm.state, ServerInviteState::Accepted);
    assert!(actions.contains(&ServerAction::Cancel(TransactionTimer::ProvisionalResend)));
    assert_eq!(
        server_scheduled(&actions, TransactionTimer::L),
        Some(Duration::from_secs(32))
    );

    // INVITE retransmissions are absorbed while Accepted.
    assert!(fsm
        .on_event(ServerInviteEvent::ReceiveRetransmission)
        .is_empty());
    // A 2xx may still pass; a failure may not.
    assert!(fsm.try_send(response_to(&invite, 200)).is_ok());
    assert_eq!(
        fsm.try_send(response_to(&invite, 486)),
        Err(TransactionError::InvalidResponse {
            code: 486,
            state: "Accepted"
        })
    );

    let end = fsm.on_event(ServerInviteEvent::TimerFired(TransactionTimer::L));
    assert!(matches!(end.as_slice(), [ServerAction::Terminate { .. }]));
}

#[test]
fn server_invite_failure_retransmits_until_ack() {
    let invite = request(Method::Invite);
    let mut fsm = ServerInviteFsm::new(udp());
    fsm.on_event(ServerInviteEvent::ReceiveInvite(invite.clone()));

    let actions = fsm.try_send(response_to(&invite, 486)).unwrap();
    assert_eq!(fsm.state, ServerInviteState::Completed);
    assert_eq!(
        server_scheduled(&actions, TransactionTimer::G),
        Some(Duration::from_millis(500))
    );
    assert_eq!(
        server_scheduled(&actions, TransactionTimer::H),
        Some(Duration::from_secs(32))
    );

    let expected = [1000, 2000, 4000, 4000];
    for millis in expected {
        let actions = fsm.on_event(ServerInviteEvent::TimerFired(TransactionTimer::G));
        assert_eq!(
            server_scheduled(&actions, TransactionTimer::G),
            Some(Duration::from_millis(millis))
        );
    }

    let actions = fsm.on_event(ServerInviteEvent::ReceiveAck);
    assert_eq!(fsm.state, ServerInviteState::Confirmed);
    assert!(actions.contains(&ServerAction::Cancel(TransactionTimer::H)));
    assert_eq!(
        server_scheduled(&actions, TransactionTimer::I),
        Some(Duration::from_secs(5))
    );

    // ACK retransmissions are absorbed in Confirmed.
    assert!(fsm.on_event(ServerInviteEvent::ReceiveAck).is_empty());
}

#[test]
fn server_invite_timer_h_reports_ack_timeout() {
    let invite = request(Method::Invite);
    let mut fsm = ServerInviteFsm::new(TransportAwareTimers::new(Transport::Tcp));
    fsm.on_event(ServerInviteEvent::ReceiveInvite(invite.clone()));
    let actions = fsm.try_send(response_to(&invite, 603)).unwrap();
    assert!(server_scheduled(&actions, TransactionTimer::G).is_none());

    let actions = fsm.on_event(ServerInviteEvent::TimerFired(TransactionTimer::H));
    assert!(actions.contains(&ServerAction::AckTimeout));
    assert_eq!(fsm.state, ServerInviteState::Terminated);
}

// ==========================
// Server non-INVITE
// ==========================

#[test]
fn server_non_invite_absorbs_retransmission_while_trying() {
    let mut fsm = ServerNonInviteFsm::new(request(Method::Options), udp());
    assert!(fsm
        .on_event(ServerNonInviteEvent::ReceiveRetransmission)
        .is_empty());
    assert_eq!(fsm.state, ServerNonInviteState::Trying);
}

#[test]
fn server_non_invite_late_100_keeps_cached_provisional() {
    let req = request(Method::Subscribe);
    let mut fsm = ServerNonInviteFsm::new(req.clone(), udp());
    fsm.try_send(response_to(&req, 182)).unwrap();
    let actions = fsm.try_send(response_to(&req, 100)).unwrap();
    assert!(matches!(actions.as_slice(), [ServerAction::Transmit(r)] if r.code() == 100));
    assert_eq!(fsm.last_response().map(|r| r.code()), Some(182));

    let retrans = fsm.on_event(ServerNonInviteEvent::ReceiveRetransmission);
    assert!(matches!(retrans.as_slice(), [ServerAction::Transmit(r)] if r.code() == 182));
}

#[test]
fn server_non_invite_final_then_timer_j() {
    let req = request(Method::Message);
    let mut fsm = ServerNonInviteFsm::new(req.clone(), udp());
    let actions = fsm.try_send(response_to(&req, 200)).unwrap();
    assert_eq!(fsm.state, ServerNonInviteState::Completed);
    assert_eq!(
        server_scheduled(&actions, TransactionTimer::J),
        Some(Duration::from_secs(32))
    );

    let retrans = fsm.on_event(ServerNonInviteEvent::ReceiveRetransmission);
    assert!(matches!(retrans.as_slice(), [ServerAction::Transmit(r)] if r.code() == 200));

    assert!(matches!(
        fsm.try_send(response_to(&req, 500)),
        Err(TransactionError::InvalidResponse { code: 500, .. })
    ));

    let end = fsm.on_event(ServerNonInviteEvent::TimerFired(TransactionTimer::J));
    assert!(matches!(end.as_slice(), [ServerAction::Terminate { .. }]));
    assert_eq!(fsm.state, ServerNonInviteState::Terminated);
}

#[test]
fn server_non_invite_reliable_timer_j_is_zero() {
    let req = request(Method::Bye);
    let mut fsm = ServerNonInviteFsm::new(req.clone(), TransportAwareTimers::new(Transport::Ws));
    let actions = fsm.try_send(response_to(&req, 200)).unwrap();
    assert_eq!(
        server_scheduled(&actions, TransactionTimer::J),
        Some(Duration::ZERO)
    );
}
