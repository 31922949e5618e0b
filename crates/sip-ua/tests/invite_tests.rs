// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{advance, events, logged, pump, record, Events, Peer};
use parking_lot::Mutex;
use sip_core::{Body, HeaderAccess, Method, Response, SipMessage};
use sip_dialog::{DialogId, SignalingState};
use sip_transaction::TransactionKey;
use sip_ua::methods::{ByeUas, InviteUac, InviteUas};
use sip_ua::{
    CoreError, InviteClientDelegate, ManualClock, RequestOptions, ResponseOptions,
    SessionDelegate, SessionHandle, UserAgentCore, UserAgentCoreDelegate,
};

/// How the callee treats an INVITE.
#[derive(Clone, Copy)]
enum Answer {
    Accept,
    Reject(u16),
    Ring,
}

struct Callee {
    answer: Answer,
    events: Events,
    ringing: Arc<Mutex<Option<InviteUas>>>,
    answered: Arc<Mutex<Vec<SessionHandle>>>,
}

impl UserAgentCoreDelegate for Callee {
    fn on_invite(&mut self, core: &mut UserAgentCore, invite: InviteUas) {
        record(&self.events, "invite");
        match self.answer {
            Answer::Accept => {
                let options = ResponseOptions::default().with_body(Body::sdp("v=0 answer"));
                let session = invite
                    .accept(
                        core,
                        options,
                        Box::new(CalleeSession {
                            events: self.events.clone(),
                        }),
                    )
                    .expect("2xx sent");
                record(&self.events, format!("session {}", session.id().call_id));
                self.answered.lock().push(session);
            }
            Answer::Reject(code) => {
                invite
                    .reject(core, ResponseOptions::status(code))
                    .expect("rejection sent");
            }
            Answer::Ring => {
                invite
                    .progress(core, ResponseOptions::default())
                    .expect("180 sent");
                *self.ringing.lock() = Some(invite);
            }
        }
    }

    fn on_invite_cancelled(&mut self, _core: &mut UserAgentCore, _invite: &TransactionKey) {
        record(&self.events, "cancelled");
    }
}

struct CalleeSession {
    events: Events,
}

impl SessionDelegate for CalleeSession {
    fn on_ack(&mut self, _core: &mut UserAgentCore, _session: SessionHandle) {
        record(&self.events, "ack");
    }

    fn on_bye(&mut self, core: &mut UserAgentCore, bye: ByeUas) {
        record(&self.events, "bye");
        bye.accept(core, ResponseOptions::default()).expect("200 to BYE");
    }

    fn on_terminated(&mut self, _core: &mut UserAgentCore, _session: &DialogId) {
        record(&self.events, "terminated");
    }
}

struct Caller {
    events: Events,
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
}

impl InviteClientDelegate for Caller {
    fn on_trying(&mut self, _core: &mut UserAgentCore, _response: &Response) {
        record(&self.events, "trying");
    }

    fn on_progress(
        &mut self,
        _core: &mut UserAgentCore,
        response: &Response,
        session: Option<SessionHandle>,
    ) {
        record(
            &self.events,
            format!("progress {} early={}", response.code(), session.is_some()),
        );
    }

    fn on_accept(&mut self, core: &mut UserAgentCore, session: SessionHandle, _response: &Response) {
        record(&self.events, "accept");
        session.ack(core, None).expect("ACK sent");
        self.sessions.lock().push(session);
    }

    fn on_reject(&mut self, _core: &mut UserAgentCore, response: &Response) {
        record(&self.events, format!("reject {}", response.code()));
    }

    fn on_timeout(&mut self, _core: &mut UserAgentCore) {
        record(&self.events, "timeout");
    }
}

struct Call {
    clock: ManualClock,
    alice: Peer,
    bob: Peer,
    alice_events: Events,
    bob_events: Events,
    sessions: Arc<Mutex<Vec<SessionHandle>>>,
    ringing: Arc<Mutex<Option<InviteUas>>>,
    answered: Arc<Mutex<Vec<SessionHandle>>>,
    record_route: Vec<String>,
}

fn call(answer: Answer) -> (Call, InviteUac) {
    call_through(answer, &[])
}

/// A call whose INVITE picked up `record_route` on its way to Bob.
fn call_through(answer: Answer, record_route: &[&str]) -> (Call, InviteUac) {
    let clock = ManualClock::new();
    let bob_events = events();
    let ringing = Arc::new(Mutex::new(None));
    let answered = Arc::new(Mutex::new(Vec::new()));
    let mut alice = Peer::new(
        "alice",
        "192.0.2.1:5060",
        &clock,
        Box::new(sip_ua::DefaultCoreDelegate),
    );
    let bob = Peer::new(
        "bob",
        "192.0.2.2:5060",
        &clock,
        Box::new(Callee {
            answer,
            events: bob_events.clone(),
            ringing: ringing.clone(),
            answered: answered.clone(),
        }),
    );
    let alice_events = events();
    let sessions = Arc::new(Mutex::new(Vec::new()));
    let record_route: Vec<String> = record_route.iter().map(|route| route.to_string()).collect();
    let request = alice.core.make_outgoing_request(
        Method::Invite,
        Peer::uri("bob", "192.0.2.2:5060"),
        RequestOptions::default().with_body(Body::sdp("v=0 offer")),
    );
    let uac = InviteUac::send(
        &mut alice.core,
        request,
        Box::new(Caller {
            events: alice_events.clone(),
            sessions: sessions.clone(),
        }),
    )
    .expect("INVITE sent");
    (
        Call {
            clock,
            alice,
            bob,
            alice_events,
            bob_events,
            sessions,
            ringing,
            answered,
            record_route,
        },
        uac,
    )
}

impl Call {
    /// Like [`pump`], but every INVITE reaching Bob first passes a
    /// record-routing proxy.
    fn pump(&mut self) {
        if self.record_route.is_empty() {
            pump(&mut self.alice, &mut self.bob);
            return;
        }
        for _ in 0..64 {
            let from_alice = self.alice.wire.take();
            let from_bob = self.bob.wire.take();
            if from_alice.is_empty() && from_bob.is_empty() {
                return;
            }
            for message in from_alice {
                let message = match message {
                    SipMessage::Request(mut request) if request.method() == &Method::Invite => {
                        for route in &self.record_route {
                            request.headers.push("Record-Route", route.clone());
                        }
                        SipMessage::Request(request)
                    }
                    other => other,
                };
                self.bob.core.receive_message(message);
            }
            for message in from_bob {
                self.alice.core.receive_message(message);
            }
        }
        panic!("peers never fell quiet");
    }
}

#[test]
fn invite_accept_ack_and_bye() {
    let (mut call, _uac) = call(Answer::Accept);
    pump(&mut call.alice, &mut call.bob);

    assert_eq!(logged(&call.alice_events), vec!["trying", "accept"]);
    assert!(logged(&call.bob_events).contains(&"ack".to_string()));
    assert_eq!(call.bob.wire.response_codes(), vec![100, 200]);

    let ok = call.bob.wire.last_response().unwrap();
    assert!(ok.header("Contact").is_some());
    assert!(ok.to_tag().is_some());

    let session = call.sessions.lock()[0].clone();
    assert_eq!(
        session.signaling_state(&call.alice.core),
        Some(SignalingState::Stable)
    );
    assert_eq!(call.alice.core.session_ids().len(), 1);
    assert_eq!(call.bob.core.session_ids().len(), 1);

    let ack = &call.alice.wire.requests_of(Method::Ack)[0];
    assert_eq!(ack.cseq().unwrap().seq, 1);

    session.bye(&mut call.alice.core, None).expect("BYE sent");
    assert!(call.alice.core.session_ids().is_empty());
    pump(&mut call.alice, &mut call.bob);

    assert!(call.bob.core.session_ids().is_empty());
    let bob_log = logged(&call.bob_events);
    assert!(bob_log.ends_with(&["bye".to_string(), "terminated".to_string()]));
    let bye = &call.alice.wire.requests_of(Method::Bye)[0];
    assert_eq!(bye.cseq().unwrap().seq, 2);
    assert_eq!(call.bob.wire.last_response().unwrap().code(), 200);
}

#[test]
fn retransmitted_2xx_is_acknowledged_from_cache() {
    let (mut call, _uac) = call(Answer::Accept);
    pump(&mut call.alice, &mut call.bob);
    let ok = call.bob.wire.last_response().unwrap();
    let acks_before = call.alice.wire.requests_of(Method::Ack).len();

    call.alice.core.receive_message(ok.into());

    let acks = call.alice.wire.requests_of(Method::Ack);
    assert_eq!(acks.len(), acks_before + 1);
    assert_eq!(acks[0], acks[acks.len() - 1]);
    assert_eq!(logged(&call.alice_events), vec!["trying", "accept"]);
}

#[test]
fn rejected_invite_reports_final_response() {
    let (mut call, _uac) = call(Answer::Reject(486));
    pump(&mut call.alice, &mut call.bob);

    assert_eq!(logged(&call.alice_events), vec!["trying", "reject 486"]);
    assert_eq!(call.bob.wire.response_codes(), vec![100, 486]);
    // The transaction layer acknowledged the 486 on the same branch.
    let ack = &call.alice.wire.requests_of(Method::Ack)[0];
    let invite = &call.alice.wire.requests_of(Method::Invite)[0];
    assert_eq!(ack.header("Via"), invite.header("Via"));
    assert!(call.alice.core.session_ids().is_empty());
    assert!(call.bob.core.session_ids().is_empty());
}

#[test]
fn cancel_while_ringing_gets_487() {
    let (mut call, uac) = call(Answer::Ring);
    pump(&mut call.alice, &mut call.bob);
    assert_eq!(
        logged(&call.alice_events),
        vec!["trying", "progress 180 early=true"]
    );
    assert_eq!(call.alice.core.session_ids().len(), 1);
    assert_eq!(call.bob.core.session_ids().len(), 1);

    uac.cancel(&mut call.alice.core, Some("SIP;cause=487"))
        .expect("CANCEL queued");
    pump(&mut call.alice, &mut call.bob);

    let cancel = &call.alice.wire.requests_of(Method::Cancel)[0];
    assert_eq!(cancel.header("Reason"), Some("SIP;cause=487"));
    let codes = call.bob.wire.response_codes();
    assert!(codes.contains(&487));
    assert!(codes.contains(&200));
    assert_eq!(
        logged(&call.alice_events).last().map(String::as_str),
        Some("reject 487")
    );
    assert!(logged(&call.bob_events).contains(&"cancelled".to_string()));
    assert!(call.alice.core.session_ids().is_empty());
    assert!(call.bob.core.session_ids().is_empty());
    assert!(call.ringing.lock().is_some());
}

#[test]
fn ringing_callee_answers_later() {
    let (mut call, _uac) = call(Answer::Ring);
    pump(&mut call.alice, &mut call.bob);

    let invite = call.ringing.lock().take().unwrap();
    let pending = invite.session(&call.bob.core).expect("early session");
    assert!(pending.is_early(&call.bob.core));

    let session = invite
        .accept(
            &mut call.bob.core,
            ResponseOptions::default().with_body(Body::sdp("v=0 answer")),
            Box::new(sip_ua::DefaultSessionDelegate),
        )
        .unwrap();
    assert_eq!(session, pending);
    pump(&mut call.alice, &mut call.bob);

    assert_eq!(logged(&call.alice_events).last().map(String::as_str), Some("accept"));
    // The early session was promoted in place.
    assert_eq!(call.alice.core.session_ids().len(), 1);
    assert!(!session.is_early(&call.bob.core));
}

#[test]
fn accept_without_answer_is_refused() {
    let (mut call, _uac) = call(Answer::Ring);
    pump(&mut call.alice, &mut call.bob);
    let invite = call.ringing.lock().take().unwrap();

    let result = invite.accept(
        &mut call.bob.core,
        ResponseOptions::default(),
        Box::new(sip_ua::DefaultSessionDelegate),
    );
    assert!(matches!(result, Err(CoreError::BodyRequired)));

    let result = invite.accept(
        &mut call.bob.core,
        ResponseOptions::status(302),
        Box::new(sip_ua::DefaultSessionDelegate),
    );
    assert!(matches!(result, Err(CoreError::InvalidStatus { code: 302, .. })));
}

#[test]
fn unacknowledged_2xx_is_retransmitted_then_hung_up() {
    let (mut call, _uac) = call(Answer::Accept);
    // Deliver the INVITE but lose everything bob sends back.
    for message in call.alice.wire.take() {
        call.bob.core.receive_message(message);
    }
    call.bob.wire.take();

    call.clock.advance(Duration::from_millis(600));
    call.bob.core.poll_timers();
    let retransmitted = call
        .bob
        .wire
        .take()
        .into_iter()
        .filter(|message| message.as_response().is_some_and(|r| r.code() == 200))
        .count();
    assert!(retransmitted >= 1);

    for _ in 0..70 {
        call.clock.advance(Duration::from_millis(500));
        call.bob.core.poll_timers();
    }
    assert!(call.bob.core.session_ids().is_empty());
    assert!(!call.bob.wire.requests_of(Method::Bye).is_empty());
    assert!(logged(&call.bob_events).contains(&"terminated".to_string()));
}

#[test]
fn reinvite_updates_the_session() {
    let (mut call, _uac) = call(Answer::Accept);
    pump(&mut call.alice, &mut call.bob);
    let session = call.sessions.lock()[0].clone();

    let reinvite_events = events();
    session
        .invite(
            &mut call.alice.core,
            Some(Body::sdp("v=0 hold")),
            Box::new(Caller {
                events: reinvite_events.clone(),
                sessions: call.sessions.clone(),
            }),
        )
        .expect("re-INVITE sent");
    assert!(matches!(
        session.update(&mut call.alice.core, Some(Body::sdp("v=0 again")), None),
        Err(CoreError::InvalidState { .. })
    ));
    pump(&mut call.alice, &mut call.bob);

    // CalleeSession keeps the default re-INVITE handling, which refuses.
    assert_eq!(logged(&reinvite_events).last().map(String::as_str), Some("reject 488"));
    assert_eq!(
        session.signaling_state(&call.alice.core),
        Some(SignalingState::Stable)
    );
    let reinvite = &call.alice.wire.requests_of(Method::Invite)[1];
    assert_eq!(reinvite.cseq().unwrap().seq, 2);
    assert!(reinvite.to_tag().is_some());
    assert_eq!(call.alice.core.session_ids().len(), 1);
}

#[test]
fn bye_on_early_session_is_refused() {
    let (mut call, _uac) = call(Answer::Ring);
    pump(&mut call.alice, &mut call.bob);
    let early = call
        .ringing
        .lock()
        .as_ref()
        .and_then(|invite| invite.session(&call.bob.core))
        .unwrap();
    assert!(matches!(
        early.bye(&mut call.bob.core, None),
        Err(CoreError::InvalidState { state: "early", .. })
    ));
}

#[test]
fn provisional_echoes_record_route_into_early_dialog() {
    let proxy = "<sip:proxy.example.com;lr>";
    let (mut call, _uac) = call_through(Answer::Ring, &[proxy]);
    call.pump();

    let ringing = call
        .bob
        .wire
        .responses()
        .into_iter()
        .find(|response| response.code() == 180)
        .expect("180 sent");
    assert_eq!(ringing.header("Record-Route"), Some(proxy));
    assert!(ringing.header("Contact").is_some());

    let early = call.alice.core.session_ids()[0].clone();
    let route_set = &call.alice.core.session(&early).unwrap().dialog.route_set;
    assert_eq!(route_set.len(), 1);
    assert_eq!(route_set[0], proxy);
    let bob_early = call.bob.core.session_ids()[0].clone();
    let route_set = &call.bob.core.session(&bob_early).unwrap().dialog.route_set;
    assert_eq!(route_set.len(), 1);
    assert_eq!(route_set[0], proxy);
}

#[test]
fn accept_after_cancel_leaves_no_session() {
    let (mut call, uac) = call(Answer::Ring);
    pump(&mut call.alice, &mut call.bob);
    uac.cancel(&mut call.alice.core, None).expect("CANCEL queued");
    pump(&mut call.alice, &mut call.bob);
    assert!(call.bob.core.session_ids().is_empty());

    let invite = call.ringing.lock().take().unwrap();
    let result = invite.accept(
        &mut call.bob.core,
        ResponseOptions::default().with_body(Body::sdp("v=0 answer")),
        Box::new(CalleeSession {
            events: call.bob_events.clone(),
        }),
    );
    assert!(matches!(result, Err(CoreError::InvalidState { .. })));
    assert!(call.bob.core.session_ids().is_empty());
    assert!(matches!(
        invite.progress(&mut call.bob.core, ResponseOptions::default()),
        Err(CoreError::InvalidState { .. })
    ));
    assert!(call.bob.core.session_ids().is_empty());
    // The only 200 Bob ever sent answers the CANCEL.
    assert!(call
        .bob
        .wire
        .responses()
        .iter()
        .filter(|response| response.code() == 200)
        .all(|response| response.cseq().is_some_and(|cseq| cseq.method == Method::Cancel)));

    advance(
        &call.clock,
        Duration::from_secs(120),
        &mut [&mut call.alice, &mut call.bob],
    );
    assert!(call.bob.core.session_ids().is_empty());
    assert_eq!(call.bob.core.server_transaction_count(), 0);
    assert!(!logged(&call.bob_events).contains(&"terminated".to_string()));
}

#[test]
fn offerless_update_does_not_collide_with_outstanding_offer() {
    let (mut call, _uac) = call(Answer::Accept);
    pump(&mut call.alice, &mut call.bob);
    let alice_session = call.sessions.lock()[0].clone();
    let bob_session = call.answered.lock()[0].clone();

    // Alice's offer is still in flight when Bob's UPDATEs arrive.
    alice_session
        .update(&mut call.alice.core, Some(Body::sdp("v=0 reoffer")), None)
        .expect("UPDATE sent");
    call.alice.wire.take();
    assert_eq!(
        alice_session.signaling_state(&call.alice.core),
        Some(SignalingState::HaveLocalOffer)
    );

    bob_session
        .update(&mut call.bob.core, None, None)
        .expect("UPDATE sent");
    pump(&mut call.alice, &mut call.bob);
    assert_eq!(call.alice.wire.last_response().unwrap().code(), 200);

    bob_session
        .update(&mut call.bob.core, Some(Body::sdp("v=0 counter")), None)
        .expect("UPDATE sent");
    pump(&mut call.alice, &mut call.bob);
    assert_eq!(call.alice.wire.last_response().unwrap().code(), 491);
    assert_eq!(
        bob_session.signaling_state(&call.bob.core),
        Some(SignalingState::Stable)
    );
    assert_eq!(
        alice_session.signaling_state(&call.alice.core),
        Some(SignalingState::HaveLocalOffer)
    );
}
