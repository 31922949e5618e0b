// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! INVITE usage of a dialog: offer/answer state, 2xx/ACK reliability,
//! reliable provisional sequencing and re-INVITE glare bookkeeping.

use std::time::Duration;

use rand::Rng;
use sip_core::{Body, HeaderAccess, Request, Response};
use sip_transaction::TimerDefaults;
use tracing::{debug, warn};

use crate::{Dialog, DialogError};

/// Offer/answer progress (RFC 3264 as carried by RFC 3261 §13.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingState {
    Initial,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

/// Which side produced an offer/answer body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfferSide {
    Local,
    Remote,
}

/// Timers owned by a session usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionTimer {
    /// Resend the unacknowledged 2xx (UAS, RFC 3261 §13.3.1.4).
    Retransmit2xx,
    /// Give up waiting for the ACK after 64*T1.
    AckWait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Transmit(Response),
    Schedule {
        timer: SessionTimer,
        duration: Duration,
    },
    Cancel(SessionTimer),
    /// The 2xx was never acknowledged; the session should be ended with BYE.
    AckTimeout,
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: SignalingState,
    offer: Option<Body>,
    answer: Option<Body>,
}

/// A dialog carrying an INVITE session.
#[derive(Debug)]
pub struct SessionDialog {
    pub dialog: Dialog,
    signaling: SignalingState,
    offer: Option<Body>,
    answer: Option<Body>,
    rollback: Option<Snapshot>,
    timers: TimerDefaults,
    /// CSeq of the INVITE the last 2xx answered.
    invite_seq: u32,
    pending_2xx: Option<Response>,
    retransmit_interval: Duration,
    ack: Option<Request>,
    next_rseq: u32,
    remote_rseq: Option<u32>,
    outgoing_reinvite: bool,
    incoming_reinvite: bool,
}

impl SessionDialog {
    pub fn new(dialog: Dialog, invite_seq: u32, timers: TimerDefaults) -> Self {
        Self {
            dialog,
            signaling: SignalingState::Initial,
            offer: None,
            answer: None,
            rollback: None,
            timers,
            invite_seq,
            pending_2xx: None,
            retransmit_interval: timers.t1,
            ack: None,
            next_rseq: rand::thread_rng().gen_range(1..=(1u32 << 30)),
            remote_rseq: None,
            outgoing_reinvite: false,
            incoming_reinvite: false,
        }
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling
    }

    pub fn offer(&self) -> Option<&Body> {
        self.offer.as_ref()
    }

    pub fn answer(&self) -> Option<&Body> {
        self.answer.as_ref()
    }

    pub fn invite_seq(&self) -> u32 {
        self.invite_seq
    }

    /// Records the CSeq of an INVITE whose 2xx we are about to acknowledge.
    pub fn set_invite_seq(&mut self, seq: u32) {
        self.invite_seq = seq;
    }

    /// Records an offer or answer carried by a message body.
    ///
    /// Bodies without a session disposition are ignored. An offer while one
    /// is already outstanding is refused; callers check
    /// [`incoming_offer_conflict`](Self::incoming_offer_conflict) first.
    pub fn signaling_transition(
        &mut self,
        body: Option<&Body>,
        side: OfferSide,
    ) -> Result<(), DialogError> {
        let Some(body) = body.filter(|body| body.is_session()) else {
            return Ok(());
        };
        let next = match (self.signaling, side) {
            (SignalingState::Initial | SignalingState::Stable, OfferSide::Local) => {
                SignalingState::HaveLocalOffer
            }
            (SignalingState::Initial | SignalingState::Stable, OfferSide::Remote) => {
                SignalingState::HaveRemoteOffer
            }
            (SignalingState::HaveLocalOffer, OfferSide::Remote)
            | (SignalingState::HaveRemoteOffer, OfferSide::Local) => SignalingState::Stable,
            (state, side) => return Err(DialogError::InvalidSignaling { state, side }),
        };

        if next == SignalingState::Stable {
            self.answer = Some(body.clone());
        } else {
            if self.signaling == SignalingState::Stable {
                self.rollback = Some(Snapshot {
                    state: self.signaling,
                    offer: self.offer.clone(),
                    answer: self.answer.clone(),
                });
            }
            self.offer = Some(body.clone());
            self.answer = None;
        }
        debug!(dialog = %self.dialog.id, from = ?self.signaling, to = ?next, "signaling transition");
        self.signaling = next;
        if next == SignalingState::Stable {
            self.rollback = None;
        }
        Ok(())
    }

    /// Undoes an outstanding offer that was rejected (UPDATE or re-INVITE
    /// failure), restoring the last stable exchange.
    pub fn rollback_offer(&mut self) {
        if !matches!(
            self.signaling,
            SignalingState::HaveLocalOffer | SignalingState::HaveRemoteOffer
        ) {
            return;
        }
        if let Some(snapshot) = self.rollback.take() {
            debug!(dialog = %self.dialog.id, "signaling rollback");
            self.signaling = snapshot.state;
            self.offer = snapshot.offer;
            self.answer = snapshot.answer;
        }
    }

    /// True when a local 2xx to INVITE may go out: either the exchange is
    /// complete or the 2xx itself carries the answer/offer.
    pub fn needs_body_for_accept(&self) -> bool {
        matches!(
            self.signaling,
            SignalingState::Initial | SignalingState::HaveRemoteOffer
        )
    }

    /// Response code for an incoming re-INVITE or UPDATE that collides
    /// with one in progress: 491 if ours is outstanding, 500 if theirs is
    /// (RFC 3261 §14.2, RFC 3311 §5.2). Pending re-INVITEs collide with
    /// any re-INVITE; an outstanding offer only collides with another
    /// offer.
    pub fn incoming_offer_conflict(&self, reinvite: bool, has_offer: bool) -> Option<u16> {
        if reinvite && self.outgoing_reinvite {
            return Some(491);
        }
        if reinvite && self.incoming_reinvite {
            return Some(500);
        }
        if !has_offer {
            return None;
        }
        match self.signaling {
            SignalingState::HaveLocalOffer => Some(491),
            SignalingState::HaveRemoteOffer => Some(500),
            _ => None,
        }
    }

    pub fn set_outgoing_reinvite(&mut self, pending: bool) {
        self.outgoing_reinvite = pending;
    }

    pub fn set_incoming_reinvite(&mut self, pending: bool) {
        self.incoming_reinvite = pending;
    }

    pub fn outgoing_reinvite_pending(&self) -> bool {
        self.outgoing_reinvite
    }

    pub fn incoming_reinvite_pending(&self) -> bool {
        self.incoming_reinvite
    }

    /// Starts end-to-end retransmission of a 2xx to INVITE until its ACK
    /// arrives. The transaction has already sent it once.
    pub fn start_2xx_retransmission(&mut self, response: Response) -> Vec<SessionAction> {
        if let Some(cseq) = response.cseq() {
            self.invite_seq = cseq.seq;
        }
        self.pending_2xx = Some(response);
        self.retransmit_interval = self.timers.t1;
        vec![
            SessionAction::Schedule {
                timer: SessionTimer::Retransmit2xx,
                duration: self.retransmit_interval,
            },
            SessionAction::Schedule {
                timer: SessionTimer::AckWait,
                duration: self.timers.t1x64(),
            },
        ]
    }

    pub fn awaiting_ack(&self) -> bool {
        self.pending_2xx.is_some()
    }

    pub fn on_timer(&mut self, timer: SessionTimer) -> Vec<SessionAction> {
        match timer {
            SessionTimer::Retransmit2xx => {
                let Some(response) = self.pending_2xx.clone() else {
                    return Vec::new();
                };
                self.retransmit_interval = self
                    .retransmit_interval
                    .saturating_mul(2)
                    .min(self.timers.t2);
                vec![
                    SessionAction::Transmit(response),
                    SessionAction::Schedule {
                        timer: SessionTimer::Retransmit2xx,
                        duration: self.retransmit_interval,
                    },
                ]
            }
            SessionTimer::AckWait => {
                if self.pending_2xx.take().is_none() {
                    return Vec::new();
                }
                warn!(dialog = %self.dialog.id, "no ACK for 2xx");
                self.incoming_reinvite = false;
                vec![
                    SessionAction::Cancel(SessionTimer::Retransmit2xx),
                    SessionAction::AckTimeout,
                ]
            }
        }
    }

    /// Matches an ACK against the outstanding 2xx.
    ///
    /// Returns `None` for an ACK that acknowledges nothing (retransmitted or
    /// stale). A session body in the ACK completes the exchange started by
    /// an offer in the 2xx.
    pub fn receive_ack(&mut self, ack: &Request) -> Option<Vec<SessionAction>> {
        let seq = ack.cseq()?.seq;
        if seq != self.invite_seq || self.pending_2xx.is_none() {
            return None;
        }
        self.pending_2xx = None;
        self.incoming_reinvite = false;
        if let Err(err) = self.signaling_transition(ack.body().as_ref(), OfferSide::Remote) {
            warn!(dialog = %self.dialog.id, %err, "ignoring ACK body");
        }
        Some(vec![
            SessionAction::Cancel(SessionTimer::Retransmit2xx),
            SessionAction::Cancel(SessionTimer::AckWait),
        ])
    }

    /// Remembers the ACK sent for a 2xx so retransmissions of that 2xx can
    /// be answered without involving the session user.
    pub fn record_ack(&mut self, ack: Request) {
        if let Some(cseq) = ack.cseq() {
            self.invite_seq = cseq.seq;
        }
        self.ack = Some(ack);
    }

    /// The cached ACK, if `response` retransmits the 2xx it acknowledged.
    pub fn ack_for_retransmission(&self, response: &Response) -> Option<&Request> {
        let seq = response.cseq()?.seq;
        self.ack
            .as_ref()
            .filter(|ack| ack.cseq().is_some_and(|cseq| cseq.seq == seq))
    }

    /// Takes the next local RSeq for a reliable provisional (RFC 3262 §3).
    pub fn next_rseq(&mut self) -> u32 {
        let rseq = self.next_rseq;
        self.next_rseq = self.next_rseq.wrapping_add(1);
        rseq
    }

    /// Accepts a reliable provisional only if it is the next in sequence.
    ///
    /// The first one seen sets the baseline; retransmissions and gaps are
    /// refused so the session user sees each reliable provisional once.
    pub fn reliable_sequence_guard(&mut self, rseq: u32) -> bool {
        match self.remote_rseq {
            Some(last) if rseq != last.wrapping_add(1) => false,
            _ => {
                self.remote_rseq = Some(rseq);
                true
            }
        }
    }

    /// Ends the session usage and returns the timers to cancel.
    pub fn close(&mut self) -> Vec<SessionAction> {
        self.signaling = SignalingState::Closed;
        self.dialog.terminate();
        self.pending_2xx = None;
        vec![
            SessionAction::Cancel(SessionTimer::Retransmit2xx),
            SessionAction::Cancel(SessionTimer::AckWait),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{invite, response};
    use crate::{Dialog, OutgoingRequestOptions};
    use sip_core::Method;

    fn session() -> SessionDialog {
        let req = invite(1);
        let dialog = Dialog::new_uas(&req, "bob-tag", false).unwrap();
        SessionDialog::new(dialog, 1, TimerDefaults::default())
    }

    fn sdp(text: &'static str) -> Body {
        Body::sdp(text.as_bytes())
    }

    #[test]
    fn offer_answer_reaches_stable() {
        let mut s = session();
        s.signaling_transition(Some(&sdp("o1")), OfferSide::Remote).unwrap();
        assert_eq!(s.signaling_state(), SignalingState::HaveRemoteOffer);
        assert!(s.needs_body_for_accept());
        s.signaling_transition(Some(&sdp("a1")), OfferSide::Local).unwrap();
        assert_eq!(s.signaling_state(), SignalingState::Stable);
        assert_eq!(s.answer(), Some(&sdp("a1")));
        assert!(!s.needs_body_for_accept());
    }

    #[test]
    fn second_offer_is_refused() {
        let mut s = session();
        s.signaling_transition(Some(&sdp("o1")), OfferSide::Local).unwrap();
        assert_eq!(
            s.signaling_transition(Some(&sdp("o2")), OfferSide::Local),
            Err(DialogError::InvalidSignaling {
                state: SignalingState::HaveLocalOffer,
                side: OfferSide::Local
            })
        );
        assert_eq!(s.incoming_offer_conflict(false, true), Some(491));
        assert_eq!(s.incoming_offer_conflict(true, false), None);
    }

    #[test]
    fn pending_reinvite_collides_without_offer() {
        let mut s = session();
        s.set_outgoing_reinvite(true);
        assert_eq!(s.incoming_offer_conflict(true, false), Some(491));
        assert_eq!(s.incoming_offer_conflict(false, false), None);
        s.set_outgoing_reinvite(false);
        s.set_incoming_reinvite(true);
        assert_eq!(s.incoming_offer_conflict(true, false), Some(500));
    }

    #[test]
    fn non_session_body_is_ignored() {
        let mut s = session();
        let mut body = sdp("o1");
        body.content_disposition = Some("render".into());
        s.signaling_transition(Some(&body), OfferSide::Remote).unwrap();
        assert_eq!(s.signaling_state(), SignalingState::Initial);
    }

    #[test]
    fn rollback_restores_stable_exchange() {
        let mut s = session();
        s.signaling_transition(Some(&sdp("o1")), OfferSide::Local).unwrap();
        s.signaling_transition(Some(&sdp("a1")), OfferSide::Remote).unwrap();
        s.signaling_transition(Some(&sdp("o2")), OfferSide::Remote).unwrap();
        assert_eq!(s.incoming_offer_conflict(false, true), Some(500));
        assert_eq!(s.incoming_offer_conflict(false, false), None);

        s.rollback_offer();
        assert_eq!(s.signaling_state(), SignalingState::Stable);
        assert_eq!(s.offer(), Some(&sdp("o1")));
        assert_eq!(s.answer(), Some(&sdp("a1")));
    }

    #[test]
    fn uas_2xx_retransmits_until_ack() {
        let req = invite(1);
        let mut s = session();
        let actions = s.start_2xx_retransmission(response(200, &req));
        assert!(actions.contains(&SessionAction::Schedule {
            timer: SessionTimer::AckWait,
            duration: Duration::from_secs(32),
        }));

        let intervals: Vec<Duration> = (0..4)
            .map(|_| {
                s.on_timer(SessionTimer::Retransmit2xx)
                    .into_iter()
                    .find_map(|a| match a {
                        SessionAction::Schedule { duration, .. } => Some(duration),
                        _ => None,
                    })
                    .unwrap()
            })
            .collect();
        assert_eq!(
            intervals,
            [1000, 2000, 4000, 4000].map(Duration::from_millis).to_vec()
        );

        let mut ack = s
            .dialog
            .clone()
            .create_outgoing_request(Method::Ack, OutgoingRequestOptions::default());
        ack.headers.set("CSeq", "1 ACK");
        assert!(s.receive_ack(&ack).is_some());
        assert!(!s.awaiting_ack());
        assert!(s.receive_ack(&ack).is_none(), "retransmitted ACK");
    }

    #[test]
    fn missing_ack_reports_timeout() {
        let req = invite(1);
        let mut s = session();
        s.start_2xx_retransmission(response(200, &req));
        let actions = s.on_timer(SessionTimer::AckWait);
        assert!(actions.contains(&SessionAction::AckTimeout));
        assert!(s.on_timer(SessionTimer::Retransmit2xx).is_empty());
    }

    #[test]
    fn cached_ack_answers_retransmitted_2xx() {
        let req = invite(1);
        let ok = response(200, &req);
        let mut dialog = Dialog::new_uac(&req, &ok).unwrap();
        let ack = dialog.create_outgoing_request(Method::Ack, OutgoingRequestOptions::default());
        let mut s = SessionDialog::new(dialog, 1, TimerDefaults::default());
        assert!(s.ack_for_retransmission(&ok).is_none());
        s.record_ack(ack.clone());
        assert_eq!(s.ack_for_retransmission(&ok), Some(&ack));
    }

    #[test]
    fn reliable_provisionals_are_sequenced() {
        let mut s = session();
        assert!(s.reliable_sequence_guard(10));
        assert!(!s.reliable_sequence_guard(10));
        assert!(!s.reliable_sequence_guard(12));
        assert!(s.reliable_sequence_guard(11));

        let first = s.next_rseq();
        assert_eq!(s.next_rseq(), first + 1);
    }
}
