//! # Summary
//!
//! This module defines the `Learner` struct, which derives the decided
//! log from the acceptors' accept broadcasts and emits it, one payload
//! per line, in strict slot order. Emission stalls at a gap until either
//! an accept quorum fills it or a peer learner relays the decision.
//!
//! Learners answer each other's catch-up requests from their own decided
//! map, which is what lets an instance that boots after the fact
//! reconstruct the entire prefix without involving the acceptors.

use std::io::Write;
use std::time::Duration;

use crate::config::{Config, Role};
use crate::error::Error;
use crate::internal::Rx;
use crate::ledger::Ledger;
use crate::message;
use crate::message::Envelope;
use crate::role;
use crate::shared::Shared;

/// Delay before a stalled learner asks the next peer for catch-up.
const CATCHUP_TIMEOUT: Duration = Duration::from_millis(500);

pub struct Learner<W> {
    /// Unique id of this learner.
    id: u64,

    /// Inbound message channel.
    rx: Rx<Envelope>,

    /// Outgoing connection hub.
    shared: Shared,

    /// Accept tallies and decided slots.
    ledger: Ledger,

    /// Next slot to deliver in order.
    next_to_emit: u64,

    /// Decided payloads are written here, one per line.
    out: W,

    /// Peer learners, in id order, for round-robin catch-up.
    peers: Vec<u64>,

    /// Round-robin cursor over `peers`.
    cursor: usize,

    /// Whether any accept traffic has been observed yet. A learner that
    /// has seen none keeps polling peers for the prefix it may have
    /// missed entirely.
    seen_accepts: bool,

    /// Unrecognized messages dropped.
    dropped: u64,
}

pub async fn run(config: Config, id: u64) -> Result<(), Error> {
    run_with(config, id, std::io::stdout()).await
}

/// Run a learner with the provided output stream.
pub async fn run_with<W: Write>(config: Config, id: u64, out: W) -> Result<(), Error> {
    let addr = role::own_addr(&config, Role::Learner, id)?;
    let rx = role::listen(addr).await?;
    let shared = Shared::new();
    role::connect_all(&shared, &config, &[Role::Learner, Role::Client], (Role::Learner, id));
    Learner::new(id, &config, rx, shared, out).run().await
}

impl<W: Write> Learner<W> {
    pub fn new(id: u64, config: &Config, rx: Rx<Envelope>, shared: Shared, out: W) -> Self {
        let peers = config
            .ids(Role::Learner)
            .into_iter()
            .filter(|peer| *peer != id)
            .collect();
        Learner {
            id,
            rx,
            shared,
            ledger: Ledger::new(config.quorum()),
            next_to_emit: 0,
            out,
            peers,
            cursor: 0,
            seen_accepts: false,
            dropped: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), Error> {
        // A late-booting learner discovers the decided prefix by asking
        self.request_catchup();
        let start = tokio::time::Instant::now() + CATCHUP_TIMEOUT;
        let mut tick = tokio::time::interval_at(start, CATCHUP_TIMEOUT);
        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                | Some(message) => self.respond(message)?,
                | None => return Ok(()),
                },
                _ = tick.tick() => self.poll_catchup(),
            }
        }
    }

    fn respond(&mut self, message: Envelope) -> Result<(), Error> {
        trace!("received {:?}", message);
        match message {
        | Envelope::Accepted(m) => self.respond_accepted(m)?,
        | Envelope::CatchupRequest(m) => self.respond_catchup_request(m),
        | Envelope::CatchupReply(m) => self.respond_catchup_reply(m)?,
        | message => {
            self.dropped += 1;
            trace!("dropping {:?} ({} so far)", message, self.dropped);
        }
        }
        Ok(())
    }

    fn respond_accepted(&mut self, accepted: message::Accepted) -> Result<(), Error> {
        self.seen_accepts = true;
        let decided = self.ledger
            .observe(accepted.s_id, accepted.b_id, accepted.a_id, accepted.value)?
            .map(message::Value::id);
        if let Some(v_id) = decided {
            self.acknowledge(v_id);
            self.emit()?;
        }
        Ok(())
    }

    /// Relay every decision at or above the requested slot, ascending, so
    /// the peer can fill its gap in one pass.
    fn respond_catchup_request(&mut self, request: message::CatchupRequest) {
        debug!("catch-up request from learner {} at slot {}", request.l_id, request.from);
        for (s_id, value) in self.ledger.decided_from(request.from) {
            let reply = message::CatchupReply { s_id, value: value.clone() };
            self.shared.read().send(Role::Learner, request.l_id, Envelope::CatchupReply(reply));
        }
    }

    fn respond_catchup_reply(&mut self, reply: message::CatchupReply) -> Result<(), Error> {
        let learned = self.ledger
            .learn(reply.s_id, reply.value)?
            .map(message::Value::id);
        if let Some(v_id) = learned {
            self.acknowledge(v_id);
            self.emit()?;
        }
        Ok(())
    }

    /// Tell the submitting client its value is decided.
    fn acknowledge(&self, v_id: message::ValueId) {
        let decided = message::Decided { v_id };
        self.shared.read().send(Role::Client, v_id.c_id, Envelope::Decided(decided));
    }

    /// Deliver every contiguous decision from `next_to_emit` on.
    fn emit(&mut self) -> Result<(), Error> {
        let mut emitted = false;
        while let Some(value) = self.ledger.decision(self.next_to_emit) {
            writeln!(self.out, "{}", value.data)?;
            self.next_to_emit += 1;
            emitted = true;
        }
        if emitted {
            self.out.flush()?;
            trace!("emitted up to slot {}", self.next_to_emit);
        }
        Ok(())
    }

    /// Ask the next peer for the missing prefix whenever we are stalled
    /// behind a known decision, or have yet to observe anything at all.
    fn poll_catchup(&mut self) {
        let stalled = self.ledger
            .max_decided()
            .map_or(false, |max| max >= self.next_to_emit);
        let idle = !self.seen_accepts && self.ledger.max_decided().is_none();
        if stalled || idle {
            self.request_catchup();
        }
    }

    fn request_catchup(&mut self) {
        if self.peers.is_empty() {
            return
        }
        let peer = self.peers[self.cursor % self.peers.len()];
        self.cursor += 1;
        debug!("requesting catch-up from learner {} at slot {}", peer, self.next_to_emit);
        let request = message::CatchupRequest { from: self.next_to_emit, l_id: self.id };
        self.shared.read().send(Role::Learner, peer, Envelope::CatchupRequest(request));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal;
    use crate::message::{Accepted, Ballot, CatchupReply, CatchupRequest, Value};

    const CONFIG: &str = "
        acceptor 0 127.0.0.1 7100
        acceptor 1 127.0.0.1 7101
        acceptor 2 127.0.0.1 7102
        learner  0 127.0.0.1 7300
        learner  1 127.0.0.1 7301
        client   1 127.0.0.1 7400
    ";

    struct Harness {
        learner: Learner<Vec<u8>>,
        peer_rx: internal::Rx<Envelope>,
        client_rx: internal::Rx<Envelope>,
    }

    fn harness() -> Harness {
        let config = Config::parse(CONFIG).unwrap();
        let (rx, _tx) = internal::new();
        let shared = Shared::new();
        let (peer_rx, peer_tx) = internal::new();
        shared.write().connect(Role::Learner, 1, peer_tx);
        let (client_rx, client_tx) = internal::new();
        shared.write().connect(Role::Client, 1, client_tx);
        Harness {
            learner: Learner::new(0, &config, rx, shared, Vec::new()),
            peer_rx,
            client_rx,
        }
    }

    fn lines(learner: &Learner<Vec<u8>>) -> Vec<String> {
        String::from_utf8(learner.out.clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn value(seq: u64, data: &str) -> Value {
        Value { c_id: 1, seq, data: data.to_string() }
    }

    fn accepted(a_id: u64, s_id: u64, value: Value) -> Accepted {
        Accepted { a_id, s_id, b_id: Ballot { round: 1, p_id: 0 }, value }
    }

    #[test]
    fn emits_in_slot_order_across_quorums() {
        let mut h = harness();
        // Slot 1 reaches quorum first; nothing may be emitted yet
        h.learner.respond_accepted(accepted(0, 1, value(1, "b"))).unwrap();
        h.learner.respond_accepted(accepted(1, 1, value(1, "b"))).unwrap();
        assert!(lines(&h.learner).is_empty());
        h.learner.respond_accepted(accepted(0, 0, value(0, "a"))).unwrap();
        h.learner.respond_accepted(accepted(2, 0, value(0, "a"))).unwrap();
        assert_eq!(lines(&h.learner), vec!["a", "b"]);
    }

    #[test]
    fn duplicate_accepts_do_not_decide() {
        let mut h = harness();
        let v = value(0, "a");
        h.learner.respond_accepted(accepted(1, 0, v.clone())).unwrap();
        h.learner.respond_accepted(accepted(1, 0, v.clone())).unwrap();
        assert!(lines(&h.learner).is_empty());
        h.learner.respond_accepted(accepted(2, 0, v)).unwrap();
        assert_eq!(lines(&h.learner), vec!["a"]);
    }

    #[test]
    fn decisions_are_acknowledged_to_the_client() {
        let mut h = harness();
        h.learner.respond_accepted(accepted(0, 0, value(3, "a"))).unwrap();
        h.learner.respond_accepted(accepted(1, 0, value(3, "a"))).unwrap();
        match h.client_rx.try_recv() {
        | Some(Envelope::Decided(decided)) => assert_eq!(decided.v_id, value(3, "a").id()),
        | other => panic!("expected ack, got {:?}", other),
        }
    }

    #[test]
    fn catchup_request_is_answered_in_ascending_order() {
        let mut h = harness();
        for s_id in [2, 0, 1] {
            let v = value(s_id, &format!("v{}", s_id));
            h.learner.respond_accepted(accepted(0, s_id, v.clone())).unwrap();
            h.learner.respond_accepted(accepted(1, s_id, v)).unwrap();
        }
        h.learner.respond_catchup_request(CatchupRequest { from: 1, l_id: 1 });
        let mut slots = Vec::new();
        while let Some(message) = h.peer_rx.try_recv() {
            match message {
            | Envelope::CatchupReply(reply) => slots.push(reply.s_id),
            | _ => (),
            }
        }
        assert_eq!(slots, vec![1, 2]);
    }

    #[test]
    fn catchup_reply_fills_gaps_and_emits() {
        let mut h = harness();
        // Quorum seen only for slot 2; slots 0 and 1 arrive by relay
        h.learner.respond_accepted(accepted(0, 2, value(2, "c"))).unwrap();
        h.learner.respond_accepted(accepted(1, 2, value(2, "c"))).unwrap();
        assert!(lines(&h.learner).is_empty());
        h.learner.respond_catchup_reply(CatchupReply { s_id: 0, value: value(0, "a") }).unwrap();
        h.learner.respond_catchup_reply(CatchupReply { s_id: 1, value: value(1, "b") }).unwrap();
        assert_eq!(lines(&h.learner), vec!["a", "b", "c"]);
    }

    #[test]
    fn conflicting_relay_is_fatal() {
        let mut h = harness();
        h.learner.respond_accepted(accepted(0, 0, value(0, "a"))).unwrap();
        h.learner.respond_accepted(accepted(1, 0, value(0, "a"))).unwrap();
        let conflicting = CatchupReply { s_id: 0, value: value(9, "z") };
        assert!(matches!(
            h.learner.respond_catchup_reply(conflicting),
            Err(Error::Safety(_)),
        ));
    }

    #[test]
    fn stalled_learner_polls_peers_round_robin() {
        let mut h = harness();
        // A decision exists above an unfilled slot 0
        h.learner.respond_accepted(accepted(0, 1, value(1, "b"))).unwrap();
        h.learner.respond_accepted(accepted(1, 1, value(1, "b"))).unwrap();
        h.learner.poll_catchup();
        match h.peer_rx.try_recv() {
        | Some(Envelope::CatchupRequest(request)) => {
            assert_eq!(request.from, 0);
            assert_eq!(request.l_id, 0);
        }
        | other => panic!("expected catch-up request, got {:?}", other),
        }
    }

    #[test]
    fn caught_up_learner_stops_polling() {
        let mut h = harness();
        h.learner.respond_accepted(accepted(0, 0, value(0, "a"))).unwrap();
        h.learner.respond_accepted(accepted(1, 0, value(0, "a"))).unwrap();
        h.learner.poll_catchup();
        assert!(h.peer_rx.try_recv().is_none());
    }
}
