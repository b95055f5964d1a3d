//! # Summary
//!
//! This module defines the `Proposer` struct, which drives client
//! submissions to decision. It works one slot at a time: phase 1 vies
//! for a promise quorum at the current ballot, phase 2 proposes a value
//! and waits for the accept broadcasts to reach quorum.
//!
//! Conflict handling follows the usual escalation discipline: any nack
//! carrying a higher promised ballot, or a phase timing out below
//! quorum, moves the proposer to a strictly higher round and restarts
//! phase 1 after a randomized exponential backoff. The backoff is what
//! breaks dueling-proposer livelock, so it is load-bearing, not a tuning
//! nicety.

use std::collections::HashMap as Map;
use std::collections::HashSet as Set;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{Config, Role};
use crate::error::Error;
use crate::internal::Rx;
use crate::ledger::Ledger;
use crate::message;
use crate::message::Envelope;
use crate::role;
use crate::shared::Shared;

/// Event loop heartbeat; bounds timer resolution.
const TICK: Duration = Duration::from_millis(50);

/// Base delay before retransmitting to unresponsive acceptors.
const RESEND_MS: u64 = 300;

/// Retransmissions per phase before the attempt is abandoned.
const RETRY_CAP: u32 = 3;

/// Bounds for the escalation backoff, in milliseconds.
const BACKOFF_FLOOR: f32 = 50.0;
const BACKOFF_CAP: f32 = 2000.0;

pub struct Proposer {
    /// Unique id of this proposer; breaks ballot ties.
    id: u64,

    /// Number of acceptors constituting a majority of all acceptors.
    quorum: usize,

    /// The static acceptor set.
    acceptors: Vec<u64>,

    /// Inbound message channel.
    rx: Rx<Envelope>,

    /// Outgoing connection hub.
    shared: Shared,

    /// Submissions not yet observed decided, strictly FIFO.
    queue: VecDeque<message::Value>,

    /// Identities of queued submissions.
    queued: Set<message::ValueId>,

    /// Identities of own submissions already observed decided.
    decided_mine: Set<message::ValueId>,

    /// This proposer's view of the decided log, fed by the acceptors'
    /// accept broadcasts.
    ledger: Ledger,

    /// Lowest slot this proposer has not yet attempted.
    next_slot: u64,

    /// Monotonically increasing round for this proposer's ballots.
    round: u64,

    /// Current escalation backoff in milliseconds.
    backoff: f32,

    /// When set, no new attempt starts before this instant.
    restart_at: Option<Instant>,

    /// The in-flight attempt, at most one.
    attempt: Option<Attempt>,

    /// Unrecognized messages dropped.
    dropped: u64,
}

struct Attempt {
    s_id: u64,
    b_id: message::Ballot,
    phase: Phase,

    /// Acceptors that have yet to respond in the current phase.
    waiting: Set<u64>,

    resend_at: Instant,
    retries: u32,
}

enum Phase {
    /// Collecting promises; values carried by them feed the pick-up rule.
    Preparing {
        promises: Map<u64, Option<(message::Ballot, message::Value)>>,
    },

    /// Proposed a value; quorum detection rides on the ledger.
    Accepting {
        value: message::Value,
    },
}

impl Attempt {
    /// The message this attempt narrowcasts in its current phase.
    fn message(&self) -> Envelope {
        match &self.phase {
        | Phase::Preparing { .. } => Envelope::Prepare(message::Prepare {
            s_id: self.s_id,
            b_id: self.b_id,
        }),
        | Phase::Accepting { value } => Envelope::Accept(message::Accept {
            s_id: self.s_id,
            b_id: self.b_id,
            value: value.clone(),
        }),
        }
    }
}

pub async fn run(config: Config, id: u64) -> Result<(), Error> {
    let addr = role::own_addr(&config, Role::Proposer, id)?;
    let rx = role::listen(addr).await?;
    let shared = Shared::new();
    role::connect_all(&shared, &config, &[Role::Acceptor, Role::Client], (Role::Proposer, id));
    Proposer::new(id, &config, rx, shared).run().await
}

impl Proposer {
    pub fn new(id: u64, config: &Config, rx: Rx<Envelope>, shared: Shared) -> Self {
        Proposer {
            id,
            quorum: config.quorum(),
            acceptors: config.ids(Role::Acceptor),
            rx,
            shared,
            queue: VecDeque::new(),
            queued: Set::default(),
            decided_mine: Set::default(),
            ledger: Ledger::new(config.quorum()),
            next_slot: 0,
            round: 1,
            backoff: BACKOFF_FLOOR * (1.0 + rand::random::<f32>()),
            restart_at: None,
            attempt: None,
            dropped: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), Error> {
        let mut tick = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                | Some(message) => self.respond(message)?,
                | None => return Ok(()),
                },
                _ = tick.tick() => self.poll_timers(),
            }
        }
    }

    fn respond(&mut self, message: Envelope) -> Result<(), Error> {
        trace!("received {:?}", message);
        match message {
        | Envelope::Submit(m) => self.respond_submit(m),
        | Envelope::Promise(m) => self.respond_promise(m),
        | Envelope::Accepted(m) => self.respond_accepted(m)?,
        | Envelope::Nack(m) => self.respond_nack(m),
        | message => {
            self.dropped += 1;
            trace!("dropping {:?} ({} so far)", message, self.dropped);
        }
        }
        Ok(())
    }

    /// Queue a submission unless it is already queued or already decided.
    /// A retransmission of a decided submission means the client missed
    /// its acknowledgement, so repeat it.
    fn respond_submit(&mut self, submit: message::Submit) {
        let v_id = submit.value.id();
        if self.decided_mine.contains(&v_id) {
            let decided = message::Decided { v_id };
            self.shared.read().send(Role::Client, v_id.c_id, Envelope::Decided(decided));
            return
        }
        if !self.queued.insert(v_id) {
            return
        }
        debug!("queued {:?}", v_id);
        self.queue.push_back(submit.value);
        self.try_begin();
    }

    /// Collect a promise. On quorum, pick the value to propose: the value
    /// of the highest accepted ballot any promise carried, or our own
    /// queue head if the slot is untouched.
    fn respond_promise(&mut self, promise: message::Promise) {
        let attempt = match &mut self.attempt {
        | Some(attempt) if attempt.s_id == promise.s_id && attempt.b_id == promise.b_id => attempt,
        | _ => return,
        };
        let promises = match &mut attempt.phase {
        | Phase::Preparing { promises } => promises,
        | Phase::Accepting { .. } => return,
        };
        promises.insert(promise.a_id, promise.accepted);
        attempt.waiting.remove(&promise.a_id);
        if promises.len() < self.quorum {
            return
        }

        let picked = promises
            .values()
            .filter_map(|accepted| accepted.as_ref())
            .max_by_key(|(b_id, _)| *b_id)
            .map(|(_, value)| value.clone());
        let value = match picked.or_else(|| self.queue.front().cloned()) {
        | Some(value) => value,
        | None => {
            // Nothing to propose; release the slot
            debug!("releasing slot {}", attempt.s_id);
            self.attempt = None;
            return
        }
        };

        debug!("proposing {:?} for slot {} at {:?}", value.id(), attempt.s_id, attempt.b_id);
        attempt.phase = Phase::Accepting { value };
        attempt.waiting = self.acceptors.iter().copied().collect();
        attempt.resend_at = resend_deadline();
        attempt.retries = 0;
        let message = attempt.message();
        self.shared.read().broadcast(Role::Acceptor, message);
    }

    /// Every accept broadcast feeds the ledger; a quorum there is a
    /// decision, whether the winning ballot was ours or not.
    fn respond_accepted(&mut self, accepted: message::Accepted) -> Result<(), Error> {
        let decided = self.ledger
            .observe(accepted.s_id, accepted.b_id, accepted.a_id, accepted.value)?
            .cloned();
        if let Some(value) = decided {
            self.respond_decide(accepted.s_id, value);
            return Ok(())
        }
        if let Some(attempt) = &mut self.attempt {
            if attempt.s_id == accepted.s_id && attempt.b_id == accepted.b_id {
                attempt.waiting.remove(&accepted.a_id);
            }
        }
        Ok(())
    }

    /// A slot decided. Retire the value if it was ours, abandon any
    /// attempt on that slot, and move on to the next undecided slot.
    fn respond_decide(&mut self, s_id: u64, value: message::Value) {
        let v_id = value.id();
        if self.queued.remove(&v_id) {
            self.queue.retain(|queued| queued.id() != v_id);
            self.decided_mine.insert(v_id);
            info!("own submission {:?} decided in slot {}", v_id, s_id);
        }
        if let Some(attempt) = &self.attempt {
            if attempt.s_id == s_id {
                self.attempt = None;
                self.backoff = BACKOFF_FLOOR * (1.0 + rand::random::<f32>());
            }
        }
        while self.ledger.decision(self.next_slot).is_some() {
            self.next_slot += 1;
        }
        self.try_begin();
    }

    /// A higher promise is out there; escalate past it.
    fn respond_nack(&mut self, nack: message::Nack) {
        match &self.attempt {
        | Some(attempt) if attempt.s_id == nack.s_id && nack.promised > attempt.b_id => (),
        | _ => return,
        }
        debug!("slot {} preempted by {:?} in {:?}", nack.s_id, nack.promised, nack.phase);
        self.escalate(nack.promised.round);
    }

    /// Start phase 1 on the next undecided slot, if there is work and no
    /// attempt or backoff in progress.
    fn try_begin(&mut self) {
        if self.attempt.is_some() || self.restart_at.is_some() || self.queue.is_empty() {
            return
        }
        while self.ledger.decision(self.next_slot).is_some() {
            self.next_slot += 1;
        }
        let b_id = message::Ballot { round: self.round, p_id: self.id };
        let attempt = Attempt {
            s_id: self.next_slot,
            b_id,
            phase: Phase::Preparing { promises: Map::default() },
            waiting: self.acceptors.iter().copied().collect(),
            resend_at: resend_deadline(),
            retries: 0,
        };
        debug!("preparing slot {} at {:?}", attempt.s_id, b_id);
        let message = attempt.message();
        self.attempt = Some(attempt);
        self.shared.read().broadcast(Role::Acceptor, message);
    }

    /// Move to a strictly higher round and restart after a jittered
    /// exponential backoff.
    fn escalate(&mut self, observed_round: u64) {
        self.round = self.round.max(observed_round) + 1;
        self.attempt = None;
        self.restart_at = Some(Instant::now() + Duration::from_millis(self.backoff.round() as u64));
        self.backoff = (self.backoff * (1.5 + rand::random::<f32>())).min(BACKOFF_CAP);
    }

    /// Heartbeat: expire the backoff, retransmit the current phase to
    /// unresponsive acceptors, and escalate once the retry cap is spent.
    fn poll_timers(&mut self) {
        let now = Instant::now();
        if let Some(restart_at) = self.restart_at {
            if now >= restart_at {
                self.restart_at = None;
                self.try_begin();
            }
        }
        let mut timed_out = false;
        if let Some(attempt) = &mut self.attempt {
            if now >= attempt.resend_at {
                if attempt.retries < RETRY_CAP {
                    attempt.retries += 1;
                    attempt.resend_at = resend_deadline();
                    trace!("retransmitting slot {} to {:?}", attempt.s_id, attempt.waiting);
                    let message = attempt.message();
                    self.shared.read().narrowcast(Role::Acceptor, &attempt.waiting, message);
                } else {
                    timed_out = true;
                }
            }
        }
        if timed_out {
            debug!("attempt timed out below quorum");
            self.escalate(self.round);
        }
    }
}

fn resend_deadline() -> Instant {
    Instant::now() + Duration::from_millis(RESEND_MS + rand::random::<u64>() % 200)
}
