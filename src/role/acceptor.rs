use std::collections::HashMap as Map;

use crate::config::{Config, Role};
use crate::error::Error;
use crate::internal::Rx;
use crate::message;
use crate::message::Envelope;
use crate::role;
use crate::shared::Shared;

/// Single-decree Paxos safety, one instance per slot. The acceptor never
/// initiates and never retries; proposers drive retransmission.
pub struct Acceptor {
    id: u64,
    slots: Map<u64, Slot>,
    rx: Rx<Envelope>,
    shared: Shared,
    dropped: u64,
}

/// Per-slot state, created lazily on the first message naming the slot.
/// The accepted ballot never exceeds the promised ballot, and the
/// accepted value exists exactly when the accepted ballot does.
#[derive(Default)]
struct Slot {
    promised: Option<message::Ballot>,
    accepted: Option<(message::Ballot, message::Value)>,
}

pub async fn run(config: Config, id: u64) -> Result<(), Error> {
    let addr = role::own_addr(&config, Role::Acceptor, id)?;
    let rx = role::listen(addr).await?;
    let shared = Shared::new();
    role::connect_all(&shared, &config, &[Role::Proposer, Role::Learner], (Role::Acceptor, id));
    Acceptor::new(id, rx, shared).run().await
}

impl Acceptor {
    pub fn new(id: u64, rx: Rx<Envelope>, shared: Shared) -> Self {
        Acceptor {
            id,
            slots: Map::default(),
            rx,
            shared,
            dropped: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), Error> {
        while let Some(message) = self.rx.recv().await {
            trace!("received {:?}", message);
            match message {
            | Envelope::Prepare(m) => self.respond_prepare(m),
            | Envelope::Accept(m) => self.respond_accept(m),
            | message => {
                self.dropped += 1;
                trace!("dropping {:?} ({} so far)", message, self.dropped);
            }
            }
        }
        Ok(())
    }

    /// Phase 1: promise not to accept below the ballot if it is at least
    /// our promise, and report what we last accepted for the slot. A
    /// repeated prepare at exactly the promised ballot is answered again
    /// with no state change.
    fn respond_prepare(&mut self, prepare: message::Prepare) {
        let slot = self.slots.entry(prepare.s_id).or_default();
        match slot.promised {
        | Some(promised) if prepare.b_id < promised => {
            let nack = message::Nack {
                s_id: prepare.s_id,
                promised,
                phase: message::Phase::Prepare,
            };
            trace!("rejecting {:?} below {:?}", prepare, promised);
            self.shared.read().send(Role::Proposer, prepare.b_id.p_id, Envelope::Nack(nack));
        }
        | _ => {
            slot.promised = Some(prepare.b_id);
            let promise = message::Promise {
                a_id: self.id,
                s_id: prepare.s_id,
                b_id: prepare.b_id,
                accepted: slot.accepted.clone(),
            };
            trace!("sending {:?} to {}", promise, prepare.b_id.p_id);
            self.shared.read().send(Role::Proposer, prepare.b_id.p_id, Envelope::Promise(promise));
        }
        }
    }

    /// Phase 2: accept the value unless we have promised a higher ballot.
    /// Successful accepts are broadcast to every learner and every
    /// proposer, which is what lets late-joining learners and competing
    /// proposers observe the outcome.
    fn respond_accept(&mut self, accept: message::Accept) {
        let slot = self.slots.entry(accept.s_id).or_default();
        match slot.promised {
        | Some(promised) if accept.b_id < promised => {
            let nack = message::Nack {
                s_id: accept.s_id,
                promised,
                phase: message::Phase::Accept,
            };
            trace!("rejecting {:?} below {:?}", accept, promised);
            self.shared.read().send(Role::Proposer, accept.b_id.p_id, Envelope::Nack(nack));
        }
        | _ => {
            slot.promised = Some(accept.b_id);
            slot.accepted = Some((accept.b_id, accept.value.clone()));
            let accepted = message::Accepted {
                a_id: self.id,
                s_id: accept.s_id,
                b_id: accept.b_id,
                value: accept.value,
            };
            trace!("accepted {:?}", accepted);
            self.shared.read().broadcast(Role::Learner, Envelope::Accepted(accepted.clone()));
            self.shared.read().broadcast(Role::Proposer, Envelope::Accepted(accepted));
        }
        }
    }
}
