use serde_derive::{Deserialize, Serialize};

/// Totally ordered Paxos ballot. Compared lexicographically, so the
/// proposer id breaks ties between equal rounds and ballots are
/// globally unique.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ballot {
    pub round: u64,
    pub p_id: u64,
}

/// Identity of a client submission, unique across retransmissions.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId {
    pub c_id: u64,
    pub seq: u64,
}

/// A client-submitted payload tagged with its submission identity.
/// The payload is opaque to acceptors and learners; only proposers
/// inspect the tag to deduplicate retransmissions.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug)]
pub struct Value {
    pub c_id: u64,
    pub seq: u64,
    pub data: String,
}

impl Value {
    pub fn id(&self) -> ValueId {
        ValueId {
            c_id: self.c_id,
            seq: self.seq,
        }
    }
}

impl Eq for Value {}

impl PartialEq for Value {
    fn eq(&self, rhs: &Self) -> bool {
        self.c_id == rhs.c_id && self.seq == rhs.seq
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.c_id.hash(state);
        self.seq.hash(state);
    }
}

/// Phase 1 request from proposer to acceptors.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prepare {
    pub s_id: u64,
    pub b_id: Ballot,
}

/// Phase 1 reply. Carries the acceptor's latest accepted ballot and value
/// for the slot, if any, so the proposer can uphold the pick-up rule.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Promise {
    pub a_id: u64,
    pub s_id: u64,
    pub b_id: Ballot,
    pub accepted: Option<(Ballot, Value)>,
}

/// Phase 2 request from proposer to acceptors.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Accept {
    pub s_id: u64,
    pub b_id: Ballot,
    pub value: Value,
}

/// Phase 2 acknowledgement, broadcast by acceptors to every learner and
/// every proposer. A quorum of these at one (slot, ballot) is a decision.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Accepted {
    pub a_id: u64,
    pub s_id: u64,
    pub b_id: Ballot,
    pub value: Value,
}

#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Accept,
}

/// Rejection of a prepare or accept below the acceptor's promised ballot.
/// Advisory: proposers escalate on it, but timeouts cover its loss.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nack {
    pub s_id: u64,
    pub promised: Ballot,
    pub phase: Phase,
}

/// Client submission, sent to every proposer.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submit {
    pub value: Value,
}

/// Learner-to-learner request for every known decision at or above `from`.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CatchupRequest {
    pub from: u64,
    pub l_id: u64,
}

/// One decided slot relayed to a catching-up peer learner.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatchupReply {
    pub s_id: u64,
    pub value: Value,
}

/// Acknowledgement to the submitting client that its value was decided.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Decided {
    pub v_id: ValueId,
}

/// The wire protocol. Every process decodes the full enum and silently
/// drops the variants its role does not consume.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    Prepare(Prepare),
    Promise(Promise),
    Accept(Accept),
    Accepted(Accepted),
    Nack(Nack),
    Submit(Submit),
    CatchupRequest(CatchupRequest),
    CatchupReply(CatchupReply),
    Decided(Decided),
}
