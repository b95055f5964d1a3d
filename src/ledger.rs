//! # Summary
//!
//! This module implements the decision rule shared by learners and
//! proposers: tally `Accepted` reports per (slot, ballot) and record a
//! decision once a quorum of acceptors agrees. Decisions are final; a
//! conflicting second report for a decided slot is a safety violation and
//! surfaces as an error the caller must treat as fatal.

use std::collections::BTreeMap;
use std::collections::HashMap as Map;
use std::collections::HashSet as Set;

use crate::error::Error;
use crate::message::{Ballot, Value};

pub struct Ledger {
    /// Number of acceptors constituting a majority of all acceptors.
    quorum: usize,

    /// Acceptors seen accepting each still-undecided (slot, ballot).
    accepts: Map<(u64, Ballot), (Value, Set<u64>)>,

    /// Decided slots. Ordered so catch-up replies ascend.
    decisions: BTreeMap<u64, Value>,
}

impl Ledger {
    pub fn new(quorum: usize) -> Self {
        Ledger {
            quorum,
            accepts: Map::default(),
            decisions: BTreeMap::default(),
        }
    }

    /// Tally one `Accepted` report. Re-delivery is idempotent. Returns the
    /// newly decided value if this report completes a quorum.
    pub fn observe(
        &mut self,
        s_id: u64,
        b_id: Ballot,
        a_id: u64,
        value: Value,
    ) -> Result<Option<&Value>, Error> {
        if self.decisions.contains_key(&s_id) {
            // Stragglers from superseded ballots are expected
            return Ok(None)
        }
        let (stored, a_ids) = self.accepts
            .entry((s_id, b_id))
            .or_insert_with(|| (value.clone(), Set::default()));
        if stored.id() != value.id() || stored.data != value.data {
            return Err(Error::Safety(format!(
                "acceptor {} reports {:?} at slot {} ballot {:?}, but {:?} was reported earlier",
                a_id, value, s_id, b_id, stored,
            )));
        }
        a_ids.insert(a_id);
        if a_ids.len() < self.quorum {
            return Ok(None)
        }
        let decided = stored.clone();
        debug!("slot {} decided as {:?} by quorum at {:?}", s_id, decided.id(), b_id);
        self.accepts.retain(|(s, _), _| *s != s_id);
        self.decisions.insert(s_id, decided);
        Ok(self.decisions.get(&s_id))
    }

    /// Record a decision relayed by a peer. First write wins; a mismatched
    /// second write is a safety violation. Returns the value if it was new.
    pub fn learn(&mut self, s_id: u64, value: Value) -> Result<Option<&Value>, Error> {
        match self.decisions.get(&s_id) {
        | Some(existing) if existing.id() == value.id() && existing.data == value.data => Ok(None),
        | Some(existing) => Err(Error::Safety(format!(
            "slot {} decided as {:?}, but a peer reports {:?}",
            s_id, existing, value,
        ))),
        | None => {
            debug!("slot {} decided as {:?} by relay", s_id, value.id());
            self.accepts.retain(|(s, _), _| *s != s_id);
            self.decisions.insert(s_id, value);
            Ok(self.decisions.get(&s_id))
        }
        }
    }

    pub fn decision(&self, s_id: u64) -> Option<&Value> {
        self.decisions.get(&s_id)
    }

    /// Highest decided slot, if any.
    pub fn max_decided(&self) -> Option<u64> {
        self.decisions.keys().next_back().copied()
    }

    /// Every decided slot at or above `from`, ascending.
    pub fn decided_from(&self, from: u64) -> impl Iterator<Item = (u64, &Value)> {
        self.decisions.range(from..).map(|(s_id, value)| (*s_id, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(c_id: u64, seq: u64, data: &str) -> Value {
        Value { c_id, seq, data: data.to_string() }
    }

    fn ballot(round: u64, p_id: u64) -> Ballot {
        Ballot { round, p_id }
    }

    #[test]
    fn decides_on_quorum() {
        let mut ledger = Ledger::new(2);
        let v = value(1, 0, "a");
        assert!(ledger.observe(0, ballot(1, 0), 0, v.clone()).unwrap().is_none());
        let decided = ledger.observe(0, ballot(1, 0), 1, v.clone()).unwrap().cloned();
        assert_eq!(decided.unwrap().data, "a");
        assert_eq!(ledger.decision(0).unwrap().data, "a");
        assert_eq!(ledger.max_decided(), Some(0));
    }

    #[test]
    fn duplicate_reports_are_idempotent() {
        let mut ledger = Ledger::new(2);
        let v = value(1, 0, "a");
        for _ in 0..3 {
            assert!(ledger.observe(0, ballot(1, 0), 0, v.clone()).unwrap().is_none());
        }
        assert!(ledger.decision(0).is_none());
    }

    #[test]
    fn ballots_tally_separately() {
        let mut ledger = Ledger::new(2);
        assert!(ledger.observe(0, ballot(1, 0), 0, value(1, 0, "a")).unwrap().is_none());
        assert!(ledger.observe(0, ballot(2, 1), 1, value(2, 0, "b")).unwrap().is_none());
        assert!(ledger.decision(0).is_none());
    }

    #[test]
    fn replay_after_decision_reproduces_it() {
        // Feeding the same accept traffic to a fresh ledger yields the
        // same decided prefix.
        let reports = [
            (0, ballot(1, 0), 0, value(1, 0, "a")),
            (0, ballot(1, 0), 1, value(1, 0, "a")),
            (1, ballot(1, 0), 1, value(1, 1, "b")),
            (1, ballot(1, 0), 2, value(1, 1, "b")),
        ];
        let mut first = Ledger::new(2);
        let mut second = Ledger::new(2);
        for (s, b, a, v) in &reports {
            first.observe(*s, *b, *a, v.clone()).unwrap();
        }
        for (s, b, a, v) in reports.iter().chain(&reports) {
            second.observe(*s, *b, *a, v.clone()).unwrap();
        }
        for s_id in 0..2 {
            assert_eq!(first.decision(s_id), second.decision(s_id));
        }
    }

    #[test]
    fn conflicting_report_at_same_ballot_is_fatal() {
        let mut ledger = Ledger::new(2);
        ledger.observe(0, ballot(1, 0), 0, value(1, 0, "a")).unwrap();
        assert!(matches!(
            ledger.observe(0, ballot(1, 0), 1, value(9, 9, "z")),
            Err(Error::Safety(_)),
        ));
    }

    #[test]
    fn relay_first_write_wins_and_mismatch_is_fatal() {
        let mut ledger = Ledger::new(2);
        assert!(ledger.learn(3, value(1, 0, "a")).unwrap().is_some());
        assert!(ledger.learn(3, value(1, 0, "a")).unwrap().is_none());
        assert!(matches!(
            ledger.learn(3, value(2, 2, "b")),
            Err(Error::Safety(_)),
        ));
        assert_eq!(ledger.decision(3).unwrap().data, "a");
    }

    #[test]
    fn late_accepts_for_decided_slot_are_ignored() {
        let mut ledger = Ledger::new(2);
        let v = value(1, 0, "a");
        ledger.observe(0, ballot(2, 1), 0, v.clone()).unwrap();
        ledger.observe(0, ballot(2, 1), 1, v.clone()).unwrap();
        // A lower-ballot accept with a different value is old news, not a
        // violation.
        assert!(ledger.observe(0, ballot(1, 0), 2, value(5, 5, "x")).unwrap().is_none());
        assert_eq!(ledger.decision(0).unwrap().data, "a");
    }

    #[test]
    fn decided_from_ascends() {
        let mut ledger = Ledger::new(1);
        for (s_id, data) in [(2, "c"), (0, "a"), (1, "b")] {
            ledger.learn(s_id, value(1, s_id, data)).unwrap();
        }
        let slots = ledger.decided_from(1).map(|(s, _)| s).collect::<Vec<_>>();
        assert_eq!(slots, vec![1, 2]);
    }
}
