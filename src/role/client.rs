//! # Summary
//!
//! This module defines the `Client` struct, which feeds values into the
//! proposer pool. Each input line becomes a submission tagged with this
//! client's id and a monotonically increasing sequence number, sent to
//! every proposer.
//!
//! Submissions stay pending until a learner (or a proposer, for a lost
//! acknowledgement) reports them decided, and are retransmitted on a
//! timer until then; proposers deduplicate, so the retransmissions are
//! harmless and only exist to survive proposer crashes. Once the input
//! reaches end-of-file and the pending set drains, the client reports
//! DONE and exits.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::config::{Config, Role};
use crate::error::Error;
use crate::internal::Rx;
use crate::message;
use crate::message::Envelope;
use crate::role;
use crate::shared::Shared;

/// Delay between retransmissions of pending submissions.
const RESEND: Duration = Duration::from_secs(1);

pub struct Client<R> {
    /// Unique id of this client; tags every submission.
    id: u64,

    /// Input stream, one value per line.
    input: Lines<BufReader<R>>,

    /// Inbound message channel, carrying decision acknowledgements.
    rx: Rx<Envelope>,

    /// Outgoing connection hub.
    shared: Shared,

    /// Submissions not yet observed decided, by sequence number.
    pending: BTreeMap<u64, message::Value>,

    /// Sequence number for the next submission.
    next_seq: u64,

    /// Input has reached end-of-file.
    eof: bool,

    /// Unrecognized messages dropped.
    dropped: u64,
}

pub async fn run(config: Config, id: u64) -> Result<(), Error> {
    run_with(config, id, tokio::io::stdin()).await
}

/// Run a client reading values from the provided input stream.
pub async fn run_with<R: AsyncRead + Unpin>(config: Config, id: u64, input: R) -> Result<(), Error> {
    let addr = role::own_addr(&config, Role::Client, id)?;
    let rx = role::listen(addr).await?;
    let shared = Shared::new();
    role::connect_all(&shared, &config, &[Role::Proposer], (Role::Client, id));
    Client::new(id, input, rx, shared).run().await
}

impl<R: AsyncRead + Unpin> Client<R> {
    pub fn new(id: u64, input: R, rx: Rx<Envelope>, shared: Shared) -> Self {
        Client {
            id,
            input: BufReader::new(input).lines(),
            rx,
            shared,
            pending: BTreeMap::new(),
            next_seq: 0,
            eof: false,
            dropped: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), Error> {
        let start = tokio::time::Instant::now() + RESEND;
        let mut tick = tokio::time::interval_at(start, RESEND);
        loop {
            if self.eof && self.pending.is_empty() {
                println!("DONE");
                info!("all submissions decided, done");
                return Ok(())
            }
            tokio::select! {
                line = self.input.next_line(), if !self.eof => match line {
                | Ok(Some(line)) => self.submit(line),
                | Ok(None) => self.eof = true,
                | Err(error) => return Err(Error::Io(error)),
                },
                message = self.rx.recv() => match message {
                | Some(message) => self.respond(message),
                | None => return Ok(()),
                },
                _ = tick.tick() => self.retransmit(),
            }
        }
    }

    fn submit(&mut self, line: String) {
        let value = message::Value {
            c_id: self.id,
            seq: self.next_seq,
            data: line,
        };
        self.next_seq += 1;
        debug!("submitting {:?}", value.id());
        self.pending.insert(value.seq, value.clone());
        let submit = message::Submit { value };
        self.shared.read().broadcast(Role::Proposer, Envelope::Submit(submit));
    }

    fn respond(&mut self, message: Envelope) {
        trace!("received {:?}", message);
        match message {
        | Envelope::Decided(decided) if decided.v_id.c_id == self.id => {
            if self.pending.remove(&decided.v_id.seq).is_some() {
                debug!("submission {:?} decided, {} outstanding", decided.v_id, self.pending.len());
            }
        }
        | message => {
            self.dropped += 1;
            trace!("dropping {:?} ({} so far)", message, self.dropped);
        }
        }
    }

    /// Re-send every outstanding submission.
    fn retransmit(&self) {
        if self.pending.is_empty() {
            return
        }
        debug!("retransmitting {} outstanding submissions", self.pending.len());
        for value in self.pending.values() {
            let submit = message::Submit { value: value.clone() };
            self.shared.read().broadcast(Role::Proposer, Envelope::Submit(submit));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal;
    use crate::message::{Decided, ValueId};

    struct Harness {
        client: Client<&'static [u8]>,
        proposer_rx: internal::Rx<Envelope>,
    }

    fn harness() -> Harness {
        let (rx, _tx) = internal::new();
        let shared = Shared::new();
        let (proposer_rx, proposer_tx) = internal::new();
        shared.write().connect(Role::Proposer, 0, proposer_tx);
        Harness {
            client: Client::new(3, b"".as_slice(), rx, shared),
            proposer_rx,
        }
    }

    #[test]
    fn submissions_are_tagged_and_broadcast() {
        let mut h = harness();
        h.client.submit("first".to_string());
        h.client.submit("second value".to_string());
        match h.proposer_rx.try_recv() {
        | Some(Envelope::Submit(submit)) => {
            assert_eq!(submit.value.id(), ValueId { c_id: 3, seq: 0 });
            assert_eq!(submit.value.data, "first");
        }
        | other => panic!("expected submit, got {:?}", other),
        }
        match h.proposer_rx.try_recv() {
        | Some(Envelope::Submit(submit)) => {
            assert_eq!(submit.value.seq, 1);
            assert_eq!(submit.value.data, "second value");
        }
        | other => panic!("expected submit, got {:?}", other),
        }
    }

    #[test]
    fn acknowledgement_clears_pending() {
        let mut h = harness();
        h.client.submit("a".to_string());
        h.client.submit("b".to_string());
        h.client.respond(Envelope::Decided(Decided {
            v_id: ValueId { c_id: 3, seq: 0 },
        }));
        assert_eq!(h.client.pending.len(), 1);
        assert!(h.client.pending.contains_key(&1));
    }

    #[test]
    fn foreign_acknowledgement_is_ignored() {
        let mut h = harness();
        h.client.submit("a".to_string());
        h.client.respond(Envelope::Decided(Decided {
            v_id: ValueId { c_id: 9, seq: 0 },
        }));
        assert_eq!(h.client.pending.len(), 1);
    }

    #[test]
    fn retransmission_covers_all_outstanding() {
        let mut h = harness();
        h.client.submit("a".to_string());
        h.client.submit("b".to_string());
        while h.proposer_rx.try_recv().is_some() {}
        h.client.retransmit();
        let mut seqs = Vec::new();
        while let Some(message) = h.proposer_rx.try_recv() {
            match message {
            | Envelope::Submit(submit) => seqs.push(submit.value.seq),
            | other => panic!("expected submit, got {:?}", other),
            }
        }
        assert_eq!(seqs, vec![0, 1]);
    }
}
