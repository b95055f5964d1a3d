//! # Summary
//!
//! This crate replicates a total order of client-submitted values across
//! a small fleet of long-lived processes using multi-decree Paxos: one
//! single-decree instance per slot of an infinite log. Clients feed
//! values to proposers; proposers negotiate with a static set of
//! acceptors to decide exactly one value per slot; learners observe the
//! acceptors' accept broadcasts and emit the decided values in slot
//! order, filling gaps through a learner-to-learner catch-up protocol.
//!
//! A decided value is immutable: every learner that reaches slot `i`
//! emits the same value there. Processes are fail-stop, state is held in
//! memory, and membership is fixed by a configuration file shared by the
//! whole fleet.
//!
//! # Usage
//!
//! Every role instance is one process, launched from the single binary:
//!
//! ```text
//! decree cluster.conf acceptor 0
//! decree cluster.conf proposer 0
//! decree cluster.conf learner 0
//! decree cluster.conf client 0 < values.txt
//! ```
//!
//! The configuration file lists every instance as
//! `<role> <id> <host> <port>`. Clients read one value per line from
//! stdin; learners write one decided value per line to stdout.
//!
//! Processes communicate over TCP with length-delimited, bincode-encoded
//! messages. Loss, duplication, and reordering are tolerated: every
//! protocol layer retransmits on its own timer, and every handler is
//! idempotent.

#[macro_use]
extern crate log;

pub mod config;
pub mod error;
mod internal;
mod ledger;
pub mod message;
pub mod role;
mod shared;
mod socket;

pub use crate::config::{Config, Role};
pub use crate::error::Error;
