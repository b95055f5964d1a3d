//! # Summary
//!
//! This module implements a central hub for outgoing messages. Each
//! process registers one transmitting channel per destination instance;
//! behind every channel a sender task owns the actual TCP connection,
//! re-dialing with a short delay whenever the remote end is down. We wrap
//! the central `State` type with `Arc<RwLock<T>>` to share the
//! connections between concurrently running tasks.
//!
//! Delivery is best-effort: a message in flight when a connection breaks
//! is lost, and every protocol layer retransmits on its own timer.

use std::collections::HashMap as Map;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::Role;
use crate::internal;
use crate::message::Envelope;
use crate::socket;

/// Delay between dial attempts to an unreachable instance.
const REDIAL: Duration = Duration::from_millis(100);

/// Thread-safe wrapper around the `State` forwarding hub.
#[derive(Clone)]
pub struct Shared(Arc<RwLock<State>>);

impl Shared {
    pub fn new() -> Self {
        Shared(Arc::new(RwLock::new(State { txs: Map::default() })))
    }

    /// Acquires a read lock on the underlying state.
    pub fn read(&self) -> RwLockReadGuard<State> {
        self.0.read()
    }

    /// Acquires a write lock on the underlying state.
    pub fn write(&self) -> RwLockWriteGuard<State> {
        self.0.write()
    }
}

/// Collection of transmitting channels, keyed by destination instance.
pub struct State {
    txs: Map<(Role, u64), internal::Tx<Envelope>>,
}

impl State {
    /// Registers the provided channel as the route to an instance.
    pub fn connect(&mut self, role: Role, id: u64, tx: internal::Tx<Envelope>) {
        self.txs.insert((role, id), tx);
    }

    /// Forwards a message to the provided instance. Messages to
    /// unregistered instances are dropped.
    pub fn send(&self, role: Role, id: u64, message: Envelope) {
        match self.txs.get(&(role, id)) {
        | Some(tx) => tx.try_send(message),
        | None => trace!("no route to {} {}, dropping {:?}", role, id, message),
        }
    }

    /// Forwards a message to every registered instance of a role.
    pub fn broadcast(&self, role: Role, message: Envelope) {
        for ((_, id), tx) in self.txs.iter().filter(|((r, _), _)| *r == role) {
            trace!("broadcasting to {} {}", role, id);
            tx.try_send(message.clone());
        }
    }

    /// Forwards a message to the provided list of instances of a role.
    pub fn narrowcast<'a, I>(&self, role: Role, ids: I, message: Envelope)
        where I: IntoIterator<Item = &'a u64>
    {
        for id in ids.into_iter() {
            self.send(role, *id, message.clone());
        }
    }
}

/// Spawn the sender task owning the connection to one instance, and
/// return the channel that feeds it.
pub fn spawn_sender(role: Role, id: u64, addr: SocketAddr) -> internal::Tx<Envelope> {
    let (rx, tx) = internal::new();
    tokio::spawn(sender(role, id, addr, rx));
    tx
}

async fn sender(role: Role, id: u64, addr: SocketAddr, mut rx: internal::Rx<Envelope>) {
    loop {
        let stream = match tokio::net::TcpStream::connect(addr).await {
        | Ok(stream) => stream,
        | Err(error) => {
            trace!("cannot reach {} {} at {}: {}", role, id, addr, error);
            tokio::time::sleep(REDIAL).await;
            continue
        }
        };
        debug!("connected to {} {} at {}", role, id, addr);
        let (_, mut peer_tx) = socket::split::<Envelope, Envelope>(stream);
        loop {
            match rx.recv().await {
            | None => return,
            | Some(message) => {
                if let Err(error) = peer_tx.send(message).await {
                    warn!("connection to {} {} lost: {}", role, id, error);
                    break
                }
            }
            }
        }
        tokio::time::sleep(REDIAL).await;
    }
}
