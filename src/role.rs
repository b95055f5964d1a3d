//! # Summary
//!
//! This module contains the four role event loops of the protocol, plus
//! the bootstrap plumbing they share: a listening socket that funnels
//! every inbound connection into the role's single receiving channel, and
//! the outgoing connection hub.
//!
//! Each role instance is one long-lived process. Within it, all protocol
//! state is owned by the role's event loop; the listener, connection, and
//! sender tasks only move messages.

pub mod acceptor;
pub mod client;
pub mod learner;
pub mod proposer;

use std::net::SocketAddr;

use crate::config::{Config, Role};
use crate::error::Error;
use crate::internal;
use crate::message::Envelope;
use crate::shared;
use crate::socket;

/// Run the provided role instance to completion. Acceptors, proposers,
/// and learners run until killed; clients return once their input is
/// drained and every submission has been observed decided.
pub async fn run(config: Config, role: Role, id: u64) -> Result<(), Error> {
    info!("starting {} {}", role, id);
    match role {
    | Role::Acceptor => acceptor::run(config, id).await,
    | Role::Client => client::run(config, id).await,
    | Role::Learner => learner::run(config, id).await,
    | Role::Proposer => proposer::run(config, id).await,
    }
}

/// Endpoint of this instance, which must appear in the configuration.
fn own_addr(config: &Config, role: Role, id: u64) -> Result<SocketAddr, Error> {
    config
        .addr(role, id)
        .ok_or_else(|| Error::Config(format!("{} {} not listed in configuration", role, id)))
}

/// Bind this instance's listening socket and return the channel every
/// inbound message is funneled into.
async fn listen(addr: SocketAddr) -> Result<internal::Rx<Envelope>, Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let (rx, tx) = internal::new();
    tokio::spawn(accept_loop(listener, tx));
    Ok(rx)
}

async fn accept_loop(listener: tokio::net::TcpListener, tx: internal::Tx<Envelope>) {
    loop {
        match listener.accept().await {
        | Ok((stream, peer)) => {
            trace!("accepted connection from {}", peer);
            let (peer_rx, _) = socket::split::<Envelope, Envelope>(stream);
            tokio::spawn(pump(peer_rx, tx.clone()));
        }
        | Err(error) => {
            warn!("failed to accept connection: {}", error);
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        }
    }
}

async fn pump(mut peer_rx: socket::Rx<Envelope>, tx: internal::Tx<Envelope>) {
    while let Some(message) = peer_rx.recv().await {
        tx.try_send(message);
    }
}

/// Register outgoing routes to every instance of the provided roles,
/// skipping this instance itself.
fn connect_all(shared: &shared::Shared, config: &Config, roles: &[Role], own: (Role, u64)) {
    for &role in roles {
        for (id, addr) in config.instances(role) {
            if (role, id) == own {
                continue
            }
            shared.write().connect(role, id, shared::spawn_sender(role, id, addr));
        }
    }
}
