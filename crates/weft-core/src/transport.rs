//! Transport interface boundary.
//!
//! Actual byte movement (WebRTC, BLE, LAN, sneakernet) lives outside this
//! core. The engine only needs two things from a transport: a way to push
//! bytes toward a directly connected peer and a channel on which received
//! bytes arrive tagged with the neighbor they came from.
//!
//! [`MeshFabric`] and [`MeshLink`] provide an in-process implementation
//! used to wire multi-engine topologies in tests.

use crate::frame::PeerId;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport failures as seen by the engine.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection to the peer
    #[error("peer unreachable: {0}")]
    Unreachable(PeerId),

    /// The peer's receive side has gone away
    #[error("transport closed")]
    Closed,
}

/// Inbound delivery: the neighbor the bytes arrived from, and the bytes.
pub type Inbound = (PeerId, Vec<u8>);

/// Capability the engine requires from any transport.
pub trait Transport: Send + Sync + 'static {
    /// Send `bytes` to a directly connected peer, resolving when the
    /// transport has accepted (or refused) the frame.
    fn send(
        &self,
        peer: PeerId,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// In-process transport fabric: a mailbox per attached node.
///
/// Connectivity is directional per link and managed on the [`MeshLink`],
/// so tests can build line, ring, or redundant-path topologies.
pub struct MeshFabric {
    inboxes: DashMap<PeerId, mpsc::Sender<Inbound>>,
}

/// Mailbox depth per attached node.
const INBOX_DEPTH: usize = 1024;

impl MeshFabric {
    /// Create an empty fabric.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inboxes: DashMap::new(),
        })
    }

    /// Attach a node: returns its link handle and the inbound stream the
    /// engine will consume.
    pub fn attach(self: &Arc<Self>, local: PeerId) -> (MeshLink, mpsc::Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel(INBOX_DEPTH);
        self.inboxes.insert(local, tx);
        (
            MeshLink {
                local,
                fabric: Arc::clone(self),
                neighbors: Arc::new(DashSet::new()),
            },
            rx,
        )
    }
}

/// One node's handle onto a [`MeshFabric`].
///
/// Clones share the neighbor set, so a test can keep a handle for topology
/// changes after the engine takes ownership of its copy.
#[derive(Clone)]
pub struct MeshLink {
    local: PeerId,
    fabric: Arc<MeshFabric>,
    neighbors: Arc<DashSet<PeerId>>,
}

impl MeshLink {
    /// Open a directional link toward `peer`.
    pub fn connect(&self, peer: PeerId) {
        self.neighbors.insert(peer);
    }

    /// Drop the directional link toward `peer`.
    pub fn disconnect(&self, peer: &PeerId) {
        self.neighbors.remove(peer);
    }

    /// Peers this node can currently reach.
    #[must_use]
    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }
}

impl Transport for MeshLink {
    async fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.neighbors.contains(&peer) {
            return Err(TransportError::Unreachable(peer));
        }
        let tx = self
            .fabric
            .inboxes
            .get(&peer)
            .ok_or(TransportError::Unreachable(peer))?
            .clone();
        tx.send((self.local, bytes))
            .await
            .map_err(|_| TransportError::Closed)
    }
}
