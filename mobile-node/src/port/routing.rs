//! Routing port - peer and content location (DHT).

use crate::error::NodeError;
use crate::port::host::Host;
use crate::port::repository::Datastore;
use anyhow::Result;
use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use std::sync::Arc;

/// DHT participation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhtMode {
    /// Server once reachable, client otherwise.
    Auto,
    /// Query-only; never answers DHT requests.
    Client,
    Server,
}

/// Abstract interface for the routing system.
#[async_trait]
pub trait Routing: Send + Sync {
    /// Current DHT mode.
    fn mode(&self) -> DhtMode;

    /// Switch DHT mode.
    fn set_mode(&self, mode: DhtMode) -> Result<()>;

    /// Add a known address for a peer to the routing table.
    fn add_peer(&self, peer: PeerId, addr: Multiaddr) -> Result<()>;

    /// Start a routing table refresh.
    async fn bootstrap(&self) -> Result<()>;

    /// Number of peers in the routing table.
    async fn routing_table_size(&self) -> Result<usize>;
}

/// Inputs for a routing constructor besides the host.
#[derive(Clone)]
pub struct RoutingParams {
    pub datastore: Arc<dyn Datastore>,
    pub bootstrap_peers: Vec<(PeerId, Multiaddr)>,
    pub mode: DhtMode,
}

/// Base routing constructor: `(host, params) -> routing`.
pub type RoutingOption = Arc<
    dyn Fn(Arc<dyn Host>, RoutingParams) -> Result<Arc<dyn Routing>, NodeError> + Send + Sync,
>;
