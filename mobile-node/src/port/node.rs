//! Node port - the constructed network node and its constructor.

use crate::domain::NodeFeatures;
use crate::error::NodeError;
use crate::port::host::{Host, HostOption};
use crate::port::repository::Repository;
use crate::port::routing::{Routing, RoutingOption};
use anyhow::Result;
use async_trait::async_trait;
use libp2p::PeerId;
use std::sync::Arc;
use std::time::Duration;

/// Bootstrap behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Below this many connected peers the periodic round redials entry peers.
    pub min_peer_threshold: usize,
    /// Interval between periodic rounds.
    pub period: Duration,
    /// Per-peer dial timeout.
    pub connection_timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            min_peer_threshold: 4,
            period: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything a node constructor needs.
#[derive(Clone)]
pub struct BuildConfig {
    pub repo: Arc<dyn Repository>,
    pub host: HostOption,
    pub routing: RoutingOption,
    pub features: NodeFeatures,
}

/// A running node.
#[async_trait]
pub trait CoreNode: Send + Sync {
    fn peer_id(&self) -> PeerId;

    fn peer_host(&self) -> Arc<dyn Host>;

    fn routing(&self) -> Arc<dyn Routing>;

    fn features(&self) -> NodeFeatures;

    /// Connect to the configured entry peers and keep the peer count up.
    async fn bootstrap(&self, config: BootstrapConfig) -> Result<()>;

    /// Stop background work and close the host.
    async fn close(&self) -> Result<()>;
}

/// Builds a node from a repository and composed constructors.
#[async_trait]
pub trait NodeConstructor: Send + Sync {
    async fn construct(&self, config: BuildConfig) -> Result<Arc<dyn CoreNode>, NodeError>;
}
