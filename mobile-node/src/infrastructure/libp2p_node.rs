//! Node constructor wiring a host and routing from the repository config.

use super::libp2p_host::Libp2pHost;
use crate::domain::NodeFeatures;
use crate::error::NodeError;
use crate::port::host::{Host, HostSetting, Peerstore};
use crate::port::node::{BootstrapConfig, BuildConfig, CoreNode, NodeConstructor};
use crate::port::routing::{DhtMode, Routing, RoutingParams};
use anyhow::Result;
use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pubsub topic carrying name record updates.
pub const IPNS_PUBSUB_TOPIC: &str = "/ipns/pubsub";

/// Split `/.../p2p/<id>` entry addresses into peer and dialable address.
/// Entries without a peer ID or that fail to parse are skipped.
pub fn parse_bootstrap_peers(addrs: &[String]) -> Vec<(PeerId, Multiaddr)> {
    let mut peers = Vec::new();
    for addr_str in addrs {
        let Ok(addr) = addr_str.parse::<Multiaddr>() else {
            warn!("Failed to parse bootstrap address: {}", addr_str);
            continue;
        };
        if let Some(Protocol::P2p(peer_id)) = addr.iter().last() {
            let addr_without_p2p: Multiaddr = addr
                .iter()
                .filter(|p| !matches!(p, Protocol::P2p(_)))
                .collect();
            peers.push((peer_id, addr_without_p2p));
        } else {
            warn!("Bootstrap address missing peer ID: {}", addr_str);
        }
    }
    peers
}

fn dht_mode(features: NodeFeatures) -> DhtMode {
    if features.dht && !features.dht_client {
        DhtMode::Auto
    } else {
        DhtMode::Client
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Libp2pNodeConstructor;

#[async_trait]
impl NodeConstructor for Libp2pNodeConstructor {
    async fn construct(&self, config: BuildConfig) -> Result<Arc<dyn CoreNode>, NodeError> {
        let repo_config = config.repo.config().map_err(NodeError::Repo)?;
        let peer_id = repo_config
            .identity
            .peer_id()
            .map_err(|e| NodeError::InvalidConfig(format!("{:#}", e)))?;
        let keypair = repo_config
            .identity
            .keypair()
            .map_err(|e| NodeError::InvalidConfig(format!("{:#}", e)))?
            .ok_or(NodeError::MissingIdentityKey(peer_id))?;

        let peerstore = Arc::new(Peerstore::new());
        peerstore.add_key(peer_id, keypair);

        let listen_addrs: Vec<Multiaddr> = repo_config
            .addresses
            .swarm
            .iter()
            .filter_map(|addr| match addr.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!("Ignoring invalid swarm address {}: {}", addr, e);
                    None
                }
            })
            .collect();

        let host = (config.host)(
            peer_id,
            peerstore,
            vec![
                HostSetting::ListenAddrs(listen_addrs),
                HostSetting::Pubsub(config.features.pubsub),
            ],
        )?;

        let bootstrap_peers = parse_bootstrap_peers(&repo_config.bootstrap);
        let params = RoutingParams {
            datastore: config.repo.datastore(),
            bootstrap_peers: bootstrap_peers.clone(),
            mode: dht_mode(config.features),
        };
        let routing = match (config.routing)(host.clone(), params) {
            Ok(routing) => routing,
            Err(e) => {
                if let Err(close_err) = host.close() {
                    warn!("Failed to close host after routing error: {}", close_err);
                }
                return Err(e);
            }
        };

        if config.features.pubsub && config.features.ipns_pubsub {
            if let Some(libp2p) = host.as_any().downcast_ref::<Libp2pHost>() {
                if let Err(e) = libp2p.subscribe_topic(IPNS_PUBSUB_TOPIC).await {
                    warn!("Failed to join name record topic: {}", e);
                }
            }
        }

        Ok(Arc::new(Libp2pCoreNode {
            peer_id,
            host,
            routing,
            features: config.features,
            bootstrap_peers,
            bootstrapping: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }))
    }
}

pub struct Libp2pCoreNode {
    peer_id: PeerId,
    host: Arc<dyn Host>,
    routing: Arc<dyn Routing>,
    features: NodeFeatures,
    bootstrap_peers: Vec<(PeerId, Multiaddr)>,
    bootstrapping: AtomicBool,
    shutdown: CancellationToken,
}

/// Dial every entry peer concurrently; returns how many connected.
async fn connect_entry_peers(
    host: &Arc<dyn Host>,
    peers: &[(PeerId, Multiaddr)],
    timeout: Duration,
) -> usize {
    let dials = peers.iter().map(|(peer, addr)| {
        let host = host.clone();
        let (peer, addr) = (*peer, addr.clone());
        async move {
            match tokio::time::timeout(timeout, host.connect(peer, vec![addr])).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!("Bootstrap dial to {} failed: {}", peer, e);
                    false
                }
                Err(_) => {
                    debug!("Bootstrap dial to {} timed out", peer);
                    false
                }
            }
        }
    });
    futures::future::join_all(dials)
        .await
        .into_iter()
        .filter(|connected| *connected)
        .count()
}

impl Libp2pCoreNode {
    fn spawn_periodic_bootstrap(&self, config: BootstrapConfig) {
        if self.bootstrapping.swap(true, Ordering::SeqCst) {
            return;
        }
        let host = self.host.clone();
        let routing = self.routing.clone();
        let peers = self.bootstrap_peers.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let connected = host.connected_peers().await.map(|p| p.len()).unwrap_or(0);
                if connected >= config.min_peer_threshold {
                    continue;
                }
                debug!(
                    "{} connected peers, below threshold {}; redialing entry peers",
                    connected, config.min_peer_threshold
                );
                connect_entry_peers(&host, &peers, config.connection_timeout).await;
                if let Err(e) = routing.bootstrap().await {
                    debug!("Periodic routing refresh failed: {}", e);
                }
            }
        });
    }
}

#[async_trait]
impl CoreNode for Libp2pCoreNode {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn peer_host(&self) -> Arc<dyn Host> {
        self.host.clone()
    }

    fn routing(&self) -> Arc<dyn Routing> {
        self.routing.clone()
    }

    fn features(&self) -> NodeFeatures {
        self.features
    }

    /// Connect to the entry peers and refresh routing. The periodic round is
    /// started even when no entry peer answers, so the node recovers once
    /// the network comes back.
    async fn bootstrap(&self, config: BootstrapConfig) -> Result<()> {
        if self.bootstrap_peers.is_empty() {
            anyhow::bail!("no bootstrap peers configured");
        }
        self.spawn_periodic_bootstrap(config);

        let connected =
            connect_entry_peers(&self.host, &self.bootstrap_peers, config.connection_timeout)
                .await;
        if connected == 0 {
            anyhow::bail!(
                "unable to reach any of {} bootstrap peers",
                self.bootstrap_peers.len()
            );
        }
        info!("Connected to {} bootstrap peers", connected);

        if let Err(e) = self.routing.bootstrap().await {
            debug!("Routing refresh after bootstrap failed: {}", e);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        self.host.close()
    }
}
