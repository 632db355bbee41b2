//! Kademlia routing on top of [`Libp2pHost`], with the routing table
//! persisted in the repository datastore.

use super::libp2p_host::{HostEvent, Libp2pHost};
use crate::error::NodeError;
use crate::port::host::Host;
use crate::port::repository::Datastore;
use crate::port::routing::{DhtMode, Routing, RoutingOption, RoutingParams};
use anyhow::Result;
use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Datastore prefix for known DHT peers. Values are JSON arrays of multiaddrs.
pub const PEER_KEY_PREFIX: &str = "/routing/peers/";

pub struct KadRouting {
    host: Arc<dyn Host>,
    mode: Mutex<DhtMode>,
}

impl KadRouting {
    /// Attach routing to `host`, seed it from the bootstrap list and the
    /// datastore, and persist newly identified peers from then on.
    pub fn new(host: Arc<dyn Host>, params: RoutingParams) -> Result<Self, NodeError> {
        let libp2p = host
            .as_any()
            .downcast_ref::<Libp2pHost>()
            .ok_or_else(|| NodeError::Routing(anyhow::anyhow!("routing requires a libp2p host")))?;

        libp2p.set_dht_mode(params.mode).map_err(NodeError::Routing)?;

        for (peer, addr) in &params.bootstrap_peers {
            libp2p
                .add_dht_address(*peer, addr.clone())
                .map_err(NodeError::Routing)?;
        }

        let restored = restore_peers(libp2p, params.datastore.as_ref()).map_err(NodeError::Routing)?;
        if restored > 0 {
            info!("Restored {} routing peers from datastore", restored);
        }

        spawn_persistence(libp2p, params.datastore.clone());

        Ok(Self {
            host: host.clone(),
            mode: Mutex::new(params.mode),
        })
    }

    fn libp2p(&self) -> Result<&Libp2pHost> {
        self.host
            .as_any()
            .downcast_ref::<Libp2pHost>()
            .ok_or_else(|| anyhow::anyhow!("routing requires a libp2p host"))
    }
}

fn peer_key(peer: &PeerId) -> String {
    format!("{}{}", PEER_KEY_PREFIX, peer)
}

fn restore_peers(host: &Libp2pHost, datastore: &dyn Datastore) -> Result<usize> {
    let mut restored = 0;
    for (key, value) in datastore.scan_prefix(PEER_KEY_PREFIX)? {
        let Some(peer) = key
            .strip_prefix(PEER_KEY_PREFIX)
            .and_then(|id| id.parse::<PeerId>().ok())
        else {
            debug!("Skipping malformed routing key {}", key);
            continue;
        };
        let addrs: Vec<String> = match serde_json::from_slice(&value) {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("Skipping malformed routing entry for {}: {}", peer, e);
                continue;
            }
        };
        for addr in addrs.iter().filter_map(|a| a.parse::<Multiaddr>().ok()) {
            host.add_dht_address(peer, addr)?;
        }
        restored += 1;
    }
    Ok(restored)
}

fn spawn_persistence(host: &Libp2pHost, datastore: Arc<dyn Datastore>) {
    let mut events = host.subscribe_events();
    let shutdown = host.shutdown_token();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(HostEvent::PeerIdentified { peer, addrs }) if !addrs.is_empty() => {
                    let addrs: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
                    let stored = serde_json::to_vec(&addrs)
                        .map_err(anyhow::Error::from)
                        .and_then(|value| datastore.put(&peer_key(&peer), &value));
                    if let Err(e) = stored {
                        warn!("Failed to persist routing entry for {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Routing persistence skipped {} host events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[async_trait]
impl Routing for KadRouting {
    fn mode(&self) -> DhtMode {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_mode(&self, mode: DhtMode) -> Result<()> {
        self.libp2p()?.set_dht_mode(mode)?;
        *self.mode.lock().unwrap_or_else(|e| e.into_inner()) = mode;
        debug!("DHT mode set to {:?}", mode);
        Ok(())
    }

    fn add_peer(&self, peer: PeerId, addr: Multiaddr) -> Result<()> {
        self.libp2p()?.add_dht_address(peer, addr)
    }

    async fn bootstrap(&self) -> Result<()> {
        self.libp2p()?.dht_bootstrap().await
    }

    async fn routing_table_size(&self) -> Result<usize> {
        self.libp2p()?.routing_table_size().await
    }
}

/// Routing constructor backed by [`KadRouting`].
pub fn kad_routing_option() -> RoutingOption {
    Arc::new(|host: Arc<dyn Host>, params: RoutingParams| {
        Ok(Arc::new(KadRouting::new(host, params)?) as Arc<dyn Routing>)
    })
}
