//! Host port - the network transport and identity object of a node.

use crate::error::NodeError;
use crate::port::platform::{DnsResolver, ProximityDriver};
use anyhow::Result;
use async_trait::async_trait;
use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Abstract interface for a network host.
///
/// This trait provides methods for:
/// - Identity and peer store access
/// - Dialing peers and listing live connections
/// - Shutting the host down
#[async_trait]
pub trait Host: Send + Sync {
    /// The local peer ID.
    fn id(&self) -> PeerId;

    /// Key and address book shared with the node.
    fn peerstore(&self) -> Arc<Peerstore>;

    /// Addresses the host is currently listening on.
    async fn listen_addrs(&self) -> Result<Vec<Multiaddr>>;

    /// Connect to a peer, resolving once the connection is established.
    async fn connect(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<()>;

    /// Peers with at least one open connection.
    async fn connected_peers(&self) -> Result<Vec<PeerId>>;

    /// Stop the host. Must not block.
    fn close(&self) -> Result<()>;

    /// Access to the concrete type, for collaborators built on the same stack.
    fn as_any(&self) -> &dyn Any;
}

/// Base host constructor: `(identity, peer store, options) -> host`.
pub type HostOption = Arc<
    dyn Fn(PeerId, Arc<Peerstore>, Vec<HostSetting>) -> Result<Arc<dyn Host>, NodeError>
        + Send
        + Sync,
>;

/// Private keys and known addresses, keyed by peer.
#[derive(Default)]
pub struct Peerstore {
    keys: RwLock<HashMap<PeerId, Keypair>>,
    addrs: RwLock<HashMap<PeerId, Vec<Multiaddr>>>,
}

impl Peerstore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&self, peer: PeerId, keypair: Keypair) {
        self.keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer, keypair);
    }

    pub fn private_key(&self, peer: &PeerId) -> Option<Keypair> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .cloned()
    }

    pub fn add_addrs(&self, peer: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) {
        let mut book = self.addrs.write().unwrap_or_else(|e| e.into_inner());
        let known = book.entry(peer).or_default();
        for addr in addrs {
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
    }

    pub fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.addrs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }
}

/// NAT reachability classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// Probe and decide at runtime.
    Unknown,
    /// Always behave as unreachable; no NAT probing, never a DHT server.
    Private,
}

/// A single host construction option.
#[derive(Clone)]
pub enum HostSetting {
    Identity(Keypair),
    ListenAddrs(Vec<Multiaddr>),
    NoListenAddrs,
    EnableRelay,
    DisableRelay,
    ForceReachabilityPrivate,
    EnableQuic,
    Pubsub(bool),
    ProximityTransport(Arc<dyn ProximityDriver>),
    Dns(DnsResolver),
}

impl fmt::Debug for HostSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostSetting::Identity(key) => {
                write!(f, "Identity({})", key.public().to_peer_id())
            }
            HostSetting::ListenAddrs(addrs) => f.debug_tuple("ListenAddrs").field(addrs).finish(),
            HostSetting::NoListenAddrs => f.write_str("NoListenAddrs"),
            HostSetting::EnableRelay => f.write_str("EnableRelay"),
            HostSetting::DisableRelay => f.write_str("DisableRelay"),
            HostSetting::ForceReachabilityPrivate => f.write_str("ForceReachabilityPrivate"),
            HostSetting::EnableQuic => f.write_str("EnableQuic"),
            HostSetting::Pubsub(on) => f.debug_tuple("Pubsub").field(on).finish(),
            HostSetting::ProximityTransport(driver) => {
                write!(f, "ProximityTransport({})", driver.protocol_name())
            }
            HostSetting::Dns(_) => f.write_str("Dns"),
        }
    }
}

/// Settings resolved from an ordered option list.
///
/// Later options override earlier ones, except `NoListenAddrs`, which stays
/// in force once seen.
#[derive(Clone)]
pub struct HostSettings {
    pub identity: Option<Keypair>,
    pub listen_addrs: Vec<Multiaddr>,
    pub relay: bool,
    pub reachability: Reachability,
    pub quic: bool,
    pub pubsub: bool,
    pub proximity: Option<Arc<dyn ProximityDriver>>,
    /// `None` uses the system resolver.
    pub dns: Option<DnsResolver>,
}

impl HostSettings {
    pub fn resolve(settings: &[HostSetting]) -> Self {
        let mut resolved = HostSettings {
            identity: None,
            listen_addrs: Vec::new(),
            relay: false,
            reachability: Reachability::Unknown,
            quic: false,
            pubsub: false,
            proximity: None,
            dns: None,
        };
        let mut listen_disabled = false;

        for setting in settings {
            match setting {
                HostSetting::Identity(key) => resolved.identity = Some(key.clone()),
                HostSetting::ListenAddrs(addrs) if !listen_disabled => {
                    resolved.listen_addrs = addrs.clone()
                }
                HostSetting::ListenAddrs(_) => {}
                HostSetting::NoListenAddrs => {
                    listen_disabled = true;
                    resolved.listen_addrs.clear();
                }
                HostSetting::EnableRelay => resolved.relay = true,
                HostSetting::DisableRelay => resolved.relay = false,
                HostSetting::ForceReachabilityPrivate => {
                    resolved.reachability = Reachability::Private
                }
                HostSetting::EnableQuic => resolved.quic = true,
                HostSetting::Pubsub(on) => resolved.pubsub = *on,
                HostSetting::ProximityTransport(driver) => {
                    resolved.proximity = Some(driver.clone())
                }
                HostSetting::Dns(resolver) => resolved.dns = Some(resolver.clone()),
            }
        }
        resolved
    }
}
