//! Platform capabilities supplied by the embedding application.
//!
//! Each of these is optional; a missing capability is a valid state.

use crate::port::host::Host;
use anyhow::Result;
use async_trait::async_trait;
use libp2p::dns::{ResolverConfig, ResolverOpts};
use libp2p::{Multiaddr, PeerId};
use std::net::IpAddr;
use std::sync::Arc;

/// Short-range radio transport driver (for example Bluetooth LE).
///
/// The driver moves opaque byte chunks to and from peers in radio range.
/// Everything it hears is reported through the [`ProximityEvents`] handed to
/// [`ProximityDriver::start`].
pub trait ProximityDriver: Send + Sync {
    /// Human readable transport name, used in logs.
    fn protocol_name(&self) -> &str;

    /// Transport code; radio addresses are `/memory/<code>/p2p/<peer>`.
    fn protocol_code(&self) -> u32;

    /// Start advertising `local_peer` and scanning for others.
    fn start(&self, local_peer: &PeerId, events: Arc<dyn ProximityEvents>) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Open a radio link to `remote`. Returns false when it is out of range.
    fn dial_peer(&self, remote: &PeerId) -> bool;

    /// Queue `payload` on the link to `remote`. Returns false when the link is gone.
    fn send_to_peer(&self, remote: &PeerId, payload: &[u8]) -> bool;

    fn close_conn_with_peer(&self, remote: &PeerId);
}

/// Callbacks from a [`ProximityDriver`] into the host.
pub trait ProximityEvents: Send + Sync {
    /// A peer came into range. Returns whether the host accepted it.
    fn handle_found_peer(&self, remote: PeerId) -> bool;

    fn handle_lost_peer(&self, remote: PeerId);

    /// Bytes arrived on the link from `remote`.
    fn receive_from_peer(&self, remote: PeerId, payload: Vec<u8>);
}

/// Resolver used for `/dns*` addresses in place of the system configuration,
/// for platforms where it cannot be read or must be pinned.
#[derive(Debug, Clone)]
pub struct DnsResolver {
    pub config: ResolverConfig,
    pub opts: ResolverOpts,
}

impl DnsResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            opts: ResolverOpts::default(),
        }
    }
}

/// A local network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub index: u32,
    pub up: bool,
    pub multicast: bool,
    pub loopback: bool,
    pub addrs: Vec<IpAddr>,
}

/// Interface enumeration.
pub trait NetDriver: Send + Sync {
    fn interfaces(&self) -> Result<Vec<NetInterface>>;
}

/// Process or OS scoped exclusive access to multicast discovery.
pub trait DiscoveryLocker: Send + Sync {
    /// Block until exclusive access is granted.
    fn lock(&self);

    fn unlock(&self);
}

/// Called for every peer found by local discovery.
pub trait PeerFoundHandler: Send + Sync {
    fn handle_peer_found(&self, peer: PeerId, addrs: Vec<Multiaddr>);
}

/// A local discovery service bound to a host.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Announce the host and start browsing for peers.
    async fn start(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// Builds discovery services.
pub trait DiscoveryServiceFactory: Send + Sync {
    fn create(
        &self,
        host: Arc<dyn Host>,
        handler: Arc<dyn PeerFoundHandler>,
    ) -> Result<Box<dyn DiscoveryService>>;
}
