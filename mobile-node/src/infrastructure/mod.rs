//! Infrastructure adapters for the ports.
//!
//! This module provides:
//! - A libp2p swarm host (TCP/QUIC, Noise, Yamux, relay client, gossipsub)
//! - Kademlia routing with peer persistence
//! - The filesystem repository and plugin manifests
//! - mDNS discovery and interface enumeration
//! - A libp2p transport over platform proximity radios
//! - HTTP listeners and the axum API/gateway

pub mod behaviour;
pub mod fs_repo;
pub mod http_api;
pub mod kad_routing;
pub mod libp2p_host;
pub mod libp2p_node;
pub mod listener;
pub mod mdns_discovery;
pub mod netif;
pub mod plugin_loader;
pub mod proximity;
pub mod transport;

pub use fs_repo::{FsRepo, SledDatastore};
pub use http_api::AxumHttpServer;
pub use kad_routing::{kad_routing_option, KadRouting};
pub use libp2p_host::{default_host_option, HostEvent, Libp2pHost};
pub use libp2p_node::{Libp2pCoreNode, Libp2pNodeConstructor};
pub use mdns_discovery::MdnsDiscoveryFactory;
pub use netif::{system_net_driver, SystemNetDriver};
pub use plugin_loader::{FsPluginLoader, PluginManifest};
pub use proximity::{proximity_peer_addr, ProximityTransport};
pub use transport::DnsSource;
