//! Port layer - Abstract interfaces for infrastructure dependencies
//!
//! This module defines traits that abstract away infrastructure concerns,
//! allowing the application layer to remain independent of specific implementations.

pub mod host;
pub mod http;
pub mod node;
pub mod platform;
pub mod repository;
pub mod routing;

pub use host::{Host, HostOption, HostSetting, HostSettings, Peerstore, Reachability};
pub use http::{HttpServer, ServeListener, ServeOption, ServeSocket};
pub use node::{BootstrapConfig, BuildConfig, CoreNode, NodeConstructor};
pub use platform::{
    DiscoveryLocker, DiscoveryService, DiscoveryServiceFactory, DnsResolver, NetDriver,
    NetInterface, PeerFoundHandler, ProximityDriver, ProximityEvents,
};
pub use repository::{Datastore, Repository};
pub use routing::{DhtMode, Routing, RoutingOption, RoutingParams};
