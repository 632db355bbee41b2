//! Node lifecycle: construct, bootstrap, serve, close.
//!
//! [`Node::new`] picks a feature set for the network environment, wraps the
//! node constructor with the host and routing hooks, starts local discovery
//! under the platform's exclusivity lock, and bootstraps. The `serve_*`
//! methods open listeners, register them, and hand them to the HTTP server on
//! detached tasks.

use crate::application_service::config_patch::{set_mdns_enabled, RepoMobile};
use crate::application_service::environment::{is_network_limited, multicast_interfaces};
use crate::application_service::host_option::{simple_host_option, HostConfig};
use crate::application_service::listeners::ListenerRegistry;
use crate::application_service::mobile::{
    core_http_options, gateway_options, new_node, MobileConfig, MobileNode,
};
use crate::application_service::routing_option::RoutingConfig;
use crate::domain::{LifecyclePhase, NodeFeatures, Platform};
use crate::error::NodeError;
use crate::infrastructure::http_api::AxumHttpServer;
use crate::infrastructure::kad_routing::kad_routing_option;
use crate::infrastructure::libp2p_host::default_host_option;
use crate::infrastructure::libp2p_node::Libp2pNodeConstructor;
use crate::infrastructure::listener;
use crate::infrastructure::mdns_discovery::MdnsDiscoveryFactory;
use crate::infrastructure::netif::system_net_driver;
use crate::port::host::{Host, HostOption, HostSetting};
use crate::port::http::{HttpServer, ServeOption};
use crate::port::node::{BootstrapConfig, NodeConstructor};
use crate::port::platform::{
    DiscoveryLocker, DiscoveryService, DiscoveryServiceFactory, DnsResolver, NetDriver,
    PeerFoundHandler, ProximityDriver,
};
use crate::port::routing::RoutingOption;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Collaborators and platform capabilities for [`Node::new`].
#[derive(Clone)]
pub struct NodeConfig {
    /// Radio transport driver, if the platform has one.
    pub proximity_driver: Option<Arc<dyn ProximityDriver>>,
    /// Interface enumeration. Defaults to the OS driver.
    pub net_driver: Option<Arc<dyn NetDriver>>,
    /// Exclusive access to multicast discovery.
    pub discovery_locker: Option<Arc<dyn DiscoveryLocker>>,
    /// Platform DNS servers. Defaults to the system configuration.
    pub dns_resolver: Option<DnsResolver>,
    pub platform: Platform,
    pub constructor: Arc<dyn NodeConstructor>,
    /// Host constructor for constrained networks.
    pub minimal_host: HostOption,
    /// Host constructor otherwise.
    pub default_host: HostOption,
    pub routing: RoutingOption,
    pub routing_config: Option<RoutingConfig>,
    pub discovery: Arc<dyn DiscoveryServiceFactory>,
    pub http: Arc<dyn HttpServer>,
    pub bootstrap: BootstrapConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            proximity_driver: None,
            net_driver: None,
            discovery_locker: None,
            dns_resolver: None,
            platform: Platform::current(),
            constructor: Arc::new(Libp2pNodeConstructor::default()),
            minimal_host: simple_host_option(),
            default_host: default_host_option(),
            routing: kad_routing_option(),
            routing_config: None,
            discovery: Arc::new(MdnsDiscoveryFactory),
            http: Arc::new(AxumHttpServer::default()),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

/// Exclusive hold on multicast discovery, released when dropped.
pub struct DiscoveryLease {
    locker: Arc<dyn DiscoveryLocker>,
}

impl DiscoveryLease {
    pub fn acquire(locker: Arc<dyn DiscoveryLocker>) -> Self {
        locker.lock();
        debug!("Discovery lock acquired");
        Self { locker }
    }
}

impl Drop for DiscoveryLease {
    fn drop(&mut self) {
        self.locker.unlock();
        debug!("Discovery lock released");
    }
}

struct DiscoveryHold {
    service: Option<Box<dyn DiscoveryService>>,
    lease: DiscoveryLease,
}

/// Dials every peer reported by local discovery.
struct ConnectOnFound {
    host: Arc<dyn Host>,
    runtime: tokio::runtime::Handle,
}

impl PeerFoundHandler for ConnectOnFound {
    fn handle_peer_found(&self, peer: PeerId, addrs: Vec<Multiaddr>) {
        if peer == self.host.id() {
            return;
        }
        let host = self.host.clone();
        self.runtime.spawn(async move {
            match host.connect(peer, addrs).await {
                Ok(()) => info!("Connected to locally discovered peer {}", peer),
                Err(e) => debug!("Failed to connect to discovered peer {}: {}", peer, e),
            }
        });
    }
}

/// A running node and the resources opened on its behalf.
pub struct Node {
    mobile: MobileNode,
    listeners: ListenerRegistry,
    discovery: Option<DiscoveryHold>,
    http: Arc<dyn HttpServer>,
    features: NodeFeatures,
    constrained: bool,
}

fn enter(phase: LifecyclePhase) {
    debug!("Node lifecycle: {}", phase);
}

impl Node {
    /// Construct, start discovery and bootstrap a node on `repo`.
    ///
    /// Callers must not hold two nodes on the same repository.
    pub async fn new(repo: Arc<RepoMobile>, config: NodeConfig) -> Result<Self, NodeError> {
        enter(LifecyclePhase::Unstarted);
        let net_driver = config.net_driver.clone().unwrap_or_else(system_net_driver);

        let constrained = is_network_limited(net_driver.as_ref(), config.platform);
        if constrained {
            info!("Constrained network detected, using reduced feature set");
        }

        let proximity = match &config.proximity_driver {
            Some(driver) => {
                info!("Proximity transport {} available", driver.protocol_name());
                Some(HostSetting::ProximityTransport(driver.clone()))
            }
            None => {
                info!("No proximity driver, proximity transport disabled");
                None
            }
        };

        let mut options: Vec<HostSetting> = proximity.into_iter().collect();
        if let Some(resolver) = &config.dns_resolver {
            debug!("Using platform DNS resolver");
            options.push(HostSetting::Dns(resolver.clone()));
        }
        options.push(HostSetting::DisableRelay);
        options.push(HostSetting::ForceReachabilityPrivate);
        let host_config = HostConfig {
            config_fn: None,
            options,
        };

        let (host_option, features) = if constrained {
            (config.minimal_host.clone(), NodeFeatures::constrained())
        } else {
            (config.default_host.clone(), NodeFeatures::full())
        };

        let lease = match &config.discovery_locker {
            Some(locker) if repo.config()?.mdns_enabled() => {
                let lease = DiscoveryLease::acquire(locker.clone());
                repo.apply_patches([Some(set_mdns_enabled(false))])?;
                Some(lease)
            }
            _ => None,
        };

        enter(LifecyclePhase::Constructing);
        let built = new_node(MobileConfig {
            repo: Some(repo.clone()),
            features,
            host_config: Some(host_config),
            routing_config: config.routing_config.clone(),
            host_option: Some(host_option),
            routing_option: Some(config.routing.clone()),
            constructor: Some(config.constructor.clone()),
        })
        .await;

        let mobile = match built {
            Ok(mobile) => mobile,
            Err(e) => {
                if lease.is_some() {
                    if let Err(restore) = repo.apply_patches([Some(set_mdns_enabled(true))]) {
                        warn!("Failed to restore discovery setting: {}", restore);
                    }
                }
                drop(lease);
                enter(LifecyclePhase::Closed);
                return Err(e);
            }
        };

        let discovery = match lease {
            Some(lease) => {
                match Self::start_discovery(&repo, &mobile, &config, net_driver.as_ref()).await {
                    Ok(service) => Some(DiscoveryHold { service, lease }),
                    Err(e) => {
                        if let Err(close_err) = mobile.close().await {
                            warn!("Failed to close node after discovery error: {}", close_err);
                        }
                        drop(lease);
                        enter(LifecyclePhase::Closed);
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        enter(LifecyclePhase::Bootstrapping);
        if let Err(e) = mobile.node().bootstrap(config.bootstrap).await {
            warn!("Bootstrap failed, node stays usable for local operations: {}", e);
        }

        enter(LifecyclePhase::Serving);
        Ok(Self {
            mobile,
            listeners: ListenerRegistry::new(),
            discovery,
            http: config.http.clone(),
            features,
            constrained,
        })
    }

    /// Re-enable discovery in the config and start the service when a
    /// multicast interface exists. `None` means discovery stays off.
    async fn start_discovery(
        repo: &RepoMobile,
        mobile: &MobileNode,
        config: &NodeConfig,
        net_driver: &dyn NetDriver,
    ) -> Result<Option<Box<dyn DiscoveryService>>, NodeError> {
        repo.apply_patches([Some(set_mdns_enabled(true))])?;

        let interfaces = multicast_interfaces(net_driver).map_err(|e| {
            NodeError::Discovery(e.context("unable to list multicast interfaces"))
        })?;
        if interfaces.is_empty() {
            error!("No multicast interface found, local discovery not started");
            return Ok(None);
        }
        debug!(
            "Multicast interfaces: {}",
            interfaces
                .iter()
                .map(|i| i.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let host = mobile.peer_host();
        let handler = Arc::new(ConnectOnFound {
            host: host.clone(),
            runtime: tokio::runtime::Handle::current(),
        });
        let service = config
            .discovery
            .create(host, handler)
            .map_err(NodeError::Discovery)?;

        if let Err(e) = service.start().await {
            if let Err(close_err) = service.close() {
                warn!("Failed to close discovery service: {}", close_err);
            }
            return Err(NodeError::Discovery(e));
        }
        info!("Local discovery started");
        Ok(Some(service))
    }

    pub fn peer_id(&self) -> PeerId {
        self.mobile.node().peer_id()
    }

    pub fn mobile(&self) -> &MobileNode {
        &self.mobile
    }

    pub fn features(&self) -> NodeFeatures {
        self.features
    }

    pub fn is_constrained(&self) -> bool {
        self.constrained
    }

    /// Whether the local discovery service is running.
    pub fn discovery_started(&self) -> bool {
        self.discovery
            .as_ref()
            .is_some_and(|hold| hold.service.is_some())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Serve the HTTP API on `addr`. Returns the bound address.
    pub async fn serve_api_multiaddr(&self, addr: &str) -> Result<Multiaddr, NodeError> {
        self.serve(parse_multiaddr(addr)?, core_http_options(false))
            .await
    }

    /// Serve the gateway on `addr`. Returns the bound address.
    pub async fn serve_gateway_multiaddr(
        &self,
        addr: &str,
        writable: bool,
    ) -> Result<Multiaddr, NodeError> {
        self.serve(parse_multiaddr(addr)?, gateway_options(writable))
            .await
    }

    pub async fn serve_unix_socket_api(&self, path: &Path) -> Result<Multiaddr, NodeError> {
        self.serve(unix_multiaddr(path), core_http_options(false))
            .await
    }

    /// Serve the API on `127.0.0.1:port`; port 0 picks a free port.
    pub async fn serve_tcp_api(&self, port: u16) -> Result<Multiaddr, NodeError> {
        self.serve(loopback_multiaddr(port), core_http_options(false))
            .await
    }

    pub async fn serve_unix_socket_gateway(
        &self,
        path: &Path,
        writable: bool,
    ) -> Result<Multiaddr, NodeError> {
        self.serve(unix_multiaddr(path), gateway_options(writable))
            .await
    }

    /// Serve the gateway on `127.0.0.1:port`; port 0 picks a free port.
    pub async fn serve_tcp_gateway(&self, port: u16, writable: bool) -> Result<Multiaddr, NodeError> {
        self.serve(loopback_multiaddr(port), gateway_options(writable))
            .await
    }

    /// Serve every configured API address, then every gateway address
    /// (read-only). Stops at the first failure; listeners already opened
    /// stay registered.
    pub async fn serve_config(&self) -> Result<(), NodeError> {
        let config = self.mobile.repo().config()?;

        for addr in config.addresses.api.iter() {
            self.serve_api_multiaddr(addr)
                .await
                .map_err(|e| NodeError::Serve {
                    addr: addr.clone(),
                    source: Box::new(e),
                })?;
        }
        for addr in config.addresses.gateway.iter() {
            self.serve_gateway_multiaddr(addr, false)
                .await
                .map_err(|e| NodeError::Serve {
                    addr: addr.clone(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    async fn serve(
        &self,
        addr: Multiaddr,
        options: Vec<ServeOption>,
    ) -> Result<Multiaddr, NodeError> {
        let (serve_listener, managed) = listener::bind(&addr).await?;
        let bound = serve_listener.addr.clone();
        self.listeners.register(Box::new(managed));

        let http = self.http.clone();
        let node = self.mobile.node().clone();
        let serving = bound.clone();
        tokio::spawn(async move {
            match http.serve(node, serve_listener, options).await {
                Ok(()) => debug!("Stopped serving {}", serving),
                Err(e) => error!("Serving {} failed: {}", serving, e),
            }
        });

        info!("Serving HTTP on {}", bound);
        Ok(bound)
    }

    /// Close listeners, stop discovery, release the discovery lock and
    /// close the node.
    pub async fn close(self) -> Result<(), NodeError> {
        enter(LifecyclePhase::Closing);
        let Node {
            mobile,
            listeners,
            discovery,
            ..
        } = self;

        listeners.close_all();

        if let Some(DiscoveryHold { service, lease }) = discovery {
            if let Some(service) = service {
                if let Err(e) = service.close() {
                    warn!("Failed to close discovery service: {}", e);
                }
            }
            drop(lease);
        }

        let result = mobile.close().await.map_err(NodeError::Close);
        enter(LifecyclePhase::Closed);
        result
    }
}

fn parse_multiaddr(addr: &str) -> Result<Multiaddr, NodeError> {
    addr.parse().map_err(|e: libp2p::multiaddr::Error| NodeError::Multiaddr {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

fn unix_multiaddr(path: &Path) -> Multiaddr {
    Multiaddr::empty().with(Protocol::Unix(path.to_string_lossy()))
}

fn loopback_multiaddr(port: u16) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::Ip4(std::net::Ipv4Addr::LOCALHOST))
        .with(Protocol::Tcp(port))
}
