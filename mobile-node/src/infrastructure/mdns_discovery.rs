//! mDNS-based LAN discovery using mdns-sd.
//!
//! Each node registers `_p2p._udp.local.` with its peer ID and TCP port when
//! it listens, and browses for other nodes. Resolved peers are reported to
//! the [`PeerFoundHandler`] with one `/ip*/<addr>/tcp/<port>` per address.

use crate::port::host::Host;
use crate::port::platform::{DiscoveryService, DiscoveryServiceFactory, PeerFoundHandler};
use anyhow::{Context, Result};
use async_trait::async_trait;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SERVICE_TYPE: &str = "_p2p._udp.local.";
const PROP_PEER_ID: &str = "peer_id";
const BROWSE_POLL: Duration = Duration::from_millis(250);

/// Builds [`MdnsDiscovery`] services.
#[derive(Debug, Default, Clone, Copy)]
pub struct MdnsDiscoveryFactory;

impl DiscoveryServiceFactory for MdnsDiscoveryFactory {
    fn create(
        &self,
        host: Arc<dyn Host>,
        handler: Arc<dyn PeerFoundHandler>,
    ) -> Result<Box<dyn DiscoveryService>> {
        let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
        Ok(Box::new(MdnsDiscovery {
            host,
            handler,
            daemon,
            registered: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MdnsDiscovery {
    host: Arc<dyn Host>,
    handler: Arc<dyn PeerFoundHandler>,
    daemon: ServiceDaemon,
    /// Full name of the registered service, if any.
    registered: Mutex<Option<String>>,
    stop: Arc<AtomicBool>,
    closed: AtomicBool,
}

fn tcp_port(addr: &Multiaddr) -> Option<u16> {
    addr.iter().find_map(|p| match p {
        Protocol::Tcp(port) if port != 0 => Some(port),
        _ => None,
    })
}

/// Turn a resolved service into a peer and its dialable addresses.
fn resolve_peer(info: &ServiceInfo, own: &PeerId) -> Option<(PeerId, Vec<Multiaddr>)> {
    let peer: PeerId = info
        .get_properties()
        .get(PROP_PEER_ID)
        .map(|v| v.val_str().to_string())
        .and_then(|id| id.parse().ok())?;
    if &peer == own {
        return None;
    }

    let port = info.get_port();
    let addrs: Vec<Multiaddr> = info
        .get_addresses()
        .iter()
        .filter_map(|addr| addr.to_string().parse::<IpAddr>().ok())
        .map(|ip| {
            Multiaddr::empty()
                .with(Protocol::from(ip))
                .with(Protocol::Tcp(port))
        })
        .collect();
    if addrs.is_empty() {
        return None;
    }
    Some((peer, addrs))
}

impl MdnsDiscovery {
    fn register(&self, peer: PeerId, port: u16) -> Result<()> {
        let instance_name = peer.to_string();
        let host_name = format!("{}.local.", instance_name);
        let properties = [(PROP_PEER_ID.to_string(), peer.to_string())];

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &host_name,
            "",
            port,
            &properties[..],
        )
        .context("Failed to create mDNS service info")?
        .enable_addr_auto();
        let fullname = service.get_fullname().to_string();

        self.daemon
            .register(service)
            .context("Failed to register mDNS service")?;
        *self.registered.lock().unwrap_or_else(|e| e.into_inner()) = Some(fullname);
        info!("mDNS: registered {} on port {}", peer, port);
        Ok(())
    }

    fn browse(&self, own: PeerId) -> Result<()> {
        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .context("Failed to start mDNS browse")?;
        let handler = self.handler.clone();
        let stop = self.stop.clone();

        std::thread::Builder::new()
            .name("mdns-browse".to_string())
            .spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match receiver.recv_timeout(BROWSE_POLL) {
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            if let Some((peer, addrs)) = resolve_peer(&info, &own) {
                                debug!("mDNS: found peer {} at {:?}", peer, addrs);
                                handler.handle_peer_found(peer, addrs);
                            }
                        }
                        Ok(ServiceEvent::SearchStopped(_)) => break,
                        Ok(_) => {}
                        Err(_) if receiver.is_disconnected() => break,
                        Err(_) => {}
                    }
                }
                debug!("mDNS browse stopped");
            })
            .context("Failed to spawn mDNS browse thread")?;
        Ok(())
    }
}

#[async_trait]
impl DiscoveryService for MdnsDiscovery {
    async fn start(&self) -> Result<()> {
        let peer = self.host.id();
        let port = self
            .host
            .listen_addrs()
            .await?
            .iter()
            .find_map(tcp_port);

        match port {
            Some(port) => self.register(peer, port)?,
            None => info!("mDNS: host is not listening, browsing only"),
        }
        self.browse(peer)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop.store(true, Ordering::SeqCst);

        if let Some(fullname) = self
            .registered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            if let Err(e) = self.daemon.unregister(&fullname) {
                warn!("mDNS: failed to unregister: {}", e);
            }
        }
        self.daemon
            .shutdown()
            .context("Failed to shut down mDNS daemon")?;
        Ok(())
    }
}
