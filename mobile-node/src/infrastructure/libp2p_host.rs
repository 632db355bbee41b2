//! libp2p-backed host.
//!
//! The swarm runs on its own task and is driven through a command channel,
//! one oneshot reply per request. Identify results are fed to the DHT and
//! published on a broadcast channel for collaborators such as routing
//! persistence.

use super::behaviour::{BehaviourConfig, HostBehaviour, HostBehaviourEvent};
use super::proximity::{proximity_listen_addr, proximity_peer_addr, ProximityTransport};
use super::transport::{self, TransportOptions};
pub use super::transport::{DnsSource, TransportProfile};
use crate::error::NodeError;
use crate::port::host::{Host, HostOption, HostSetting, HostSettings, Peerstore, Reachability};
use crate::port::platform::ProximityDriver;
use crate::port::routing::DhtMode;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub::{self, IdentTopic},
    identify, kad, relay,
    swarm::{dial_opts::DialOpts, SwarmEvent},
    Multiaddr, PeerId, Swarm,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Events published by the host.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A peer completed identify and announced these listen addresses.
    PeerIdentified { peer: PeerId, addrs: Vec<Multiaddr> },
    ConnectionEstablished(PeerId),
    ConnectionClosed(PeerId),
}

/// Commands sent to the swarm event loop.
enum HostCommand {
    Dial {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<()>>,
    },
    GetListenAddrs {
        reply: oneshot::Sender<Vec<Multiaddr>>,
    },
    GetConnectedPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SetDhtMode {
        mode: Option<kad::Mode>,
    },
    AddDhtAddress {
        peer: PeerId,
        addr: Multiaddr,
    },
    DhtBootstrap {
        reply: oneshot::Sender<Result<()>>,
    },
    RoutingTableSize {
        reply: oneshot::Sender<usize>,
    },
}

/// Dials waiting for a connection outcome, keyed by peer.
#[derive(Default)]
struct PendingDials {
    dials: HashMap<PeerId, Vec<oneshot::Sender<Result<()>>>>,
}

impl PendingDials {
    fn push(&mut self, peer: PeerId, reply: oneshot::Sender<Result<()>>) {
        self.dials.entry(peer).or_default().push(reply);
    }

    fn resolve(&mut self, peer: &PeerId, outcome: impl Fn() -> Result<()>) {
        if let Some(replies) = self.dials.remove(peer) {
            for reply in replies {
                let _ = reply.send(outcome());
            }
        }
    }
}

/// Host backed by a libp2p swarm.
pub struct Libp2pHost {
    peer_id: PeerId,
    peerstore: Arc<Peerstore>,
    command_tx: mpsc::UnboundedSender<HostCommand>,
    event_tx: broadcast::Sender<HostEvent>,
    shutdown: CancellationToken,
    proximity: Option<Arc<dyn ProximityDriver>>,
    dns_source: DnsSource,
    relay: bool,
    reachability: Reachability,
    pubsub: bool,
}

impl Libp2pHost {
    /// Build the swarm from resolved settings and start its event loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        peerstore: Arc<Peerstore>,
        settings: HostSettings,
        profile: TransportProfile,
    ) -> Result<Self, NodeError> {
        let keypair = settings
            .identity
            .clone()
            .ok_or_else(|| NodeError::Host(anyhow::anyhow!("no identity configured")))?;
        let peer_id = PeerId::from(keypair.public());

        let (relay_transport, relay_behaviour) = if settings.relay {
            let (transport, behaviour) = relay::client::new(peer_id);
            (Some(transport), Some(behaviour))
        } else {
            (None, None)
        };

        let mut proximity = None;
        let mut options = TransportOptions {
            quic: settings.quic,
            relay: relay_transport,
            proximity: None,
            dns: settings.dns.clone(),
        };
        if let Some(driver) = &settings.proximity {
            let (transport, inbound, found) = ProximityTransport::new(driver.clone());
            options.proximity = Some(transport);
            proximity = Some((driver.clone(), inbound, found));
        }

        let (transport, dns_source) =
            transport::build_transport(&keypair, profile, options).map_err(NodeError::Host)?;

        let behaviour = HostBehaviour::new(
            &keypair,
            relay_behaviour,
            BehaviourConfig {
                pubsub: settings.pubsub,
                dht_client: settings.reachability == Reachability::Private,
            },
        )
        .map_err(NodeError::Host)?;

        let swarm_config = libp2p::swarm::Config::with_tokio_executor()
            .with_idle_connection_timeout(Duration::from_secs(60));
        let mut swarm = Swarm::new(transport, behaviour, peer_id, swarm_config);

        for addr in &settings.listen_addrs {
            match swarm.listen_on(addr.clone()) {
                Ok(_) => debug!("Listen requested on {}", addr),
                Err(e) => warn!("Failed to listen on {}: {}", addr, e),
            }
        }

        let mut found_peers = None;
        if let Some((driver, inbound, found)) = proximity {
            let code = driver.protocol_code();
            if let Err(e) = swarm.listen_on(proximity_listen_addr(code)) {
                warn!("Failed to listen on {} transport: {}", driver.protocol_name(), e);
            }
            driver
                .start(&peer_id, Arc::new(inbound))
                .map_err(NodeError::Host)?;
            info!("Proximity transport {} started", driver.protocol_name());
            found_peers = Some((code, found));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);
        let shutdown = CancellationToken::new();

        tokio::spawn(Self::run_swarm_loop(
            swarm,
            command_rx,
            event_tx.clone(),
            peerstore.clone(),
            shutdown.clone(),
        ));
        if let Some((code, found)) = found_peers {
            tokio::spawn(Self::dial_found_peers(
                found,
                code,
                command_tx.downgrade(),
                shutdown.clone(),
            ));
        }

        info!("Host {} started", peer_id);
        Ok(Self {
            peer_id,
            peerstore,
            command_tx,
            event_tx,
            shutdown,
            proximity: settings.proximity,
            dns_source,
            relay: settings.relay,
            reachability: settings.reachability,
            pubsub: settings.pubsub,
        })
    }

    /// Subscribe to host events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<HostEvent> {
        self.event_tx.subscribe()
    }

    /// Cancelled once the host is closed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn dns_source(&self) -> DnsSource {
        self.dns_source
    }

    pub fn relay_enabled(&self) -> bool {
        self.relay
    }

    pub fn reachability(&self) -> Reachability {
        self.reachability
    }

    pub fn pubsub_enabled(&self) -> bool {
        self.pubsub
    }

    /// Join a gossipsub topic.
    pub async fn subscribe_topic(&self, topic: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::Subscribe {
            topic: topic.to_string(),
            reply,
        })?;
        rx.await
            .map_err(|_| anyhow::anyhow!("Subscribe response channel closed"))?
    }

    pub fn set_dht_mode(&self, mode: DhtMode) -> Result<()> {
        let mode = match mode {
            DhtMode::Auto => None,
            DhtMode::Client => Some(kad::Mode::Client),
            DhtMode::Server => Some(kad::Mode::Server),
        };
        self.send(HostCommand::SetDhtMode { mode })
    }

    pub fn add_dht_address(&self, peer: PeerId, addr: Multiaddr) -> Result<()> {
        self.send(HostCommand::AddDhtAddress { peer, addr })
    }

    pub async fn dht_bootstrap(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::DhtBootstrap { reply })?;
        rx.await
            .map_err(|_| anyhow::anyhow!("Bootstrap response channel closed"))?
    }

    pub async fn routing_table_size(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::RoutingTableSize { reply })?;
        rx.await
            .map_err(|_| anyhow::anyhow!("Routing table response channel closed"))
    }

    fn send(&self, command: HostCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| anyhow::anyhow!("Host {} is closed", self.peer_id))
    }

    /// Dial peers the proximity driver reports in range.
    async fn dial_found_peers(
        mut found: mpsc::UnboundedReceiver<PeerId>,
        code: u32,
        command_tx: mpsc::WeakUnboundedSender<HostCommand>,
        shutdown: CancellationToken,
    ) {
        loop {
            let peer = tokio::select! {
                _ = shutdown.cancelled() => break,
                peer = found.recv() => match peer {
                    Some(peer) => peer,
                    None => break,
                },
            };
            let Some(command_tx) = command_tx.upgrade() else {
                break;
            };
            debug!("Proximity peer {} in range, dialing", peer);
            let (reply, _) = oneshot::channel();
            let dial = HostCommand::Dial {
                peer,
                addrs: vec![proximity_peer_addr(code, peer)],
                reply,
            };
            if command_tx.send(dial).is_err() {
                break;
            }
        }
    }

    /// Run the swarm event loop until shutdown or until every handle is gone.
    async fn run_swarm_loop(
        mut swarm: Swarm<HostBehaviour>,
        mut command_rx: mpsc::UnboundedReceiver<HostCommand>,
        event_tx: broadcast::Sender<HostEvent>,
        peerstore: Arc<Peerstore>,
        shutdown: CancellationToken,
    ) {
        let mut pending = PendingDials::default();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => Self::handle_command(&mut swarm, &mut pending, cmd),
                    None => break,
                },
                event = swarm.select_next_some() => {
                    Self::handle_swarm_event(&mut swarm, &mut pending, &event_tx, &peerstore, event);
                }
            }
        }
        debug!("Swarm loop for {} stopped", swarm.local_peer_id());
    }

    fn handle_command(
        swarm: &mut Swarm<HostBehaviour>,
        pending: &mut PendingDials,
        cmd: HostCommand,
    ) {
        match cmd {
            HostCommand::Dial { peer, addrs, reply } => {
                if swarm.is_connected(&peer) {
                    let _ = reply.send(Ok(()));
                    return;
                }
                let opts = DialOpts::peer_id(peer).addresses(addrs).build();
                match swarm.dial(opts) {
                    Ok(()) => pending.push(peer, reply),
                    Err(e) => {
                        let _ = reply.send(Err(anyhow::anyhow!("Failed to dial {}: {}", peer, e)));
                    }
                }
            }
            HostCommand::GetListenAddrs { reply } => {
                let _ = reply.send(swarm.listeners().cloned().collect());
            }
            HostCommand::GetConnectedPeers { reply } => {
                let _ = reply.send(swarm.connected_peers().cloned().collect());
            }
            HostCommand::Subscribe { topic, reply } => {
                let result = match swarm.behaviour_mut().gossipsub.as_mut() {
                    Some(gossipsub) => gossipsub
                        .subscribe(&IdentTopic::new(&topic))
                        .map(|_| ())
                        .map_err(|e| anyhow::anyhow!("Failed to subscribe to {}: {:?}", topic, e)),
                    None => Err(anyhow::anyhow!("Pubsub is disabled on this host")),
                };
                let _ = reply.send(result);
            }
            HostCommand::SetDhtMode { mode } => {
                swarm.behaviour_mut().kademlia.set_mode(mode);
            }
            HostCommand::AddDhtAddress { peer, addr } => {
                swarm.behaviour_mut().kademlia.add_address(&peer, addr);
            }
            HostCommand::DhtBootstrap { reply } => {
                let result = swarm
                    .behaviour_mut()
                    .kademlia
                    .bootstrap()
                    .map(|_| ())
                    .map_err(|e| anyhow::anyhow!("Failed to bootstrap Kademlia: {:?}", e));
                let _ = reply.send(result);
            }
            HostCommand::RoutingTableSize { reply } => {
                let size = swarm
                    .behaviour_mut()
                    .kademlia
                    .kbuckets()
                    .map(|bucket| bucket.num_entries())
                    .sum();
                let _ = reply.send(size);
            }
        }
    }

    fn handle_swarm_event(
        swarm: &mut Swarm<HostBehaviour>,
        pending: &mut PendingDials,
        event_tx: &broadcast::Sender<HostEvent>,
        peerstore: &Peerstore,
        event: SwarmEvent<HostBehaviourEvent>,
    ) {
        match event {
            SwarmEvent::Behaviour(HostBehaviourEvent::Identify(identify_event)) => {
                Self::handle_identify_event(swarm, event_tx, peerstore, identify_event);
            }
            SwarmEvent::Behaviour(HostBehaviourEvent::Kademlia(kad::Event::RoutingUpdated {
                peer,
                ..
            })) => {
                debug!("Kademlia routing updated for peer: {}", peer);
            }
            SwarmEvent::Behaviour(HostBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                debug!(
                    "Received gossipsub message on {} from {}: {} bytes",
                    message.topic,
                    propagation_source,
                    message.data.len()
                );
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                info!(
                    "Connection established with {} at {}",
                    peer_id,
                    endpoint.get_remote_address()
                );
                pending.resolve(&peer_id, || Ok(()));
                let _ = event_tx.send(HostEvent::ConnectionEstablished(peer_id));
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                debug!("Connection closed with {}", peer_id);
                if num_established == 0 {
                    let _ = event_tx.send(HostEvent::ConnectionClosed(peer_id));
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                let reason = error.to_string();
                warn!("Failed to connect to {}: {}", peer_id, reason);
                pending.resolve(&peer_id, || {
                    Err(anyhow::anyhow!("Failed to connect to {}: {}", peer_id, reason))
                });
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}", address);
            }
            _ => {}
        }
    }

    fn handle_identify_event(
        swarm: &mut Swarm<HostBehaviour>,
        event_tx: &broadcast::Sender<HostEvent>,
        peerstore: &Peerstore,
        event: identify::Event,
    ) {
        if let identify::Event::Received { peer_id, info, .. } = event {
            debug!(
                "Identified peer {}: {} with {} addresses",
                peer_id,
                info.agent_version,
                info.listen_addrs.len()
            );
            for addr in &info.listen_addrs {
                swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer_id, addr.clone());
            }
            peerstore.add_addrs(peer_id, info.listen_addrs.iter().cloned());

            if let Err(e) = event_tx.send(HostEvent::PeerIdentified {
                peer: peer_id,
                addrs: info.listen_addrs,
            }) {
                debug!("No subscribers for identify event: {}", e);
            }
        }
    }
}

#[async_trait]
impl Host for Libp2pHost {
    fn id(&self) -> PeerId {
        self.peer_id
    }

    fn peerstore(&self) -> Arc<Peerstore> {
        self.peerstore.clone()
    }

    async fn listen_addrs(&self) -> Result<Vec<Multiaddr>> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::GetListenAddrs { reply })?;
        rx.await
            .map_err(|_| anyhow::anyhow!("Listen addrs response channel closed"))
    }

    async fn connect(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<()> {
        self.peerstore.add_addrs(peer, addrs.iter().cloned());
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::Dial { peer, addrs, reply })?;
        rx.await
            .map_err(|_| anyhow::anyhow!("Dial response channel closed"))?
    }

    async fn connected_peers(&self) -> Result<Vec<PeerId>> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::GetConnectedPeers { reply })?;
        rx.await
            .map_err(|_| anyhow::anyhow!("Connected peers response channel closed"))
    }

    fn close(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();
        if let Some(driver) = &self.proximity {
            driver.stop()?;
        }
        info!("Host {} closed", self.peer_id);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Full host constructor: listens on the configured addresses, relay and
/// QUIC enabled. Caller options are applied last.
pub fn default_host_option() -> HostOption {
    Arc::new(|id: PeerId, peerstore: Arc<Peerstore>, options: Vec<HostSetting>| {
        let key = peerstore
            .private_key(&id)
            .ok_or(NodeError::MissingIdentityKey(id))?;

        let mut settings = vec![
            HostSetting::Identity(key),
            HostSetting::EnableRelay,
            HostSetting::EnableQuic,
        ];
        settings.extend(options);

        let host = Libp2pHost::spawn(
            peerstore,
            HostSettings::resolve(&settings),
            TransportProfile::Full,
        )?;
        Ok(Arc::new(host) as Arc<dyn Host>)
    })
}
