//! Test utilities and mock implementations for unit testing.
//!
//! This module provides mock implementations of the ports so the lifecycle
//! manager and composers can be tested without a network or a disk.

use crate::application_service::listeners::ManagedListener;
use crate::domain::{Config, NodeFeatures};
use crate::error::NodeError;
use crate::port::host::{Host, HostOption, HostSetting, Peerstore};
use crate::port::http::{HttpServer, ServeListener, ServeOption};
use crate::port::node::{BootstrapConfig, BuildConfig, CoreNode, NodeConstructor};
use crate::port::platform::{
    DiscoveryLocker, DiscoveryService, DiscoveryServiceFactory, NetDriver, NetInterface,
    PeerFoundHandler, ProximityDriver, ProximityEvents,
};
use crate::port::repository::{Datastore, Repository};
use crate::port::routing::{DhtMode, Routing, RoutingOption, RoutingParams};
use anyhow::Result;
use async_trait::async_trait;
use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// MemoryDatastore / MemoryRepo
// ============================================================================

#[derive(Default)]
pub struct MemoryDatastore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl Datastore for MemoryDatastore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// In-memory repository counting config writes.
pub struct MemoryRepo {
    path: PathBuf,
    config: Mutex<Config>,
    datastore: Arc<MemoryDatastore>,
    set_config_calls: AtomicUsize,
    fail_writes_from: AtomicUsize,
}

impl MemoryRepo {
    pub fn new(config: Config) -> Self {
        Self {
            path: PathBuf::from("/memory/repo"),
            config: Mutex::new(config),
            datastore: Arc::new(MemoryDatastore::default()),
            set_config_calls: AtomicUsize::new(0),
            fail_writes_from: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn set_config_calls(&self) -> usize {
        self.set_config_calls.load(Ordering::SeqCst)
    }

    /// Let the first `allowed` config writes through and fail every later one.
    pub fn fail_writes_after(&self, allowed: usize) {
        self.fail_writes_from.store(allowed, Ordering::SeqCst);
    }
}

impl Repository for MemoryRepo {
    fn path(&self) -> &Path {
        &self.path
    }

    fn config(&self) -> Result<Config> {
        Ok(self.config.lock().unwrap().clone())
    }

    fn set_config(&self, config: &Config) -> Result<()> {
        let call = self.set_config_calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.fail_writes_from.load(Ordering::SeqCst) {
            anyhow::bail!("config write {} rejected", call + 1);
        }
        *self.config.lock().unwrap() = config.clone();
        Ok(())
    }

    fn datastore(&self) -> Arc<dyn Datastore> {
        self.datastore.clone()
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// MockHost
// ============================================================================

pub struct MockHost {
    id: PeerId,
    peerstore: Arc<Peerstore>,
    listen_addrs: Vec<Multiaddr>,
    connected: Mutex<Vec<PeerId>>,
    close_calls: AtomicUsize,
}

impl MockHost {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            peerstore: Arc::new(Peerstore::new()),
            listen_addrs: Vec::new(),
            connected: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_peerstore(self, peerstore: Arc<Peerstore>) -> Self {
        Self { peerstore, ..self }
    }

    pub fn with_listen_addrs(self, listen_addrs: Vec<Multiaddr>) -> Self {
        Self {
            listen_addrs,
            ..self
        }
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Host for MockHost {
    fn id(&self) -> PeerId {
        self.id
    }

    fn peerstore(&self) -> Arc<Peerstore> {
        self.peerstore.clone()
    }

    async fn listen_addrs(&self) -> Result<Vec<Multiaddr>> {
        Ok(self.listen_addrs.clone())
    }

    async fn connect(&self, peer: PeerId, addrs: Vec<Multiaddr>) -> Result<()> {
        self.peerstore.add_addrs(peer, addrs);
        let mut connected = self.connected.lock().unwrap();
        if !connected.contains(&peer) {
            connected.push(peer);
        }
        Ok(())
    }

    async fn connected_peers(&self) -> Result<Vec<PeerId>> {
        Ok(self.connected.lock().unwrap().clone())
    }

    fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Host option building a [`MockHost`] on the given peer store.
pub fn mock_host_option() -> HostOption {
    Arc::new(|id: PeerId, peerstore: Arc<Peerstore>, _: Vec<HostSetting>| {
        Ok(Arc::new(MockHost::new(id).with_peerstore(peerstore)) as Arc<dyn Host>)
    })
}

/// Host option that records the settings it receives.
pub fn recording_host_option(recorded: Arc<Mutex<Vec<HostSetting>>>) -> HostOption {
    Arc::new(
        move |id: PeerId, peerstore: Arc<Peerstore>, options: Vec<HostSetting>| {
            recorded.lock().unwrap().extend(options);
            Ok(Arc::new(MockHost::new(id).with_peerstore(peerstore)) as Arc<dyn Host>)
        },
    )
}

// ============================================================================
// MockRouting
// ============================================================================

pub struct MockRouting {
    mode: Mutex<DhtMode>,
    peers: Mutex<Vec<(PeerId, Multiaddr)>>,
}

impl MockRouting {
    pub fn new(mode: DhtMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            peers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Routing for MockRouting {
    fn mode(&self) -> DhtMode {
        *self.mode.lock().unwrap()
    }

    fn set_mode(&self, mode: DhtMode) -> Result<()> {
        *self.mode.lock().unwrap() = mode;
        Ok(())
    }

    fn add_peer(&self, peer: PeerId, addr: Multiaddr) -> Result<()> {
        self.peers.lock().unwrap().push((peer, addr));
        Ok(())
    }

    async fn bootstrap(&self) -> Result<()> {
        Ok(())
    }

    async fn routing_table_size(&self) -> Result<usize> {
        Ok(self.peers.lock().unwrap().len())
    }
}

pub fn mock_routing_option() -> RoutingOption {
    Arc::new(|_: Arc<dyn Host>, params: RoutingParams| {
        Ok(Arc::new(MockRouting::new(params.mode)) as Arc<dyn Routing>)
    })
}

// ============================================================================
// MockCoreNode / MockNodeConstructor
// ============================================================================

pub struct MockCoreNode {
    host: Arc<dyn Host>,
    routing: Arc<dyn Routing>,
    features: NodeFeatures,
    bootstrap_error: bool,
    closes: Arc<AtomicUsize>,
}

impl MockCoreNode {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            routing: Arc::new(MockRouting::new(DhtMode::Auto)),
            features: NodeFeatures::default(),
            bootstrap_error: false,
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl CoreNode for MockCoreNode {
    fn peer_id(&self) -> PeerId {
        self.host.id()
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

    async fn bootstrap(&self, _config: BootstrapConfig) -> Result<()> {
        if self.bootstrap_error {
            anyhow::bail!("no bootstrap peers reachable");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.host.close()
    }
}

type ConstructHook = Box<dyn Fn() + Send + Sync>;

/// Node constructor that runs the composed host and routing options on a
/// fresh identity and returns a [`MockCoreNode`].
#[derive(Default)]
pub struct MockNodeConstructor {
    fail: bool,
    bootstrap_error: bool,
    last_features: Mutex<Option<NodeFeatures>>,
    hook: Mutex<Option<ConstructHook>>,
    closes: Arc<AtomicUsize>,
}

impl MockNodeConstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_bootstrap_error(self) -> Self {
        Self {
            bootstrap_error: true,
            ..self
        }
    }

    /// Run `hook` at the start of every construction.
    pub fn on_construct(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn last_features(&self) -> Option<NodeFeatures> {
        *self.last_features.lock().unwrap()
    }

    /// Number of constructed nodes that were closed.
    pub fn closed_nodes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeConstructor for MockNodeConstructor {
    async fn construct(&self, config: BuildConfig) -> Result<Arc<dyn CoreNode>, NodeError> {
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook();
        }
        if self.fail {
            return Err(NodeError::Host(anyhow::anyhow!("mock construction failure")));
        }
        *self.last_features.lock().unwrap() = Some(config.features);

        let keypair = Keypair::generate_ed25519();
        let peer = keypair.public().to_peer_id();
        let peerstore = Arc::new(Peerstore::new());
        peerstore.add_key(peer, keypair);

        let host = (config.host)(peer, peerstore, vec![])?;
        let params = RoutingParams {
            datastore: config.repo.datastore(),
            bootstrap_peers: vec![],
            mode: DhtMode::Auto,
        };
        let routing = match (config.routing)(host.clone(), params) {
            Ok(routing) => routing,
            Err(e) => {
                host.close().ok();
                return Err(e);
            }
        };

        Ok(Arc::new(MockCoreNode {
            host,
            routing,
            features: config.features,
            bootstrap_error: self.bootstrap_error,
            closes: self.closes.clone(),
        }))
    }
}

// ============================================================================
// Platform mocks
// ============================================================================

/// In-process radio medium: drivers attached to one hub reach each other.
#[derive(Default)]
pub struct RadioHub {
    peers: Mutex<HashMap<PeerId, Arc<dyn ProximityEvents>>>,
}

impl RadioHub {
    fn events(&self, peer: &PeerId) -> Option<Arc<dyn ProximityEvents>> {
        self.peers.lock().unwrap().get(peer).cloned()
    }

    /// Tell `to` that `found` came into range.
    pub fn announce(&self, to: &PeerId, found: PeerId) -> bool {
        match self.events(to) {
            Some(events) => events.handle_found_peer(found),
            None => false,
        }
    }
}

/// Radio driver recording every call. Payloads are delivered to peers on
/// the same hub; peers marked in range accept dials without a hub entry.
pub struct RadioDriver {
    hub: Arc<RadioHub>,
    local: Mutex<Option<PeerId>>,
    in_range: Mutex<Vec<PeerId>>,
    dialed: Mutex<Vec<PeerId>>,
    sent: Mutex<HashMap<PeerId, Vec<u8>>>,
    closed: Mutex<Vec<PeerId>>,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
}

impl RadioDriver {
    pub fn attached(hub: Arc<RadioHub>) -> Self {
        Self {
            hub,
            local: Mutex::new(None),
            in_range: Mutex::new(Vec::new()),
            dialed: Mutex::new(Vec::new()),
            sent: Mutex::new(HashMap::new()),
            closed: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        }
    }

    pub fn standalone() -> Self {
        Self::attached(Arc::new(RadioHub::default()))
    }

    pub fn set_in_range(&self, peer: PeerId) {
        self.in_range.lock().unwrap().push(peer);
    }

    pub fn dialed(&self) -> Vec<PeerId> {
        self.dialed.lock().unwrap().clone()
    }

    pub fn sent_to(&self, peer: &PeerId) -> Vec<u8> {
        self.sent.lock().unwrap().get(peer).cloned().unwrap_or_default()
    }

    pub fn closed_links(&self) -> Vec<PeerId> {
        self.closed.lock().unwrap().clone()
    }

    fn reachable(&self, remote: &PeerId) -> bool {
        self.in_range.lock().unwrap().contains(remote) || self.hub.events(remote).is_some()
    }
}

impl ProximityDriver for RadioDriver {
    fn protocol_name(&self) -> &str {
        "radio"
    }

    fn protocol_code(&self) -> u32 {
        0x03e8
    }

    fn start(&self, local_peer: &PeerId, events: Arc<dyn ProximityEvents>) -> Result<()> {
        *self.local.lock().unwrap() = Some(*local_peer);
        self.hub.peers.lock().unwrap().insert(*local_peer, events);
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if let Some(local) = self.local.lock().unwrap().take() {
            self.hub.peers.lock().unwrap().remove(&local);
        }
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dial_peer(&self, remote: &PeerId) -> bool {
        self.dialed.lock().unwrap().push(*remote);
        self.reachable(remote)
    }

    fn send_to_peer(&self, remote: &PeerId, payload: &[u8]) -> bool {
        if !self.reachable(remote) {
            return false;
        }
        self.sent
            .lock()
            .unwrap()
            .entry(*remote)
            .or_default()
            .extend_from_slice(payload);
        let local = *self.local.lock().unwrap();
        if let (Some(local), Some(events)) = (local, self.hub.events(remote)) {
            events.receive_from_peer(local, payload.to_vec());
        }
        true
    }

    fn close_conn_with_peer(&self, remote: &PeerId) {
        self.closed.lock().unwrap().push(*remote);
        let local = *self.local.lock().unwrap();
        if let (Some(local), Some(events)) = (local, self.hub.events(remote)) {
            events.handle_lost_peer(local);
        }
    }
}

/// Interface enumeration returning a fixed list, or failing.
pub struct MockNetDriver {
    interfaces: Option<Vec<NetInterface>>,
}

impl MockNetDriver {
    pub fn with_interfaces(interfaces: Vec<NetInterface>) -> Self {
        Self {
            interfaces: Some(interfaces),
        }
    }

    pub fn failing() -> Self {
        Self { interfaces: None }
    }
}

impl NetDriver for MockNetDriver {
    fn interfaces(&self) -> Result<Vec<NetInterface>> {
        self.interfaces
            .clone()
            .ok_or_else(|| anyhow::anyhow!("interface enumeration denied"))
    }
}

#[derive(Default)]
pub struct MockLocker {
    locks: AtomicUsize,
    unlocks: AtomicUsize,
}

impl MockLocker {
    pub fn locks(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    pub fn unlocks(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }
}

impl DiscoveryLocker for MockLocker {
    fn lock(&self) {
        self.locks.fetch_add(1, Ordering::SeqCst);
    }

    fn unlock(&self) {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct DiscoveryCounters {
    created: AtomicUsize,
    started: AtomicUsize,
    closed: AtomicUsize,
}

/// Discovery factory counting service lifecycle calls.
#[derive(Default)]
pub struct MockDiscoveryFactory {
    fail_start: bool,
    counters: Arc<DiscoveryCounters>,
}

impl MockDiscoveryFactory {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

struct MockDiscovery {
    fail_start: bool,
    counters: Arc<DiscoveryCounters>,
}

#[async_trait]
impl DiscoveryService for MockDiscovery {
    async fn start(&self) -> Result<()> {
        if self.fail_start {
            anyhow::bail!("multicast socket unavailable");
        }
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl DiscoveryServiceFactory for MockDiscoveryFactory {
    fn create(
        &self,
        _host: Arc<dyn Host>,
        _handler: Arc<dyn PeerFoundHandler>,
    ) -> Result<Box<dyn DiscoveryService>> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDiscovery {
            fail_start: self.fail_start,
            counters: self.counters.clone(),
        }))
    }
}

// ============================================================================
// Serving mocks
// ============================================================================

/// HTTP server that records what it was asked to serve and holds the
/// listener until it is closed.
#[derive(Default)]
pub struct MockHttpServer {
    served: Mutex<Vec<Vec<ServeOption>>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl MockHttpServer {
    /// Wait until at least `count` listeners were handed over.
    pub async fn wait_for_serves(&self, count: usize) -> Vec<Vec<ServeOption>> {
        for _ in 0..500 {
            {
                let served = self.served.lock().unwrap();
                if served.len() >= count {
                    return served.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {} serve calls", count);
    }

    pub fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpServer for MockHttpServer {
    async fn serve(
        &self,
        _node: Arc<dyn CoreNode>,
        listener: ServeListener,
        options: Vec<ServeOption>,
    ) -> Result<()> {
        self.tokens.lock().unwrap().push(listener.shutdown.clone());
        self.served.lock().unwrap().push(options);
        listener.shutdown.cancelled().await;
        Ok(())
    }
}

/// Listener counting close calls.
pub struct CountingListener {
    addr: Multiaddr,
    closes: Arc<AtomicUsize>,
    fail: bool,
}

impl CountingListener {
    pub fn new(addr: Multiaddr, closes: Arc<AtomicUsize>) -> Self {
        Self {
            addr,
            closes,
            fail: false,
        }
    }

    pub fn failing(self) -> Self {
        Self { fail: true, ..self }
    }
}

impl ManagedListener for CountingListener {
    fn addr(&self) -> &Multiaddr {
        &self.addr
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("socket already closed");
        }
        Ok(())
    }
}
