//! Synchronous facade over a mobile node for host applications.
//!
//! [`MobileIpfs`] owns its tokio runtime, so callers on plain platform
//! threads can start, stop and reconfigure a node without an async context.
//! Every method takes the same lock; calls are serialized.

pub mod error;
pub mod logging;
pub mod sock;

pub use error::{BridgeError, BridgeStage};
pub use sock::SockManager;

use mobile_node::application_service::config_patch::RepoMobile;
use mobile_node::{
    init_repo, open_repo, repo_is_initialized, Config, DiscoveryLocker, DnsResolver, NetDriver,
    Node, NodeConfig, NodeError, ProximityDriver,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Runtime;
use tracing::{info, warn};

/// Default repository location under the base directory.
pub const DEFAULT_REPO_PATH: &str = "ipfs/repo";

static SOCK_MANAGER: Mutex<Option<Arc<SockManager>>> = Mutex::new(None);

/// The process-wide socket manager. The first caller's cache directory wins.
fn sock_manager(cache_dir: &Path) -> std::io::Result<Arc<SockManager>> {
    let mut manager = SOCK_MANAGER.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = manager.as_ref() {
        return Ok(existing.clone());
    }
    let created = Arc::new(SockManager::new(cache_dir)?);
    *manager = Some(created.clone());
    Ok(created)
}

/// Where the node lives and which platform capabilities it may use.
#[derive(Clone, Default)]
pub struct MobileOptions {
    /// App files directory; the repository is created beneath it.
    pub base_dir: PathBuf,
    /// Repository path relative to `base_dir`. Defaults to [`DEFAULT_REPO_PATH`].
    pub repo_path: Option<String>,
    /// Directory for API sockets.
    pub cache_dir: PathBuf,
    pub proximity_driver: Option<Arc<dyn ProximityDriver>>,
    pub net_driver: Option<Arc<dyn NetDriver>>,
    pub discovery_locker: Option<Arc<dyn DiscoveryLocker>>,
    /// DNS servers reported by the platform, for systems without a readable
    /// resolver configuration.
    pub dns_resolver: Option<DnsResolver>,
}

#[derive(Default)]
struct State {
    node: Option<Node>,
    repo: Option<Arc<RepoMobile>>,
}

pub struct MobileIpfs {
    runtime: Runtime,
    options: MobileOptions,
    repo_path: PathBuf,
    sock_path: PathBuf,
    state: Mutex<State>,
}

impl MobileIpfs {
    /// Prepare the repository (initializing it with a fresh config when
    /// missing) and reserve an API socket path. Does not start the node.
    pub fn new(options: MobileOptions) -> Result<Self, BridgeError> {
        let relative = options.repo_path.as_deref().unwrap_or(DEFAULT_REPO_PATH);
        let repo_path = options.base_dir.join(relative.trim_start_matches('/'));

        let sock_path = sock_manager(&options.cache_dir)
            .and_then(|manager| manager.new_sock_path())
            .map_err(|e| {
                BridgeError::new(
                    BridgeStage::SockManager,
                    format!("API socket creation failed: {}", e),
                )
            })?;

        if !repo_is_initialized(&repo_path) {
            let config = Config::default_config().map_err(|e| {
                BridgeError::with_cause(
                    BridgeStage::ConfigCreation,
                    "Config creation failed",
                    NodeError::InvalidConfig(format!("{:#}", e)),
                )
            })?;
            std::fs::create_dir_all(&repo_path).map_err(|e| {
                BridgeError::new(
                    BridgeStage::RepoInit,
                    format!("Repo directory creation failed: {}: {}", repo_path.display(), e),
                )
            })?;
            init_repo(&repo_path, &config).map_err(|e| {
                BridgeError::with_cause(BridgeStage::RepoInit, "Repo initialization failed", e)
            })?;
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("mobile-node")
            .build()
            .map_err(|e| {
                BridgeError::new(BridgeStage::NodeStart, format!("Runtime creation failed: {}", e))
            })?;

        Ok(Self {
            runtime,
            options,
            repo_path,
            sock_path,
            state: Mutex::new(State::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn repo_absolute_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn api_socket_path(&self) -> &Path {
        &self.sock_path
    }

    pub fn is_started(&self) -> bool {
        self.lock().node.is_some()
    }

    fn open_repo_if_closed(&self, state: &mut State) -> Result<Arc<RepoMobile>, BridgeError> {
        if let Some(repo) = &state.repo {
            return Ok(repo.clone());
        }
        let repo = open_repo(&self.repo_path).map_err(|e| {
            BridgeError::with_cause(BridgeStage::RepoOpen, "Repo opening failed", e)
        })?;
        state.repo = Some(repo.clone());
        Ok(repo)
    }

    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            proximity_driver: self.options.proximity_driver.clone(),
            net_driver: self.options.net_driver.clone(),
            discovery_locker: self.options.discovery_locker.clone(),
            dns_resolver: self.options.dns_resolver.clone(),
            ..NodeConfig::default()
        }
    }

    /// Start the node, serve the API on the reserved Unix socket and serve
    /// the configured API and gateway addresses.
    pub fn start(&self) -> Result<(), BridgeError> {
        let mut state = self.lock();
        self.start_locked(&mut state)
    }

    fn start_locked(&self, state: &mut State) -> Result<(), BridgeError> {
        if state.node.is_some() {
            return Err(BridgeError::new(BridgeStage::NodeStart, "Node already started"));
        }
        let repo = self.open_repo_if_closed(state)?;
        let config = self.node_config();
        let sock_path = self.sock_path.clone();

        let node = self
            .runtime
            .block_on(async move {
                let node = Node::new(repo, config).await?;
                let served = async {
                    node.serve_unix_socket_api(&sock_path).await?;
                    node.serve_config().await
                }
                .await;
                if let Err(e) = served {
                    if let Err(close_err) = node.close().await {
                        warn!("Failed to close node after serve error: {}", close_err);
                    }
                    return Err(e);
                }
                Ok::<_, NodeError>(node)
            })
            .map_err(|e| BridgeError::with_cause(BridgeStage::NodeStart, "Node start failed", e))?;

        info!("Node {} started", node.peer_id());
        state.node = Some(node);
        Ok(())
    }

    /// Close the node and release the repository.
    pub fn stop(&self) -> Result<(), BridgeError> {
        let mut state = self.lock();
        self.stop_locked(&mut state)
    }

    fn stop_locked(&self, state: &mut State) -> Result<(), BridgeError> {
        let Some(node) = state.node.take() else {
            return Err(BridgeError::new(BridgeStage::NodeStop, "Node not started yet"));
        };
        let repo = state.repo.take();

        self.runtime
            .block_on(node.close())
            .map_err(|e| BridgeError::with_cause(BridgeStage::NodeStop, "Node stop failed", e))?;
        if let Some(repo) = repo {
            repo.repo().close().map_err(|e| {
                BridgeError::with_cause(BridgeStage::NodeStop, "Repo close failed", NodeError::Repo(e))
            })?;
        }
        info!("Node stopped");
        Ok(())
    }

    /// Stop then start, under one lock.
    pub fn restart(&self) -> Result<(), BridgeError> {
        let mut state = self.lock();
        self.stop_locked(&mut state)?;
        self.start_locked(&mut state)
    }

    /// The persisted configuration as JSON.
    pub fn get_config(&self) -> Result<Value, BridgeError> {
        let mut state = self.lock();
        let config = self.read_config(&mut state, BridgeStage::ConfigGetting)?;
        serde_json::to_value(&config).map_err(|e| {
            BridgeError::with_cause(
                BridgeStage::ConfigGetting,
                "Config getting failed",
                NodeError::InvalidConfig(e.to_string()),
            )
        })
    }

    /// Replace the persisted configuration. `None` writes a fresh default
    /// configuration, including a new identity.
    pub fn set_config(&self, config: Option<Value>) -> Result<(), BridgeError> {
        let config = match config {
            Some(value) => serde_json::from_value::<Config>(value)
                .map_err(|e| NodeError::InvalidConfig(e.to_string())),
            None => Config::default_config().map_err(|e| NodeError::InvalidConfig(format!("{:#}", e))),
        }
        .map_err(|e| BridgeError::with_cause(BridgeStage::ConfigSetting, "Config setting failed", e))?;

        let mut state = self.lock();
        self.write_config(&mut state, &config)
    }

    /// Value at a dotted key such as `Addresses.API`.
    pub fn get_config_key(&self, key: &str) -> Result<Value, BridgeError> {
        let mut state = self.lock();
        let config = self.read_config(&mut state, BridgeStage::ConfigGetting)?;
        config.get_key(key).map_err(|e| {
            BridgeError::with_cause(
                BridgeStage::ConfigGetting,
                "Config value getting failed",
                NodeError::InvalidConfig(format!("{:#}", e)),
            )
        })
    }

    pub fn set_config_key(&self, key: &str, value: Value) -> Result<(), BridgeError> {
        let mut state = self.lock();
        let mut config = self.read_config(&mut state, BridgeStage::ConfigSetting)?;
        config.set_key(key, value).map_err(|e| {
            BridgeError::with_cause(
                BridgeStage::ConfigSetting,
                "Config setting failed",
                NodeError::InvalidConfig(format!("{:#}", e)),
            )
        })?;
        self.write_config(&mut state, &config)
    }

    fn read_config(&self, state: &mut State, stage: BridgeStage) -> Result<Config, BridgeError> {
        let repo = self.open_repo_if_closed(state)?;
        repo.config()
            .map_err(|e| BridgeError::with_cause(stage, "Config reading failed", e))
    }

    fn write_config(&self, state: &mut State, config: &Config) -> Result<(), BridgeError> {
        let repo = self.open_repo_if_closed(state)?;
        repo.set_config(config).map_err(|e| {
            BridgeError::with_cause(BridgeStage::ConfigSetting, "Config setting failed", e)
        })
    }

    /// Serve the gateway on `multiaddr`; returns the bound address.
    pub fn serve_gateway_multiaddr(
        &self,
        multiaddr: &str,
        writable: bool,
    ) -> Result<String, BridgeError> {
        let state = self.lock();
        let Some(node) = state.node.as_ref() else {
            return Err(BridgeError::new(
                BridgeStage::NodeListen,
                "failed to listen on gateway: node isn't started",
            ));
        };
        self.runtime
            .block_on(node.serve_gateway_multiaddr(multiaddr, writable))
            .map(|addr| addr.to_string())
            .map_err(|e| {
                BridgeError::with_cause(BridgeStage::NodeListen, "failed to listen on gateway", e)
            })
    }
}

impl Drop for MobileIpfs {
    fn drop(&mut self) {
        let mut state = self.lock();
        if state.node.is_some() {
            if let Err(e) = self.stop_locked(&mut state) {
                warn!("Failed to stop node on drop: {}", e);
            }
        }
    }
}
