//! Config patches - ordered, skippable mutations of the persisted configuration.

use crate::domain::Config;
use crate::error::NodeError;
use crate::port::repository::Repository;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A mutation of the configuration.
pub type ConfigPatch = Arc<dyn Fn(&mut Config) -> anyhow::Result<()> + Send + Sync>;

/// Compose patches into one, applied in order.
///
/// `None` entries are skipped. The first error stops the chain; later
/// patches do not run. An empty chain succeeds without touching the config.
pub fn chain_config_patches(patches: Vec<Option<ConfigPatch>>) -> ConfigPatch {
    let patches: Vec<ConfigPatch> = patches.into_iter().flatten().collect();
    Arc::new(move |config: &mut Config| {
        for patch in &patches {
            patch(config)?;
        }
        Ok(())
    })
}

/// Patch that turns multicast discovery on or off.
pub fn set_mdns_enabled(enabled: bool) -> ConfigPatch {
    Arc::new(move |config: &mut Config| {
        config.discovery.mdns.enabled = enabled;
        Ok(())
    })
}

/// A repository whose configuration is changed through patch chains.
pub struct RepoMobile {
    repo: Arc<dyn Repository>,
    /// Serializes read-modify-write cycles within the process.
    patch_lock: Mutex<()>,
}

impl RepoMobile {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            patch_lock: Mutex::new(()),
        }
    }

    pub fn repo(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        self.repo.path()
    }

    pub fn config(&self) -> Result<Config, NodeError> {
        self.repo.config().map_err(NodeError::Repo)
    }

    pub fn set_config(&self, config: &Config) -> Result<(), NodeError> {
        let _guard = self.patch_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.repo.set_config(config).map_err(NodeError::Repo)
    }

    /// Read the persisted config, apply the chain, and persist the result.
    ///
    /// Nothing is written unless every patch succeeds.
    pub fn apply_patches(
        &self,
        patches: impl IntoIterator<Item = Option<ConfigPatch>>,
    ) -> Result<(), NodeError> {
        let chain = chain_config_patches(patches.into_iter().collect());

        let _guard = self.patch_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut config = self.repo.config().map_err(NodeError::Repo)?;
        chain(&mut config).map_err(NodeError::ConfigPatch)?;
        self.repo.set_config(&config).map_err(NodeError::Repo)?;

        debug!("Applied config patches to {}", self.repo.path().display());
        Ok(())
    }
}
