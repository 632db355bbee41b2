//! Repository helpers that load plugins before touching the repository.

use crate::application_service::config_patch::RepoMobile;
use crate::application_service::plugins::load_plugins;
use crate::domain::Config;
use crate::error::NodeError;
use crate::infrastructure::fs_repo::FsRepo;
use std::path::Path;
use std::sync::Arc;

pub fn repo_is_initialized(path: &Path) -> bool {
    FsRepo::is_initialized(path)
}

/// Create a repository at `path` with `config`.
pub fn init_repo(path: &Path, config: &Config) -> Result<(), NodeError> {
    load_plugins(path)?;
    FsRepo::init(path, config).map_err(NodeError::Repo)
}

/// Open the repository at `path`.
///
/// Fails when no loaded plugin provides the configured datastore type.
pub fn open_repo(path: &Path) -> Result<Arc<RepoMobile>, NodeError> {
    let plugins = load_plugins(path)?;

    let config = FsRepo::read_config(path).map_err(NodeError::Repo)?;
    if !plugins.provides_datastore(&config.datastore.kind) {
        return Err(NodeError::Plugin(anyhow::anyhow!(
            "no plugin provides datastore type `{}`",
            config.datastore.kind
        )));
    }

    let repo = FsRepo::open(path).map_err(NodeError::Repo)?;
    Ok(Arc::new(RepoMobile::new(Arc::new(repo))))
}
