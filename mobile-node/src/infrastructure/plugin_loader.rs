//! Plugin discovery from TOML manifests.
//!
//! A plugin directory holds one `*.toml` manifest per plugin:
//!
//! ```toml
//! name = "flatfs"
//! kind = "datastore"
//! version = "0.3.0"
//! enabled = true
//! ```
//!
//! The `sled` datastore plugin is always present.

use crate::application_service::plugins::PluginLoader;
use crate::domain::config::DEFAULT_DATASTORE_TYPE;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DATASTORE_KIND: &str = "datastore";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub kind: String,
    pub version: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PluginManifest {
    fn builtin_datastore() -> Self {
        Self {
            name: DEFAULT_DATASTORE_TYPE.to_string(),
            kind: DATASTORE_KIND.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            enabled: true,
        }
    }
}

pub struct FsPluginLoader {
    dir: PathBuf,
    discovered: Vec<PluginManifest>,
    active: Vec<PluginManifest>,
}

impl FsPluginLoader {
    pub fn new(dir: PathBuf) -> Result<Self> {
        Ok(Self {
            dir,
            discovered: vec![PluginManifest::builtin_datastore()],
            active: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Active plugins.
    pub fn plugins(&self) -> &[PluginManifest] {
        &self.active
    }

    /// Whether an active plugin provides the datastore type `kind`.
    pub fn provides_datastore(&self, kind: &str) -> bool {
        self.active
            .iter()
            .any(|p| p.kind == DATASTORE_KIND && p.name == kind)
    }

    fn read_manifest(path: &Path) -> Result<PluginManifest> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read plugin manifest {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Invalid plugin manifest {}", path.display()))
    }
}

impl PluginLoader for FsPluginLoader {
    fn initialize(&mut self) -> Result<()> {
        if !self.dir.is_dir() {
            debug!("No plugin directory at {}", self.dir.display());
            return Ok(());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list plugins in {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        for path in paths {
            let manifest = Self::read_manifest(&path)?;
            if self.discovered.iter().any(|p| p.name == manifest.name) {
                warn!(
                    "Plugin {} declared more than once, ignoring {}",
                    manifest.name,
                    path.display()
                );
                continue;
            }
            debug!("Discovered plugin {} {}", manifest.name, manifest.version);
            self.discovered.push(manifest);
        }
        Ok(())
    }

    fn inject(&mut self) -> Result<()> {
        self.active = self
            .discovered
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        for plugin in &self.active {
            info!("Plugin {} ({}) active", plugin.name, plugin.kind);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn loaded(dir: &Path) -> Result<FsPluginLoader> {
        let mut loader = FsPluginLoader::new(dir.to_path_buf())?;
        loader.initialize()?;
        loader.inject()?;
        Ok(loader)
    }

    #[test]
    fn test_builtin_datastore_without_directory() {
        let dir = tempdir().unwrap();
        let loader = loaded(&dir.path().join("missing")).unwrap();
        assert!(loader.provides_datastore("sled"));
        assert!(!loader.provides_datastore("flatfs"));
    }

    #[test]
    fn test_manifests_are_discovered() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("flatfs.toml"),
            "name = \"flatfs\"\nkind = \"datastore\"\nversion = \"0.3.0\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("badger.toml"),
            "name = \"badgerds\"\nkind = \"datastore\"\nversion = \"1.0.0\"\nenabled = false\n",
        )
        .unwrap();
        fs::write(dir.path().join("README"), "not a manifest").unwrap();

        let loader = loaded(dir.path()).unwrap();
        assert!(loader.provides_datastore("flatfs"));
        assert!(!loader.provides_datastore("badgerds"));
        assert_eq!(loader.plugins().len(), 2);
    }

    #[test]
    fn test_invalid_manifest_fails_initialize() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.toml"), "name = ").unwrap();
        assert!(loaded(dir.path()).is_err());
    }
}
