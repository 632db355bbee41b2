//! Filesystem repository: JSON config, sled datastore and a process lock.

use crate::application_service::plugins::PLUGIN_DIR;
use crate::domain::Config;
use crate::port::repository::{Datastore, Repository};
use anyhow::{anyhow, bail, Context, Result};
use sled::Db;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

pub const CONFIG_FILE: &str = "config";
pub const LOCK_FILE: &str = "repo.lock";

const DATASTORE_TREE_NAME: &str = "datastore";

/// Sled-backed key-value store.
///
/// [`SledDatastore::close`] drops the database even while other handles to
/// the store are alive, so the repository can be reopened in-process.
pub struct SledDatastore {
    inner: RwLock<Option<(Db, sled::Tree)>>,
}

impl SledDatastore {
    /// Open or create a sled database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).context("Failed to open sled database")?;
        let tree = db
            .open_tree(DATASTORE_TREE_NAME)
            .context("Failed to open datastore tree")?;
        Ok(Self {
            inner: RwLock::new(Some((db, tree))),
        })
    }

    fn tree(&self) -> Result<sled::Tree> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|(_, tree)| tree.clone())
            .ok_or_else(|| anyhow!("datastore is closed"))
    }

    pub fn flush(&self) -> Result<()> {
        if let Some((db, _)) = self.inner.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            db.flush().context("Failed to flush datastore")?;
        }
        Ok(())
    }

    /// Flush and release the database. Later operations fail.
    pub fn close(&self) -> Result<()> {
        let taken = self.inner.write().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((db, tree)) = taken {
            db.flush().context("Failed to flush datastore")?;
            drop(tree);
            drop(db);
        }
        Ok(())
    }
}

impl Datastore for SledDatastore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .tree()?
            .get(key.as_bytes())
            .context("Failed to read datastore")?
            .map(|value| value.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.tree()?
            .insert(key.as_bytes(), value)
            .context("Failed to write datastore")?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.tree()?
            .remove(key.as_bytes())
            .context("Failed to delete from datastore")?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.tree()?.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item.context("Failed to scan datastore")?;
            let key = String::from_utf8(key.to_vec()).context("Datastore key is not UTF-8")?;
            entries.push((key, value.to_vec()));
        }
        Ok(entries)
    }
}

/// On-disk repository rooted at a directory.
///
/// Holds an exclusive lock on `repo.lock` while open, so a second open of
/// the same repository fails until [`Repository::close`] or drop.
pub struct FsRepo {
    path: PathBuf,
    datastore: Arc<SledDatastore>,
    lock: Mutex<Option<File>>,
}

impl FsRepo {
    pub fn is_initialized(path: &Path) -> bool {
        path.join(CONFIG_FILE).is_file()
    }

    /// Create the repository layout and write `config`.
    pub fn init(path: &Path, config: &Config) -> Result<()> {
        if Self::is_initialized(path) {
            bail!("repository already initialized at {}", path.display());
        }
        fs::create_dir_all(path.join(&config.datastore.path))
            .with_context(|| format!("Failed to create repository at {}", path.display()))?;
        fs::create_dir_all(path.join(PLUGIN_DIR)).context("Failed to create plugin directory")?;
        write_config(path, config)?;
        info!("Initialized repository at {}", path.display());
        Ok(())
    }

    /// Read the config of an initialized repository without opening it.
    pub fn read_config(path: &Path) -> Result<Config> {
        let bytes = fs::read(path.join(CONFIG_FILE))
            .with_context(|| format!("Failed to read config in {}", path.display()))?;
        serde_json::from_slice(&bytes).context("Failed to parse config")
    }

    /// Lock and open the repository at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if !Self::is_initialized(path) {
            bail!("no repository initialized at {}", path.display());
        }
        let lock = acquire_lock(path)?;
        let config = Self::read_config(path)?;
        let datastore = SledDatastore::open(path.join(&config.datastore.path))?;
        debug!("Opened repository at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            datastore: Arc::new(datastore),
            lock: Mutex::new(lock),
        })
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn acquire_lock(path: &Path) -> Result<Option<File>> {
    use fs2::FileExt;

    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path.join(LOCK_FILE))
        .context("Failed to open repository lock")?;
    file.try_lock_exclusive()
        .with_context(|| format!("repository {} is locked by another user", path.display()))?;
    Ok(Some(file))
}

#[cfg(target_arch = "wasm32")]
fn acquire_lock(_path: &Path) -> Result<Option<File>> {
    Ok(None)
}

/// Write through a temporary file and rename, so readers never observe a
/// partial config.
fn write_config(path: &Path, config: &Config) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
    let tmp = path.join(format!("{}.tmp", CONFIG_FILE));
    fs::write(&tmp, bytes).context("Failed to write config")?;
    fs::rename(&tmp, path.join(CONFIG_FILE)).context("Failed to replace config")?;
    Ok(())
}

impl Repository for FsRepo {
    fn path(&self) -> &Path {
        &self.path
    }

    fn config(&self) -> Result<Config> {
        Self::read_config(&self.path)
    }

    fn set_config(&self, config: &Config) -> Result<()> {
        write_config(&self.path, config)
    }

    fn datastore(&self) -> Arc<dyn Datastore> {
        self.datastore.clone()
    }

    fn close(&self) -> Result<()> {
        self.datastore.close()?;
        if let Some(file) = self.lock.lock().unwrap_or_else(|e| e.into_inner()).take() {
            #[cfg(not(target_arch = "wasm32"))]
            fs2::FileExt::unlock(&file).context("Failed to release repository lock")?;
            drop(file);
        }
        debug!("Closed repository at {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_open_round_trip() {
        let dir = tempdir().unwrap();
        let config = Config::default_config().unwrap();
        FsRepo::init(dir.path(), &config).unwrap();
        assert!(dir.path().join(PLUGIN_DIR).is_dir());
        assert!(dir.path().join(&config.datastore.path).is_dir());

        let repo = FsRepo::open(dir.path()).unwrap();
        assert_eq!(repo.config().unwrap(), config);
    }

    #[test]
    fn test_init_twice_fails() {
        let dir = tempdir().unwrap();
        let config = Config::default_config().unwrap();
        FsRepo::init(dir.path(), &config).unwrap();
        assert!(FsRepo::init(dir.path(), &config).is_err());
    }

    #[test]
    fn test_open_uninitialized_fails() {
        let dir = tempdir().unwrap();
        assert!(FsRepo::open(dir.path()).is_err());
    }

    #[test]
    fn test_second_open_fails_until_closed() {
        let dir = tempdir().unwrap();
        FsRepo::init(dir.path(), &Config::default_config().unwrap()).unwrap();

        let repo = FsRepo::open(dir.path()).unwrap();
        let err = FsRepo::open(dir.path()).err().unwrap();
        assert!(err.to_string().contains("locked"));

        repo.close().unwrap();
        drop(repo);
        FsRepo::open(dir.path()).unwrap();
    }

    #[test]
    fn test_reopen_while_datastore_handle_alive() {
        let dir = tempdir().unwrap();
        FsRepo::init(dir.path(), &Config::default_config().unwrap()).unwrap();

        let repo = FsRepo::open(dir.path()).unwrap();
        let store = repo.datastore();
        store.put("/k", b"v").unwrap();
        repo.close().unwrap();
        drop(repo);
        assert!(store.get("/k").is_err());

        let reopened = FsRepo::open(dir.path()).unwrap();
        assert_eq!(reopened.datastore().get("/k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_set_config_replaces_file() {
        let dir = tempdir().unwrap();
        let mut config = Config::default_config().unwrap();
        FsRepo::init(dir.path(), &config).unwrap();
        let repo = FsRepo::open(dir.path()).unwrap();

        config.discovery.mdns.enabled = false;
        repo.set_config(&config).unwrap();

        assert!(!repo.config().unwrap().mdns_enabled());
        assert!(!dir.path().join("config.tmp").exists());
    }

    #[test]
    fn test_datastore_prefix_scan() {
        let dir = tempdir().unwrap();
        FsRepo::init(dir.path(), &Config::default_config().unwrap()).unwrap();
        let repo = FsRepo::open(dir.path()).unwrap();
        let store = repo.datastore();

        store.put("/a/1", b"one").unwrap();
        store.put("/a/2", b"two").unwrap();
        store.put("/b/1", b"other").unwrap();
        store.delete("/a/2").unwrap();

        let entries = store.scan_prefix("/a/").unwrap();
        assert_eq!(entries, vec![("/a/1".to_string(), b"one".to_vec())]);
        assert_eq!(store.get("/b/1").unwrap(), Some(b"other".to_vec()));
        assert_eq!(store.get("/missing").unwrap(), None);
    }
}
