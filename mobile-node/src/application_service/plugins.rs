//! Process-wide plugin loading.
//!
//! The plugin subsystem is initialised once per process. The first caller's
//! repository decides the plugin directory; later callers share that loader
//! whatever path they pass.

use crate::error::NodeError;
use crate::infrastructure::plugin_loader::FsPluginLoader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Directory under the repository root holding plugin manifests.
pub const PLUGIN_DIR: &str = "plugins";

/// Two-phase plugin loader.
pub trait PluginLoader: Send + Sync {
    /// Discover plugin metadata.
    fn initialize(&mut self) -> anyhow::Result<()>;

    /// Activate discovered plugins.
    fn inject(&mut self) -> anyhow::Result<()>;
}

struct Loaded<L> {
    repo_path: PathBuf,
    loader: Arc<L>,
}

/// A lazily initialised, mutex-guarded loader cell.
pub struct PluginSingleton<L> {
    cell: Mutex<Option<Loaded<L>>>,
}

impl<L: PluginLoader> PluginSingleton<L> {
    pub const fn new() -> Self {
        Self {
            cell: Mutex::new(None),
        }
    }

    /// Return the cached loader, or build and initialise one with `build`.
    ///
    /// The lock is held across the check and the initialisation only. A
    /// failed initialisation leaves the cell empty so a later call retries.
    pub fn load_with<F>(&self, repo_path: &Path, build: F) -> Result<Arc<L>, NodeError>
    where
        F: FnOnce(PathBuf) -> anyhow::Result<L>,
    {
        let mut cell = self.cell.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(loaded) = cell.as_ref() {
            if loaded.repo_path != repo_path {
                warn!(
                    "Plugins already loaded from {}, ignoring {}",
                    loaded.repo_path.display(),
                    repo_path.display()
                );
            }
            return Ok(loaded.loader.clone());
        }

        let plugin_dir = repo_path.join(PLUGIN_DIR);
        let mut loader = build(plugin_dir.clone()).map_err(NodeError::Plugin)?;
        loader.initialize().map_err(NodeError::Plugin)?;
        loader.inject().map_err(NodeError::Plugin)?;
        info!("Loaded plugins from {}", plugin_dir.display());

        let loader = Arc::new(loader);
        *cell = Some(Loaded {
            repo_path: repo_path.to_path_buf(),
            loader: loader.clone(),
        });
        Ok(loader)
    }

    /// The cached loader, if initialisation has happened.
    pub fn loaded(&self) -> Option<Arc<L>> {
        self.cell
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|l| l.loader.clone())
    }
}

impl<L: PluginLoader> Default for PluginSingleton<L> {
    fn default() -> Self {
        Self::new()
    }
}

static PLUGINS: PluginSingleton<FsPluginLoader> = PluginSingleton::new();

/// Load the process-wide plugin set from `<repo_path>/plugins`.
pub fn load_plugins(repo_path: &Path) -> Result<Arc<FsPluginLoader>, NodeError> {
    PLUGINS.load_with(repo_path, FsPluginLoader::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    struct CountingLoader {
        initialized: Arc<AtomicUsize>,
        injected: Arc<AtomicUsize>,
        fail_initialize: bool,
    }

    impl PluginLoader for CountingLoader {
        fn initialize(&mut self) -> anyhow::Result<()> {
            self.initialized.fetch_add(1, Ordering::SeqCst);
            if self.fail_initialize {
                anyhow::bail!("bad manifest");
            }
            Ok(())
        }

        fn inject(&mut self) -> anyhow::Result<()> {
            self.injected.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_callers_initialize_once() {
        let singleton = Arc::new(PluginSingleton::<CountingLoader>::new());
        let initialized = Arc::new(AtomicUsize::new(0));
        let injected = Arc::new(AtomicUsize::new(0));
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let singleton = singleton.clone();
                let initialized = initialized.clone();
                let injected = injected.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let repo = PathBuf::from(format!("/tmp/repo-{}", i));
                    singleton
                        .load_with(&repo, |_dir| {
                            Ok(CountingLoader {
                                initialized,
                                injected,
                                fail_initialize: false,
                            })
                        })
                        .map(|loader| Arc::as_ptr(&loader) as usize)
                })
            })
            .collect();

        let pointers: Vec<usize> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(initialized.load(Ordering::SeqCst), 1);
        assert_eq!(injected.load(Ordering::SeqCst), 1);
        assert!(pointers.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_failure_is_not_cached() {
        let singleton = PluginSingleton::<CountingLoader>::new();
        let initialized = Arc::new(AtomicUsize::new(0));
        let injected = Arc::new(AtomicUsize::new(0));
        let repo = PathBuf::from("/tmp/repo");

        let err = singleton
            .load_with(&repo, |_| {
                Ok(CountingLoader {
                    initialized: initialized.clone(),
                    injected: injected.clone(),
                    fail_initialize: true,
                })
            })
            .err()
            .unwrap();
        assert!(matches!(err, NodeError::Plugin(_)));
        assert_eq!(injected.load(Ordering::SeqCst), 0);
        assert!(singleton.loaded().is_none());

        singleton
            .load_with(&repo, |_| {
                Ok(CountingLoader {
                    initialized: initialized.clone(),
                    injected: injected.clone(),
                    fail_initialize: false,
                })
            })
            .unwrap();
        assert_eq!(initialized.load(Ordering::SeqCst), 2);
        assert_eq!(injected.load(Ordering::SeqCst), 1);
        assert!(singleton.loaded().is_some());
    }

    #[test]
    fn test_plugin_dir_is_under_repo() {
        let singleton = PluginSingleton::<CountingLoader>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut seen_dir = None;

        singleton
            .load_with(Path::new("/data/repo"), |dir| {
                seen_dir = Some(dir);
                Ok(CountingLoader {
                    initialized: counter.clone(),
                    injected: counter.clone(),
                    fail_initialize: false,
                })
            })
            .unwrap();

        assert_eq!(seen_dir, Some(PathBuf::from("/data/repo/plugins")));
    }

    #[test]
    fn test_later_path_gets_first_loader() {
        let singleton = PluginSingleton::<CountingLoader>::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let build = |_: PathBuf| {
            Ok(CountingLoader {
                initialized: counter.clone(),
                injected: Arc::new(AtomicUsize::new(0)),
                fail_initialize: false,
            })
        };

        let first = singleton.load_with(Path::new("/repo/a"), build).unwrap();
        let second = singleton.load_with(Path::new("/repo/b"), build).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
