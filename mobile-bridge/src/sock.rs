//! Allocation of short Unix socket paths.
//!
//! `sun_path` holds about a hundred bytes, which app data directories on
//! mobile platforms easily exceed, so sockets live under a dedicated
//! directory in the cache dir with numeric names.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

const SOCK_DIR: &str = "sock";
/// `sun_path` is 104 bytes on Darwin, 108 on Linux, including the NUL.
const MAX_SOCK_PATH: usize = 103;

pub struct SockManager {
    dir: PathBuf,
    next: AtomicU32,
}

impl SockManager {
    /// Create the socket directory under `base` and clear sockets left by a
    /// previous process.
    pub fn new(base: &Path) -> io::Result<Self> {
        let dir = base.join(SOCK_DIR);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        debug!("Socket directory {}", dir.display());
        Ok(Self {
            dir,
            next: AtomicU32::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh socket path, unique for this manager.
    pub fn new_sock_path(&self) -> io::Result<PathBuf> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(format!("{}.sock", id));
        if path.as_os_str().len() > MAX_SOCK_PATH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("socket path too long: {}", path.display()),
            ));
        }
        Ok(path)
    }
}
