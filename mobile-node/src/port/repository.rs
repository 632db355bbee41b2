//! Repository port - persisted configuration and data.

use crate::domain::Config;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Abstract interface for an on-disk node repository.
pub trait Repository: Send + Sync {
    /// Repository root.
    fn path(&self) -> &Path;

    /// Read the persisted configuration.
    fn config(&self) -> Result<Config>;

    /// Replace the persisted configuration.
    ///
    /// Implementations must not leave a partially written configuration
    /// behind when this fails.
    fn set_config(&self, config: &Config) -> Result<()>;

    /// Key-value store backing node state.
    fn datastore(&self) -> Arc<dyn Datastore>;

    /// Flush and release the repository.
    fn close(&self) -> Result<()>;
}

/// Abstract interface for a key-value datastore.
pub trait Datastore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}
