//! Registry of listeners opened by a node.

use libp2p::Multiaddr;
use std::sync::Mutex;
use tracing::{debug, warn};

/// A listener that can be shut down.
pub trait ManagedListener: Send + Sync {
    fn addr(&self) -> &Multiaddr;

    fn close(&self) -> anyhow::Result<()>;
}

/// Listeners opened during one node lifetime.
///
/// Entries are only added until [`ListenerRegistry::close_all`]; the
/// registry is not reused afterwards.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Box<dyn ManagedListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Box<dyn ManagedListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        debug!("Registered listener {}", listener.addr());
        listeners.push(listener);
    }

    /// Close every registered listener. Close errors are logged.
    pub fn close_all(&self) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            if let Err(e) = listener.close() {
                warn!("Failed to close listener {}: {}", listener.addr(), e);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Addresses of all registered listeners, in registration order.
    pub fn addrs(&self) -> Vec<Multiaddr> {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|l| l.addr().clone())
            .collect()
    }
}
