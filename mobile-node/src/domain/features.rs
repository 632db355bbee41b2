//! Feature selection for a node build.

/// Optional subsystems toggled per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFeatures {
    /// Gossip-based publish/subscribe.
    pub pubsub: bool,
    /// Name record propagation over pubsub. Only effective with `pubsub`.
    pub ipns_pubsub: bool,
    /// Full DHT participation (server when reachable).
    pub dht: bool,
    /// Query-only DHT participation.
    pub dht_client: bool,
}

impl NodeFeatures {
    /// Reduced set for constrained networks: no pubsub, DHT client only.
    pub fn constrained() -> Self {
        Self {
            pubsub: false,
            ipns_pubsub: false,
            dht: false,
            dht_client: true,
        }
    }

    pub fn full() -> Self {
        Self {
            pubsub: true,
            ipns_pubsub: true,
            dht: true,
            dht_client: false,
        }
    }
}

/// Operating system family the node runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android,
    Ios,
    Desktop,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else {
            Platform::Desktop
        }
    }

    /// Platforms where interface enumeration cannot be trusted.
    pub fn is_constrained(&self) -> bool {
        matches!(self, Platform::Android)
    }
}
