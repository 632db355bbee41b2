//! Error types for node orchestration.
//!
//! Every error produced by this crate carries a stage label through
//! [`NodeError::stage`], so callers at the bridge boundary can tell a failure
//! of the wrapped networking library apart from one raised by the hooks this
//! crate injects around it.

use libp2p::PeerId;
use thiserror::Error;

/// Stage of the node lifecycle an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Configuration,
    Repository,
    HostConfiguration,
    RoutingConfiguration,
    Construction,
    Discovery,
    Serving,
    Plugins,
    Bootstrap,
    Shutdown,
}

impl std::fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorStage::Configuration => "configuration",
            ErrorStage::Repository => "repository",
            ErrorStage::HostConfiguration => "host configuration",
            ErrorStage::RoutingConfiguration => "routing configuration",
            ErrorStage::Construction => "construction",
            ErrorStage::Discovery => "discovery",
            ErrorStage::Serving => "serving",
            ErrorStage::Plugins => "plugins",
            ErrorStage::Bootstrap => "bootstrap",
            ErrorStage::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("repository error: {0:#}")]
    Repo(#[source] anyhow::Error),

    #[error("config patch failed: {0:#}")]
    ConfigPatch(#[source] anyhow::Error),

    #[error("missing private key for node ID: {0}")]
    MissingIdentityKey(PeerId),

    #[error("failed to construct host: {0:#}")]
    Host(#[source] anyhow::Error),

    #[error("unable to apply host config: {0:#}")]
    HostConfig(#[source] anyhow::Error),

    #[error("failed to construct routing: {0:#}")]
    Routing(#[source] anyhow::Error),

    #[error("failed to config routing: {0:#}")]
    RoutingConfig(#[source] anyhow::Error),

    #[error("failed to init node: {0}")]
    Init(#[source] Box<NodeError>),

    #[error("discovery setup failed: {0:#}")]
    Discovery(#[source] anyhow::Error),

    #[error("invalid multiaddr `{addr}`: {reason}")]
    Multiaddr { addr: String, reason: String },

    #[error("unsupported listen address `{0}`")]
    UnsupportedAddress(String),

    #[error("failed to listen on `{addr}`: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serve `{addr}`: {source}")]
    Serve {
        addr: String,
        #[source]
        source: Box<NodeError>,
    },

    #[error("plugin loading failed: {0:#}")]
    Plugin(#[source] anyhow::Error),

    #[error("bootstrap failed: {0:#}")]
    Bootstrap(#[source] anyhow::Error),

    #[error("failed to close node: {0:#}")]
    Close(#[source] anyhow::Error),
}

impl NodeError {
    /// The lifecycle stage this error originates from.
    ///
    /// Wrapping variants (`Init`, `Serve`) report the stage of the error they
    /// wrap, except that a bind failure under `Serve` is always `Serving`.
    pub fn stage(&self) -> ErrorStage {
        match self {
            NodeError::InvalidConfig(_) | NodeError::ConfigPatch(_) => ErrorStage::Configuration,
            NodeError::Repo(_) => ErrorStage::Repository,
            NodeError::MissingIdentityKey(_) | NodeError::Host(_) | NodeError::Routing(_) => {
                ErrorStage::Construction
            }
            NodeError::HostConfig(_) => ErrorStage::HostConfiguration,
            NodeError::RoutingConfig(_) => ErrorStage::RoutingConfiguration,
            NodeError::Init(inner) => inner.stage(),
            NodeError::Discovery(_) => ErrorStage::Discovery,
            NodeError::Multiaddr { .. }
            | NodeError::UnsupportedAddress(_)
            | NodeError::Listen { .. }
            | NodeError::Serve { .. } => ErrorStage::Serving,
            NodeError::Plugin(_) => ErrorStage::Plugins,
            NodeError::Bootstrap(_) => ErrorStage::Bootstrap,
            NodeError::Close(_) => ErrorStage::Shutdown,
        }
    }
}
