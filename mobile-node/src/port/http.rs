//! HTTP serving port - API and gateway over an already bound listener.

use crate::port::node::CoreNode;
use anyhow::Result;
use async_trait::async_trait;
use libp2p::Multiaddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A bound socket handed to the HTTP server.
pub enum ServeSocket {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// A bound socket plus the token that stops serving on it.
pub struct ServeListener {
    pub socket: ServeSocket,
    /// The bound address, with the actual port for TCP.
    pub addr: Multiaddr,
    /// Cancelled when the listener is closed.
    pub shutdown: CancellationToken,
}

/// Handler groups mounted on a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOption {
    /// Redirect `/webui` to the bundled web UI.
    WebUi,
    /// Content paths served from the node.
    Gateway { paths: Vec<String>, writable: bool },
    /// `/api/v0` command endpoints.
    Commands,
    /// Subdomain gateway requests (`<cid>.ipfs.<host>`).
    Hostname,
    /// `/version`.
    Version,
    /// Reject API clients reporting a different version.
    CheckVersion,
}

/// Abstract interface for the HTTP server entry point.
#[async_trait]
pub trait HttpServer: Send + Sync {
    /// Serve until the listener's shutdown token is cancelled.
    async fn serve(
        &self,
        node: Arc<dyn CoreNode>,
        listener: ServeListener,
        options: Vec<ServeOption>,
    ) -> Result<()>;
}
