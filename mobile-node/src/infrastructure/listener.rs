//! Binding serve listeners from multiaddrs.
//!
//! Supported forms are `/ip4/<ip>/tcp/<port>`, `/ip6/<ip>/tcp/<port>` and,
//! on Unix, `/unix/<path>`.

use crate::application_service::listeners::ManagedListener;
use crate::error::NodeError;
use crate::port::http::{ServeListener, ServeSocket};
use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registry handle for a bound listener. Closing it stops the server using
/// the socket and removes a Unix socket file.
pub struct RegisteredListener {
    addr: Multiaddr,
    shutdown: CancellationToken,
    socket_path: Option<PathBuf>,
}

impl ManagedListener for RegisteredListener {
    fn addr(&self) -> &Multiaddr {
        &self.addr
    }

    fn close(&self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        if let Some(path) = &self.socket_path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!("Closed listener {}", self.addr);
        Ok(())
    }
}

enum Target {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
}

fn target(addr: &Multiaddr) -> Result<Target, NodeError> {
    let unsupported = || NodeError::UnsupportedAddress(addr.to_string());
    let mut protocols = addr.iter();

    let target = match protocols.next() {
        Some(Protocol::Ip4(ip)) => match protocols.next() {
            Some(Protocol::Tcp(port)) => Target::Tcp(SocketAddr::new(IpAddr::V4(ip), port)),
            _ => return Err(unsupported()),
        },
        Some(Protocol::Ip6(ip)) => match protocols.next() {
            Some(Protocol::Tcp(port)) => Target::Tcp(SocketAddr::new(IpAddr::V6(ip), port)),
            _ => return Err(unsupported()),
        },
        #[cfg(unix)]
        Some(Protocol::Unix(path)) => {
            let path = if path.starts_with('/') {
                PathBuf::from(path.to_string())
            } else {
                PathBuf::from(format!("/{}", path))
            };
            Target::Unix(path)
        }
        _ => return Err(unsupported()),
    };

    if protocols.next().is_some() {
        return Err(unsupported());
    }
    Ok(target)
}

/// Bind `addr`. The returned [`ServeListener`] carries the bound address,
/// with the actual port when port 0 was requested.
pub async fn bind(addr: &Multiaddr) -> Result<(ServeListener, RegisteredListener), NodeError> {
    let listen_err = |source: std::io::Error| NodeError::Listen {
        addr: addr.to_string(),
        source,
    };
    let shutdown = CancellationToken::new();

    let (socket, bound, socket_path) = match target(addr)? {
        Target::Tcp(socket_addr) => {
            let listener = tokio::net::TcpListener::bind(socket_addr)
                .await
                .map_err(listen_err)?;
            let local = listener.local_addr().map_err(listen_err)?;
            let bound = Multiaddr::empty()
                .with(Protocol::from(local.ip()))
                .with(Protocol::Tcp(local.port()));
            (ServeSocket::Tcp(listener), bound, None)
        }
        #[cfg(unix)]
        Target::Unix(path) => {
            remove_stale_socket(&path).map_err(listen_err)?;
            let listener = tokio::net::UnixListener::bind(&path).map_err(listen_err)?;
            (ServeSocket::Unix(listener), addr.clone(), Some(path))
        }
    };

    debug!("Bound listener {}", bound);
    Ok((
        ServeListener {
            socket,
            addr: bound.clone(),
            shutdown: shutdown.clone(),
        },
        RegisteredListener {
            addr: bound,
            shutdown,
            socket_path,
        },
    ))
}

/// A socket file left by a previous process blocks binding; regular files
/// are left alone.
#[cfg(unix)]
fn remove_stale_socket(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
