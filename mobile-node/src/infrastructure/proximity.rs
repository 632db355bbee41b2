//! libp2p transport over a platform radio driver.
//!
//! The driver only moves byte chunks between peers in range. Each remote
//! peer becomes one [`ProximityConn`] byte stream, and the host runs the
//! usual Noise and Yamux upgrades on top of it. The driver's protocol has no
//! multiaddr code of its own, so radio addresses are written
//! `/memory/<protocol code>/p2p/<peer>`.

use crate::port::platform::{ProximityDriver, ProximityEvents};
use futures::future::{self, Ready};
use futures::{AsyncRead, AsyncWrite};
use libp2p::core::transport::{DialOpts, ListenerId, TransportError, TransportEvent};
use libp2p::core::Transport;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use tokio::sync::mpsc;
use tracing::debug;

/// Address the radio transport listens on.
pub fn proximity_listen_addr(code: u32) -> Multiaddr {
    Multiaddr::empty().with(Protocol::Memory(u64::from(code)))
}

/// Address of `peer` over the radio transport.
pub fn proximity_peer_addr(code: u32, peer: PeerId) -> Multiaddr {
    proximity_listen_addr(code).with(Protocol::P2p(peer))
}

struct Links {
    next_id: u64,
    open: HashMap<PeerId, (u64, mpsc::UnboundedSender<Vec<u8>>)>,
    listener: Option<ListenerId>,
}

struct Shared {
    driver: Arc<dyn ProximityDriver>,
    links: Mutex<Links>,
    incoming: mpsc::UnboundedSender<(PeerId, ProximityConn)>,
    found: mpsc::UnboundedSender<PeerId>,
}

impl Shared {
    fn links(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace any link to `remote` with a fresh one. The previous stream,
    /// if any, sees end of file.
    fn open_link(
        self: &Arc<Self>,
        links: &mut Links,
        remote: PeerId,
    ) -> (ProximityConn, mpsc::UnboundedSender<Vec<u8>>) {
        let id = links.next_id;
        links.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        links.open.insert(remote, (id, tx.clone()));
        let conn = ProximityConn {
            remote,
            id,
            shared: self.clone(),
            inbound: rx,
            chunk: Vec::new(),
            offset: 0,
            closed: false,
        };
        (conn, tx)
    }

    /// Forget the link if it is still the current one for `remote`.
    fn release(&self, remote: &PeerId, id: u64) -> bool {
        let mut links = self.links();
        let current = links.open.get(remote).map(|(current, _)| *current);
        if current != Some(id) {
            return false;
        }
        links.open.remove(remote);
        true
    }
}

/// Driver callbacks feeding a [`ProximityTransport`].
#[derive(Clone)]
pub struct ProximityInbound {
    shared: Arc<Shared>,
}

impl ProximityEvents for ProximityInbound {
    fn handle_found_peer(&self, remote: PeerId) -> bool {
        if self.shared.links().listener.is_none() {
            debug!("Ignoring radio peer {}: transport not listening", remote);
            return false;
        }
        self.shared.found.send(remote).is_ok()
    }

    fn handle_lost_peer(&self, remote: PeerId) {
        if self.shared.links().open.remove(&remote).is_some() {
            debug!("Radio link to {} lost", remote);
        }
    }

    fn receive_from_peer(&self, remote: PeerId, mut payload: Vec<u8>) {
        let mut links = self.shared.links();
        if let Some((_, tx)) = links.open.get(&remote) {
            match tx.send(payload) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => payload = returned,
            }
            links.open.remove(&remote);
        }

        if links.listener.is_none() {
            debug!("Dropping {} bytes from {}: not listening", payload.len(), remote);
            return;
        }
        let (conn, tx) = self.shared.open_link(&mut links, remote);
        drop(links);
        let _ = tx.send(payload);
        if self.shared.incoming.send((remote, conn)).is_err() {
            debug!("Radio transport dropped, refusing link from {}", remote);
        }
    }
}

type ConnFuture = Ready<Result<ProximityConn, io::Error>>;

/// libp2p transport dialing and accepting peers through a [`ProximityDriver`].
pub struct ProximityTransport {
    shared: Arc<Shared>,
    code: u32,
    incoming: mpsc::UnboundedReceiver<(PeerId, ProximityConn)>,
    events: VecDeque<TransportEvent<ConnFuture, io::Error>>,
    waker: Option<Waker>,
}

impl ProximityTransport {
    /// Build the transport, the callbacks to hand to the driver, and a
    /// stream of peers the driver reported in range.
    pub fn new(
        driver: Arc<dyn ProximityDriver>,
    ) -> (Self, ProximityInbound, mpsc::UnboundedReceiver<PeerId>) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (found_tx, found_rx) = mpsc::unbounded_channel();
        let code = driver.protocol_code();
        let shared = Arc::new(Shared {
            driver,
            links: Mutex::new(Links {
                next_id: 0,
                open: HashMap::new(),
                listener: None,
            }),
            incoming: incoming_tx,
            found: found_tx,
        });
        let transport = Self {
            shared: shared.clone(),
            code,
            incoming: incoming_rx,
            events: VecDeque::new(),
            waker: None,
        };
        (transport, ProximityInbound { shared }, found_rx)
    }

    fn remote_peer(&self, addr: &Multiaddr) -> Option<PeerId> {
        let mut parts = addr.iter();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Protocol::Memory(code)), Some(Protocol::P2p(peer)), None)
                if code == u64::from(self.code) =>
            {
                Some(peer)
            }
            _ => None,
        }
    }

    fn push_event(&mut self, event: TransportEvent<ConnFuture, io::Error>) {
        self.events.push_back(event);
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

impl Transport for ProximityTransport {
    type Output = ProximityConn;
    type Error = io::Error;
    type ListenerUpgrade = ConnFuture;
    type Dial = ConnFuture;

    fn listen_on(
        &mut self,
        id: ListenerId,
        addr: Multiaddr,
    ) -> Result<(), TransportError<Self::Error>> {
        if addr != proximity_listen_addr(self.code) {
            return Err(TransportError::MultiaddrNotSupported(addr));
        }
        {
            let mut links = self.shared.links();
            if links.listener.is_some() {
                return Err(TransportError::Other(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "radio transport is already listening",
                )));
            }
            links.listener = Some(id);
        }
        self.push_event(TransportEvent::NewAddress {
            listener_id: id,
            listen_addr: addr,
        });
        Ok(())
    }

    fn remove_listener(&mut self, id: ListenerId) -> bool {
        {
            let mut links = self.shared.links();
            if links.listener != Some(id) {
                return false;
            }
            links.listener = None;
        }
        self.push_event(TransportEvent::ListenerClosed {
            listener_id: id,
            reason: Ok(()),
        });
        true
    }

    fn dial(
        &mut self,
        addr: Multiaddr,
        _opts: DialOpts,
    ) -> Result<Self::Dial, TransportError<Self::Error>> {
        let Some(remote) = self.remote_peer(&addr) else {
            return Err(TransportError::MultiaddrNotSupported(addr));
        };
        if !self.shared.driver.dial_peer(&remote) {
            return Err(TransportError::Other(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!(
                    "{} not reachable over {}",
                    remote,
                    self.shared.driver.protocol_name()
                ),
            )));
        }
        let mut links = self.shared.links();
        let (conn, _) = self.shared.open_link(&mut links, remote);
        Ok(future::ready(Ok(conn)))
    }

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<TransportEvent<Self::ListenerUpgrade, Self::Error>> {
        let this = self.get_mut();
        if let Some(event) = this.events.pop_front() {
            return Poll::Ready(event);
        }

        let listener = this.shared.links().listener;
        if let Some(listener_id) = listener {
            if let Poll::Ready(Some((remote, conn))) = this.incoming.poll_recv(cx) {
                return Poll::Ready(TransportEvent::Incoming {
                    listener_id,
                    upgrade: future::ready(Ok(conn)),
                    local_addr: proximity_listen_addr(this.code),
                    send_back_addr: proximity_peer_addr(this.code, remote),
                });
            }
        }
        this.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Byte stream over one radio link.
pub struct ProximityConn {
    remote: PeerId,
    id: u64,
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    chunk: Vec<u8>,
    offset: usize,
    closed: bool,
}

impl ProximityConn {
    pub fn remote(&self) -> PeerId {
        self.remote
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.shared.release(&self.remote, self.id) {
            self.shared.driver.close_conn_with_peer(&self.remote);
        }
    }
}

impl AsyncRead for ProximityConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        while this.offset >= this.chunk.len() {
            match this.inbound.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.chunk = chunk;
                    this.offset = 0;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(0)),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = buf.len().min(this.chunk.len() - this.offset);
        buf[..n].copy_from_slice(&this.chunk[this.offset..this.offset + n]);
        this.offset += n;
        Poll::Ready(Ok(n))
    }
}

impl AsyncWrite for ProximityConn {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        if self.shared.driver.send_to_peer(&self.remote, buf) {
            Poll::Ready(Ok(buf.len()))
        } else {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("radio link to {} is down", self.remote),
            )))
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().shutdown();
        Poll::Ready(Ok(()))
    }
}

impl Drop for ProximityConn {
    fn drop(&mut self) {
        self.shutdown();
    }
}
