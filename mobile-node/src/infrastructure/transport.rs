//! Transport layer configuration for libp2p.
//!
//! Two profiles:
//! - Static: TCP with DNS, Noise and Yamux, optionally behind a relay client
//! - Full: Static plus QUIC when requested
//!
//! A proximity transport, when present, is upgraded like TCP and tried
//! alongside the other transports for `/memory/<code>` addresses.

use super::proximity::ProximityTransport;
use crate::port::platform::DnsResolver;
use futures::future::Either;
use libp2p::{
    core::{muxing::StreamMuxerBox, transport::Boxed, upgrade},
    dns,
    identity::Keypair,
    noise, quic, relay, tcp, yamux, PeerId, Transport,
};
use std::time::Duration;
use tracing::{debug, warn};

const UPGRADE_TIMEOUT: Duration = Duration::from_secs(20);

type DnsTcpTransport = dns::tokio::Transport<tcp::tokio::Transport>;

/// Transport set a host is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProfile {
    /// Fixed TCP stack, no QUIC.
    Static,
    /// TCP plus QUIC when enabled in the settings.
    Full,
}

/// Where the DNS resolver configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsSource {
    /// Supplied by the platform through a [`DnsResolver`].
    Platform,
    /// Read from the operating system.
    System,
    /// The system configuration was unreadable; public resolvers are used.
    Fallback,
}

/// Optional parts of a transport.
#[derive(Default)]
pub struct TransportOptions {
    pub quic: bool,
    pub relay: Option<relay::client::Transport>,
    pub proximity: Option<ProximityTransport>,
    pub dns: Option<DnsResolver>,
}

fn tcp_transport() -> tcp::tokio::Transport {
    tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
}

/// TCP wrapped in DNS resolution, preferring a platform resolver.
pub fn dns_tcp_transport(resolver: Option<&DnsResolver>) -> (DnsTcpTransport, DnsSource) {
    if let Some(resolver) = resolver {
        debug!("Using platform DNS resolver");
        let transport = dns::tokio::Transport::custom(
            tcp_transport(),
            resolver.config.clone(),
            resolver.opts.clone(),
        );
        return (transport, DnsSource::Platform);
    }

    match dns::tokio::Transport::system(tcp_transport()) {
        Ok(transport) => (transport, DnsSource::System),
        Err(e) => {
            warn!("System DNS configuration unavailable, using defaults: {}", e);
            let transport = dns::tokio::Transport::custom(
                tcp_transport(),
                dns::ResolverConfig::cloudflare(),
                dns::ResolverOpts::default(),
            );
            (transport, DnsSource::Fallback)
        }
    }
}

/// Build a transport for `keypair`.
///
/// The relay client's connections are upgraded like TCP.
pub fn build_transport(
    keypair: &Keypair,
    profile: TransportProfile,
    options: TransportOptions,
) -> anyhow::Result<(Boxed<(PeerId, StreamMuxerBox)>, DnsSource)> {
    let (dns_tcp, dns_source) = dns_tcp_transport(options.dns.as_ref());

    let mut transport = match options.relay {
        Some(relay) => relay
            .or_transport(dns_tcp)
            .upgrade(upgrade::Version::V1)
            .authenticate(noise::Config::new(keypair)?)
            .multiplex(yamux::Config::default())
            .timeout(UPGRADE_TIMEOUT)
            .boxed(),
        None => dns_tcp
            .upgrade(upgrade::Version::V1)
            .authenticate(noise::Config::new(keypair)?)
            .multiplex(yamux::Config::default())
            .timeout(UPGRADE_TIMEOUT)
            .boxed(),
    };

    if let Some(proximity) = options.proximity {
        let proximity = proximity
            .upgrade(upgrade::Version::V1)
            .authenticate(noise::Config::new(keypair)?)
            .multiplex(yamux::Config::default())
            .timeout(UPGRADE_TIMEOUT)
            .boxed();
        transport = transport
            .or_transport(proximity)
            .map(|either, _| match either {
                Either::Left(output) => output,
                Either::Right(output) => output,
            })
            .boxed();
    }

    if profile == TransportProfile::Static || !options.quic {
        return Ok((transport, dns_source));
    }

    let quic_transport = quic::tokio::Transport::new(quic::Config::new(keypair));
    let transport = transport
        .or_transport(quic_transport)
        .map(|either, _| match either {
            Either::Left((peer_id, muxer)) => (peer_id, muxer),
            Either::Right((peer_id, muxer)) => (peer_id, StreamMuxerBox::new(muxer)),
        })
        .boxed();

    Ok((transport, dns_source))
}
