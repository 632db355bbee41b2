//! Host option composition.
//!
//! Wraps a base host constructor so that extra options are appended and a
//! post-construction hook runs on the resulting host, without changing the
//! constructor's signature.

use crate::error::NodeError;
use crate::infrastructure::libp2p_host::{Libp2pHost, TransportProfile};
use crate::port::host::{Host, HostOption, HostSetting, HostSettings, Peerstore};
use libp2p::PeerId;
use std::sync::Arc;
use tracing::warn;

/// Hook run once on a freshly constructed host.
pub type HostConfigFn = Arc<dyn Fn(&Arc<dyn Host>) -> anyhow::Result<()> + Send + Sync>;

/// Extra options plus an optional hook for host construction.
#[derive(Clone, Default)]
pub struct HostConfig {
    pub config_fn: Option<HostConfigFn>,
    pub options: Vec<HostSetting>,
}

/// Compose hooks so they run in order, stopping at the first error.
pub fn chain_host_config(hooks: Vec<Option<HostConfigFn>>) -> HostConfigFn {
    let hooks: Vec<HostConfigFn> = hooks.into_iter().flatten().collect();
    Arc::new(move |host: &Arc<dyn Host>| {
        for hook in &hooks {
            hook(host)?;
        }
        Ok(())
    })
}

/// Decorate `base` with `config`.
///
/// The config's options are appended after the caller's. A hook failure
/// closes the host and is reported as a host configuration error; errors
/// from `base` pass through untouched.
pub fn new_host_config_option(base: HostOption, config: Option<HostConfig>) -> HostOption {
    let Some(config) = config else {
        return base;
    };

    Arc::new(move |id: PeerId, peerstore: Arc<Peerstore>, mut options: Vec<HostSetting>| {
        options.extend(config.options.iter().cloned());
        let host = base(id, peerstore, options)?;

        if let Some(hook) = &config.config_fn {
            if let Err(e) = hook(&host) {
                if let Err(close_err) = host.close() {
                    warn!("Failed to close host {} after hook error: {}", id, close_err);
                }
                return Err(NodeError::HostConfig(e));
            }
        }
        Ok(host)
    })
}

/// Minimal host constructor for mobile environments.
///
/// Uses the identity key from the peer store, never listens passively,
/// treats the network as private (no NAT probing) and builds a fixed
/// TCP/Noise/Yamux stack without consulting the rest of the pipeline.
/// Caller options are applied last.
pub fn simple_host_option() -> HostOption {
    Arc::new(|id: PeerId, peerstore: Arc<Peerstore>, options: Vec<HostSetting>| {
        let key = peerstore
            .private_key(&id)
            .ok_or(NodeError::MissingIdentityKey(id))?;

        let mut settings = vec![
            HostSetting::Identity(key),
            HostSetting::NoListenAddrs,
            HostSetting::EnableRelay,
            HostSetting::ForceReachabilityPrivate,
        ];
        settings.extend(options);

        let host = Libp2pHost::spawn(
            peerstore,
            HostSettings::resolve(&settings),
            TransportProfile::Static,
        )?;
        Ok(Arc::new(host) as Arc<dyn Host>)
    })
}
