//! Network behaviour composed into every host.

use libp2p::{
    gossipsub, identify, identity::Keypair, kad, ping, relay, swarm::behaviour::toggle::Toggle,
    swarm::NetworkBehaviour, PeerId,
};
use std::time::Duration;

/// Protocol string announced through identify.
pub const IDENTIFY_PROTOCOL: &str = "/ipfs/id/1.0.0";

/// Agent version announced through identify and the HTTP API.
pub const AGENT_VERSION: &str = concat!("mobile-node/", env!("CARGO_PKG_VERSION"));

/// Options for [`HostBehaviour::new`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BehaviourConfig {
    /// Enable gossipsub.
    pub pubsub: bool,
    /// Start the DHT in client mode.
    pub dht_client: bool,
}

#[derive(NetworkBehaviour)]
pub struct HostBehaviour {
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub gossipsub: Toggle<gossipsub::Behaviour>,
    pub relay_client: Toggle<relay::client::Behaviour>,
}

impl HostBehaviour {
    pub fn new(
        keypair: &Keypair,
        relay_client: Option<relay::client::Behaviour>,
        config: BehaviourConfig,
    ) -> anyhow::Result<Self> {
        let peer_id = PeerId::from(keypair.public());

        let identify = identify::Behaviour::new(
            identify::Config::new(IDENTIFY_PROTOCOL.to_string(), keypair.public())
                .with_agent_version(AGENT_VERSION.to_string()),
        );

        let store = kad::store::MemoryStore::new(peer_id);
        let mut kademlia =
            kad::Behaviour::with_config(peer_id, store, kad::Config::new(kad::PROTOCOL_NAME));
        if config.dht_client {
            kademlia.set_mode(Some(kad::Mode::Client));
        }

        let gossipsub = if config.pubsub {
            let gossip_config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(1))
                .validation_mode(gossipsub::ValidationMode::Strict)
                .build()
                .map_err(|e| anyhow::anyhow!("Invalid gossipsub config: {}", e))?;
            let behaviour = gossipsub::Behaviour::new(
                gossipsub::MessageAuthenticity::Signed(keypair.clone()),
                gossip_config,
            )
            .map_err(|e| anyhow::anyhow!("Failed to create gossipsub: {}", e))?;
            Some(behaviour)
        } else {
            None
        };

        Ok(Self {
            identify,
            ping: ping::Behaviour::new(ping::Config::new()),
            kademlia,
            gossipsub: Toggle::from(gossipsub),
            relay_client: Toggle::from(relay_client),
        })
    }
}
