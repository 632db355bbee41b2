//! Mobile node construction on top of a pluggable node constructor.

use crate::application_service::config_patch::RepoMobile;
use crate::application_service::host_option::{
    new_host_config_option, simple_host_option, HostConfig,
};
use crate::application_service::routing_option::{new_routing_config_option, RoutingConfig};
use crate::domain::NodeFeatures;
use crate::error::NodeError;
use crate::infrastructure::kad_routing::kad_routing_option;
use crate::infrastructure::libp2p_node::Libp2pNodeConstructor;
use crate::port::host::{Host, HostOption};
use crate::port::http::ServeOption;
use crate::port::node::{BuildConfig, CoreNode, NodeConstructor};
use crate::port::routing::RoutingOption;
use std::sync::Arc;
use tracing::info;

/// Path of the bundled web UI.
pub const WEBUI_PATH: &str = "/ipfs/bafybeibozpulxtpv5nhfa2ue3dcjx23ndh3gwr5vwllk7ptoyfwnfjjr4q";

/// Inputs for [`new_node`]. Unset fields are filled by [`MobileConfig::fill_default`].
#[derive(Clone, Default)]
pub struct MobileConfig {
    pub repo: Option<Arc<RepoMobile>>,
    pub features: NodeFeatures,
    pub host_config: Option<HostConfig>,
    pub routing_config: Option<RoutingConfig>,
    pub host_option: Option<HostOption>,
    pub routing_option: Option<RoutingOption>,
    pub constructor: Option<Arc<dyn NodeConstructor>>,
}

impl MobileConfig {
    /// Fill unset constructors with defaults. A repository is required.
    pub fn fill_default(&mut self) -> Result<(), NodeError> {
        if self.repo.is_none() {
            return Err(NodeError::InvalidConfig("repository is required".to_string()));
        }
        if self.host_option.is_none() {
            self.host_option = Some(simple_host_option());
        }
        if self.routing_option.is_none() {
            self.routing_option = Some(kad_routing_option());
        }
        if self.constructor.is_none() {
            self.constructor = Some(Arc::new(Libp2pNodeConstructor::default()));
        }
        Ok(())
    }
}

/// A constructed node together with its repository.
pub struct MobileNode {
    node: Arc<dyn CoreNode>,
    repo: Arc<RepoMobile>,
}

/// Build a node from `config`, composing host and routing hooks around the
/// configured constructors.
pub async fn new_node(mut config: MobileConfig) -> Result<MobileNode, NodeError> {
    config.fill_default()?;
    let MobileConfig {
        repo: Some(repo),
        features,
        host_config,
        routing_config,
        host_option: Some(host_option),
        routing_option: Some(routing_option),
        constructor: Some(constructor),
    } = config
    else {
        return Err(NodeError::InvalidConfig(
            "incomplete mobile config".to_string(),
        ));
    };

    let build = BuildConfig {
        repo: repo.repo().clone(),
        host: new_host_config_option(host_option, host_config),
        routing: new_routing_config_option(routing_option, routing_config),
        features,
    };

    let node = constructor
        .construct(build)
        .await
        .map_err(|e| NodeError::Init(Box::new(e)))?;
    info!("Node {} constructed", node.peer_id());

    Ok(MobileNode { node, repo })
}

impl MobileNode {
    pub fn node(&self) -> &Arc<dyn CoreNode> {
        &self.node
    }

    pub fn repo(&self) -> &Arc<RepoMobile> {
        &self.repo
    }

    pub fn peer_host(&self) -> Arc<dyn Host> {
        self.node.peer_host()
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.node.close().await
    }
}

/// Handlers mounted on an API listener.
pub fn core_http_options(writable: bool) -> Vec<ServeOption> {
    vec![
        ServeOption::WebUi,
        ServeOption::Gateway {
            paths: vec![WEBUI_PATH.to_string()],
            writable,
        },
        ServeOption::Commands,
    ]
}

/// Handlers mounted on a gateway listener.
pub fn gateway_options(writable: bool) -> Vec<ServeOption> {
    vec![
        ServeOption::Hostname,
        ServeOption::Gateway {
            paths: vec!["/ipfs".to_string(), "/ipns".to_string()],
            writable,
        },
        ServeOption::Version,
        ServeOption::CheckVersion,
        ServeOption::Commands,
    ]
}
