//! Node orchestration: config patches, option composition, plugin loading,
//! the lifecycle manager and its listener registry.

pub mod config_patch;
pub mod environment;
pub mod host_option;
pub mod listeners;
pub mod mobile;
pub mod node;
pub mod plugins;
pub mod repo;
pub mod routing_option;

pub use config_patch::{chain_config_patches, set_mdns_enabled, ConfigPatch, RepoMobile};
pub use host_option::{chain_host_config, new_host_config_option, simple_host_option, HostConfig};
pub use listeners::{ListenerRegistry, ManagedListener};
pub use mobile::{new_node, MobileConfig, MobileNode};
pub use node::{Node, NodeConfig};
pub use plugins::load_plugins;
pub use repo::{init_repo, open_repo, repo_is_initialized};
pub use routing_option::{new_routing_config_option, RoutingConfig};
