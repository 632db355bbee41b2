//! Routing option composition.

use crate::error::NodeError;
use crate::port::host::Host;
use crate::port::routing::{Routing, RoutingOption, RoutingParams};
use std::sync::Arc;

/// Hook run once on a freshly constructed routing system.
pub type RoutingConfigFn =
    Arc<dyn Fn(&Arc<dyn Host>, &Arc<dyn Routing>) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct RoutingConfig {
    pub config_fn: Option<RoutingConfigFn>,
}

/// Decorate `base` so that `config`'s hook runs on the routing it builds.
///
/// Hook errors are reported as routing configuration errors; errors from
/// `base` pass through untouched.
pub fn new_routing_config_option(base: RoutingOption, config: Option<RoutingConfig>) -> RoutingOption {
    let Some(hook) = config.and_then(|c| c.config_fn) else {
        return base;
    };

    Arc::new(move |host: Arc<dyn Host>, params: RoutingParams| {
        let routing = base(host.clone(), params)?;
        hook(&host, &routing).map_err(NodeError::RoutingConfig)?;
        Ok(routing)
    })
}
