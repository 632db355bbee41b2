//! Errors surfaced to the embedding application.

use mobile_node::NodeError;
use std::fmt;
use thiserror::Error;

/// Bridge operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStage {
    ConfigCreation,
    RepoInit,
    RepoOpen,
    SockManager,
    NodeStart,
    NodeStop,
    ConfigGetting,
    ConfigSetting,
    NodeListen,
}

impl fmt::Display for BridgeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeStage::ConfigCreation => "config creation",
            BridgeStage::RepoInit => "repo init",
            BridgeStage::RepoOpen => "repo open",
            BridgeStage::SockManager => "socket manager",
            BridgeStage::NodeStart => "node start",
            BridgeStage::NodeStop => "node stop",
            BridgeStage::ConfigGetting => "config getting",
            BridgeStage::ConfigSetting => "config setting",
            BridgeStage::NodeListen => "node listen",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{stage}: {detail}")]
pub struct BridgeError {
    pub stage: BridgeStage,
    pub detail: String,
    #[source]
    pub cause: Option<NodeError>,
}

impl BridgeError {
    pub fn new(stage: BridgeStage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: detail.into(),
            cause: None,
        }
    }

    pub fn with_cause(stage: BridgeStage, detail: impl Into<String>, cause: NodeError) -> Self {
        Self {
            stage,
            detail: detail.into(),
            cause: Some(cause),
        }
    }
}
