pub mod application_service;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(test)]
mod test_utils;

pub use domain::*;
pub use error::{ErrorStage, NodeError};
pub use port::*;

pub use application_service::node::{Node, NodeConfig};
pub use application_service::repo::{init_repo, open_repo, repo_is_initialized};
