pub mod config;
pub mod features;
pub mod lifecycle;

pub use config::Config;
pub use features::{NodeFeatures, Platform};
pub use lifecycle::LifecyclePhase;
