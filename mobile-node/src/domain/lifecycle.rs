//! Node lifecycle phases.

use std::fmt;

/// Phases a node passes through between `new` and `close`.
///
/// `Closed` is terminal and is reached from any other phase when
/// construction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Unstarted,
    Constructing,
    Bootstrapping,
    Serving,
    Closing,
    Closed,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Unstarted => "unstarted",
            LifecyclePhase::Constructing => "constructing",
            LifecyclePhase::Bootstrapping => "bootstrapping",
            LifecyclePhase::Serving => "serving",
            LifecyclePhase::Closing => "closing",
            LifecyclePhase::Closed => "closed",
        };
        f.write_str(name)
    }
}
