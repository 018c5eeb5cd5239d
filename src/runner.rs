use std::fmt;

use crate::error::HostError;

/// Which hosting strategy a runner implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    Native,
    Console,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKind::Native => f.write_str("native"),
            RunnerKind::Console => f.write_str("console"),
        }
    }
}

/// A way of hosting the service that may or may not be available.
pub trait Runner: Send + Sync {
    fn kind(&self) -> RunnerKind;

    /// Take over the calling thread and host the service to completion.
    ///
    /// `Ok(false)` means this strategy is not available here and the next one
    /// should be tried.
    fn try_run(&self) -> Result<bool, HostError>;

    /// Ask the running service to stop. Safe to call from any thread, any
    /// number of times.
    fn stop(&self) -> Result<(), HostError>;
}
