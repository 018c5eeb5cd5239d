use crate::status::ServiceState;

/// Error type produced by caller-supplied start/stop routines.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Why a service name was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityIssue {
    #[error("name is empty")]
    Empty,
    #[error("name is {len} characters long, limit is {max}", max = crate::identity::MAX_NAME_LEN)]
    TooLong { len: usize },
    #[error("name contains the path separator {0:?}")]
    Separator(char),
}

/// Failures of the hosting layer itself.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("invalid service name {name:?}: {issue}")]
    InvalidIdentity { name: String, issue: IdentityIssue },

    /// The process could not attach to the service control manager.
    #[error("could not attach to the service control manager: {0}")]
    RegistrationFailure(String),

    #[error("start routine failed: {0}")]
    StartupFailure(#[source] Error),

    #[error("stop routine failed: {0}")]
    StopFailure(#[source] Error),

    #[error("could not publish status {state:?}: {reason}")]
    PublishFailure { state: ServiceState, reason: String },
}

impl HostError {
    pub fn is_invalid_identity(&self) -> bool {
        matches!(self, HostError::InvalidIdentity { .. })
    }
}
