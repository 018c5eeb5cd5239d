use std::fmt;

use crate::error::{HostError, IdentityIssue};

/// Longest name the service control manager accepts.
pub const MAX_NAME_LEN: usize = 80;

/// Validated, immutable service name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentity(String);

impl ServiceIdentity {
    pub fn new(name: impl Into<String>) -> Result<Self, HostError> {
        let name = name.into();
        match Self::check(&name) {
            Ok(()) => Ok(Self(name)),
            Err(issue) => Err(HostError::InvalidIdentity { name, issue }),
        }
    }

    fn check(name: &str) -> Result<(), IdentityIssue> {
        if name.is_empty() {
            return Err(IdentityIssue::Empty);
        }
        // Length is counted in characters, not bytes.
        let len = name.chars().count();
        if len > MAX_NAME_LEN {
            return Err(IdentityIssue::TooLong { len });
        }
        if let Some(sep) = name.chars().find(|c| matches!(c, '/' | '\\')) {
            return Err(IdentityIssue::Separator(sep));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
