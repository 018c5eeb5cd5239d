//! Boundary to the operating system's service-control subsystem.

use std::ffi::OsString;
use std::sync::Arc;

use crate::error::HostError;
use crate::identity::ServiceIdentity;
use crate::status::{ControlCode, ServiceStatus};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::WindowsBackend;

/// Main entry run by the dispatcher on its own thread.
pub type ServiceEntry = Box<dyn FnOnce(Vec<OsString>) + Send>;

/// Control handler invoked by the OS. Returns `false` for codes it does not
/// implement. Must return promptly.
pub type ControlHandler = Box<dyn FnMut(ControlCode) -> bool + Send>;

/// Publishes status for one registered service.
pub trait StatusHandle: Send + Sync {
    fn publish(&self, status: &ServiceStatus) -> Result<(), HostError>;
}

pub trait ControlBackend: Send + Sync {
    /// Hand the calling thread to the dispatch loop. Returns once the service
    /// has stopped, or fails with `RegistrationFailure` when the process is not
    /// running under a service control manager.
    fn start_dispatcher(
        &self,
        identity: &ServiceIdentity,
        entry: ServiceEntry,
    ) -> Result<(), HostError>;

    fn register_control_handler(
        &self,
        identity: &ServiceIdentity,
        handler: ControlHandler,
    ) -> Result<Arc<dyn StatusHandle>, HostError>;
}

/// Backend for platforms without a service control manager. Every attempt
/// fails with `RegistrationFailure`, which sends the host to console mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

impl ControlBackend for Unsupported {
    fn start_dispatcher(
        &self,
        _identity: &ServiceIdentity,
        _entry: ServiceEntry,
    ) -> Result<(), HostError> {
        Err(HostError::RegistrationFailure("no service control manager on this platform".into()))
    }

    fn register_control_handler(
        &self,
        _identity: &ServiceIdentity,
        _handler: ControlHandler,
    ) -> Result<Arc<dyn StatusHandle>, HostError> {
        Err(HostError::RegistrationFailure("no service control manager on this platform".into()))
    }
}

/// The backend for the platform this binary was built for.
pub fn default_backend() -> Arc<dyn ControlBackend> {
    #[cfg(windows)]
    {
        Arc::new(WindowsBackend)
    }
    #[cfg(not(windows))]
    {
        Arc::new(Unsupported)
    }
}
