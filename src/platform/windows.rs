use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState as WinState,
    ServiceStatus as WinStatus, ServiceType,
};
use windows_service::service_control_handler::{
    self, ServiceControlHandlerResult, ServiceStatusHandle,
};
use windows_service::{define_windows_service, service_dispatcher};

use super::{ControlBackend, ControlHandler, ServiceEntry, StatusHandle};
use crate::error::HostError;
use crate::identity::ServiceIdentity;
use crate::status::{ControlCode, ServiceState, ServiceStatus};

// Generate the extern "system" function that the SCM expects.
define_windows_service!(ffi_service_main, service_main);

// The SCM calls a plain function pointer, so the entry travels through here.
static PENDING_ENTRY: Mutex<Option<ServiceEntry>> = Mutex::new(None);

fn service_main(arguments: Vec<OsString>) {
    let entry = PENDING_ENTRY.lock().unwrap_or_else(PoisonError::into_inner).take();
    match entry {
        Some(entry) => entry(arguments),
        None => tracing::error!("scm: service main invoked without a pending entry"),
    }
}

/// Keeps the entry installed for the duration of one dispatch and clears it on
/// every exit path.
struct EntrySlot;

impl EntrySlot {
    fn fill(entry: ServiceEntry) -> Self {
        *PENDING_ENTRY.lock().unwrap_or_else(PoisonError::into_inner) = Some(entry);
        EntrySlot
    }
}

impl Drop for EntrySlot {
    fn drop(&mut self) {
        PENDING_ENTRY.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Service control manager binding via `windows-service`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsBackend;

impl ControlBackend for WindowsBackend {
    fn start_dispatcher(
        &self,
        identity: &ServiceIdentity,
        entry: ServiceEntry,
    ) -> Result<(), HostError> {
        let _slot = EntrySlot::fill(entry);
        service_dispatcher::start(identity.as_str(), ffi_service_main)
            .map_err(|e| HostError::RegistrationFailure(e.to_string()))
    }

    fn register_control_handler(
        &self,
        identity: &ServiceIdentity,
        mut handler: ControlHandler,
    ) -> Result<Arc<dyn StatusHandle>, HostError> {
        let handle = service_control_handler::register(identity.as_str(), move |control| {
            if handler(control_code(&control)) {
                ServiceControlHandlerResult::NoError
            } else {
                ServiceControlHandlerResult::NotImplemented
            }
        })
        .map_err(|e| HostError::RegistrationFailure(e.to_string()))?;

        Ok(Arc::new(WindowsStatusHandle(Mutex::new(handle))))
    }
}

struct WindowsStatusHandle(Mutex<ServiceStatusHandle>);

impl StatusHandle for WindowsStatusHandle {
    fn publish(&self, status: &ServiceStatus) -> Result<(), HostError> {
        let handle = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        handle
            .set_service_status(to_native(status))
            .map_err(|e| HostError::PublishFailure {
                state: status.current_state,
                reason: e.to_string(),
            })
    }
}

fn control_code(control: &ServiceControl) -> ControlCode {
    ControlCode::from_raw(control.raw_service_control_type())
}

fn to_native(status: &ServiceStatus) -> WinStatus {
    let exit_code = if status.service_specific_exit_code != 0 {
        ServiceExitCode::ServiceSpecific(status.service_specific_exit_code)
    } else {
        ServiceExitCode::Win32(status.exit_code)
    };
    WinStatus {
        service_type: ServiceType::from_bits_truncate(status.service_type),
        current_state: match status.current_state {
            ServiceState::StartPending => WinState::StartPending,
            ServiceState::Running => WinState::Running,
            ServiceState::StopPending => WinState::StopPending,
            ServiceState::Stopped => WinState::Stopped,
        },
        controls_accepted: ServiceControlAccept::from_bits_truncate(
            status.controls_accepted.bits(),
        ),
        exit_code,
        checkpoint: status.checkpoint,
        wait_hint: status.wait_hint,
        process_id: None,
    }
}
