//! Service status record and the numeric values of the service-control ABI.
//!
//! The record is a plain value; platform backends translate it at the call
//! boundary and never keep native copies around.

use std::ops::BitOr;
use std::time::Duration;

/// `SERVICE_WIN32_OWN_PROCESS`
pub const SERVICE_WIN32_OWN_PROCESS: u32 = 0x0000_0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    StartPending,
    Running,
    StopPending,
    Stopped,
}

/// Bitmask of controls the service is willing to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptedControls(u32);

impl AcceptedControls {
    pub const STOP: Self = Self(0x1);
    pub const SHUTDOWN: Self = Self(0x4);

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for AcceptedControls {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Control codes delivered by the service control manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    Stop,
    Interrogate,
    Shutdown,
    Other(u32),
}

impl ControlCode {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x1 => ControlCode::Stop,
            0x4 => ControlCode::Interrogate,
            0x5 => ControlCode::Shutdown,
            other => ControlCode::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    pub service_type: u32,
    pub current_state: ServiceState,
    pub controls_accepted: AcceptedControls,
    pub exit_code: u32,
    pub service_specific_exit_code: u32,
    pub checkpoint: u32,
    pub wait_hint: Duration,
}

impl ServiceStatus {
    /// Status a freshly constructed native runner starts from.
    pub fn initial(wait_hint: Duration) -> Self {
        Self {
            service_type: SERVICE_WIN32_OWN_PROCESS,
            current_state: ServiceState::StartPending,
            controls_accepted: AcceptedControls::STOP | AcceptedControls::SHUTDOWN,
            exit_code: 0,
            service_specific_exit_code: 0,
            checkpoint: 0,
            wait_hint,
        }
    }
}
