//! Host a long-running service either under the operating system's service
//! control manager or, when that is not available, as a console process that
//! stops on Ctrl-C.

pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod host;
pub mod identity;
pub mod native;
pub mod platform;
pub mod runner;
pub mod service;
pub mod status;
pub mod telemetry;

pub use config::{load_config, load_config_from, HostConfig, StrategyPreference};
pub use console::{ConsoleRunner, StopLatch};
pub use error::{Error, HostError, IdentityIssue, Result};
pub use host::ServiceHost;
pub use identity::ServiceIdentity;
pub use native::PlatformServiceRunner;
pub use runner::{Runner, RunnerKind};
pub use service::{Callbacks, Service};
pub use status::{AcceptedControls, ControlCode, ServiceState, ServiceStatus};
pub use telemetry::init_telemetry;
