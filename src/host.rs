use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{HostConfig, StrategyPreference};
use crate::console::ConsoleRunner;
use crate::error::{HostError, Result};
use crate::identity::ServiceIdentity;
use crate::native::PlatformServiceRunner;
use crate::platform::{self, ControlBackend};
use crate::runner::{Runner, RunnerKind};
use crate::service::{Callbacks, Service};

/// Hosts one service with the first strategy that is available, native
/// service control first and the console second.
///
/// Dropping the host stops whichever strategy is active.
pub struct ServiceHost {
    identity: ServiceIdentity,
    callbacks: Callbacks,
    backend: Arc<dyn ControlBackend>,
    config: HostConfig,
    state: Mutex<HostState>,
}

#[derive(Default)]
struct HostState {
    active: Option<Arc<dyn Runner>>,
    stop_requested: bool,
    disposed: bool,
}

impl ServiceHost {
    pub fn new<S, T>(name: &str, on_start: S, on_stop: T) -> std::result::Result<Self, HostError>
    where
        S: Fn() -> Result<()> + Send + Sync + 'static,
        T: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let identity = ServiceIdentity::new(name)?;
        Ok(Self::with_callbacks(identity, Callbacks::new(on_start, on_stop)))
    }

    /// Host a [`Service`], named after `Service::name`.
    pub fn for_service<S: Service + 'static>(
        service: Arc<S>,
    ) -> std::result::Result<Self, HostError> {
        let identity = ServiceIdentity::new(service.name())?;
        Ok(Self::with_callbacks(identity, Callbacks::from(service)))
    }

    pub fn with_callbacks(identity: ServiceIdentity, callbacks: Callbacks) -> Self {
        Self {
            identity,
            callbacks,
            backend: platform::default_backend(),
            config: HostConfig::default(),
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn ControlBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runners(&self) -> Vec<Arc<dyn Runner>> {
        let native = || -> Arc<dyn Runner> {
            Arc::new(PlatformServiceRunner::new(
                self.identity.clone(),
                self.callbacks.clone(),
                Arc::clone(&self.backend),
                self.config.pending_wait_hint(),
            ))
        };
        let console = || -> Arc<dyn Runner> {
            Arc::new(ConsoleRunner::new(self.identity.clone(), self.callbacks.clone()))
        };

        match self.config.strategy {
            StrategyPreference::Auto => vec![native(), console()],
            StrategyPreference::Native => vec![native()],
            StrategyPreference::Console => vec![console()],
        }
    }

    /// Host the service until it stops. Returns the strategy that took over,
    /// or `None` if none did.
    pub fn run(&self) -> Option<RunnerKind> {
        for runner in self.runners() {
            {
                let mut state = self.state();
                if state.stop_requested {
                    tracing::info!(
                        service = %self.identity,
                        "host: stop already requested; not starting"
                    );
                    return None;
                }
                state.active = Some(Arc::clone(&runner));
            }

            let kind = runner.kind();
            match runner.try_run() {
                Ok(true) => {
                    tracing::info!(
                        service = %self.identity,
                        strategy = %kind,
                        "host: hosting finished"
                    );
                    return Some(kind);
                }
                Ok(false) => {
                    tracing::debug!(
                        service = %self.identity,
                        strategy = %kind,
                        "host: strategy unavailable"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        service = %self.identity,
                        strategy = %kind,
                        error = %e,
                        "host: strategy failed"
                    );
                }
            }
        }

        self.state().active = None;
        tracing::warn!(service = %self.identity, "host: no strategy took over");
        None
    }

    /// Ask the active strategy to stop. Also prevents `run` from starting any
    /// strategy it has not started yet.
    pub fn stop(&self) -> std::result::Result<(), HostError> {
        let active = {
            let mut state = self.state();
            state.stop_requested = true;
            state.active.clone()
        };
        match active {
            Some(runner) => runner.stop(),
            None => Ok(()),
        }
    }

    /// Stop the active strategy, ignoring any failure. Only the first call
    /// has an effect.
    pub fn dispose(&self) {
        if std::mem::replace(&mut self.state().disposed, true) {
            return;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| self.stop())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    service = %self.identity,
                    error = %e,
                    "host: stop during dispose failed"
                )
            }
            Err(_) => {
                tracing::warn!(service = %self.identity, "host: stop during dispose panicked")
            }
        }
    }
}

impl Drop for ServiceHost {
    fn drop(&mut self) {
        self.dispose();
    }
}
