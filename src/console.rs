use std::sync::{Arc, Condvar, Mutex, Once, PoisonError};

use crate::error::HostError;
use crate::identity::ServiceIdentity;
use crate::runner::{Runner, RunnerKind};
use crate::service::Callbacks;

/// One-shot stop flag. Once set it stays set.
#[derive(Debug, Default)]
pub struct StopLatch {
    set: Mutex<bool>,
    cond: Condvar,
}

impl StopLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        *set = true;
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the latch is set.
    pub fn wait(&self) {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while !*set {
            set = self.cond.wait(set).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

// ctrlc allows a single process-wide handler, so it forwards to whichever
// latch is currently waiting.
static INTERRUPT_TARGET: Mutex<Option<Arc<StopLatch>>> = Mutex::new(None);
static INSTALL_HANDLER: Once = Once::new();

/// Set the latch that is currently routed, if any.
fn deliver_interrupt() {
    if let Some(latch) = INTERRUPT_TARGET.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
        latch.set();
    }
}

fn install_interrupt_handler() {
    INSTALL_HANDLER.call_once(|| {
        if let Err(e) = ctrlc::set_handler(deliver_interrupt) {
            tracing::warn!(
                error = %e,
                "console: could not install Ctrl-C handler; stop() is the only way out"
            );
        }
    });
}

/// Routes interrupts to one latch for as long as it is alive.
struct InterruptRoute {
    latch: Arc<StopLatch>,
}

impl InterruptRoute {
    fn attach(latch: Arc<StopLatch>) -> Self {
        install_interrupt_handler();
        *INTERRUPT_TARGET.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&latch));
        Self { latch }
    }
}

impl Drop for InterruptRoute {
    fn drop(&mut self) {
        let mut target = INTERRUPT_TARGET.lock().unwrap_or_else(PoisonError::into_inner);
        if target.as_ref().is_some_and(|t| Arc::ptr_eq(t, &self.latch)) {
            *target = None;
        }
    }
}

/// Foreground hosting: start, wait for Ctrl-C or `stop()`, then stop.
#[derive(Debug)]
pub struct ConsoleRunner {
    identity: ServiceIdentity,
    callbacks: Callbacks,
    latch: Arc<StopLatch>,
}

impl ConsoleRunner {
    pub fn new(identity: ServiceIdentity, callbacks: Callbacks) -> Self {
        Self { identity, callbacks, latch: Arc::new(StopLatch::new()) }
    }

    pub fn stop_requested(&self) -> bool {
        self.latch.is_set()
    }
}

impl Runner for ConsoleRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Console
    }

    fn try_run(&self) -> Result<bool, HostError> {
        self.callbacks.start().map_err(HostError::StartupFailure)?;

        let _route = InterruptRoute::attach(Arc::clone(&self.latch));
        tracing::info!(service = %self.identity, "console: started; press Ctrl-C to stop");
        self.latch.wait();

        tracing::info!(service = %self.identity, "console: shutting down");
        // Console mode has taken over regardless of how the stop routine fares.
        match self.callbacks.stop() {
            Ok(()) => tracing::info!(service = %self.identity, "console: stopped"),
            Err(e) => {
                tracing::error!(
                    service = %self.identity,
                    error = %e,
                    "console: stop routine failed"
                )
            }
        }
        Ok(true)
    }

    fn stop(&self) -> Result<(), HostError> {
        self.latch.set();
        Ok(())
    }
}
