use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Start or stop routine supplied by the embedding application.
pub type Callback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// The pair of routines every runner drives. Cloning shares the routines.
#[derive(Clone)]
pub struct Callbacks {
    on_start: Callback,
    on_stop: Callback,
}

impl Callbacks {
    pub fn new<S, T>(on_start: S, on_stop: T) -> Self
    where
        S: Fn() -> Result<()> + Send + Sync + 'static,
        T: Fn() -> Result<()> + Send + Sync + 'static,
    {
        Self { on_start: Arc::new(on_start), on_stop: Arc::new(on_stop) }
    }

    pub fn start(&self) -> Result<()> {
        (self.on_start)()
    }

    pub fn stop(&self) -> Result<()> {
        (self.on_stop)()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

/// A hostable service expressed as a type instead of two closures.
///
/// Both methods may be called from threads other than the one that created
/// the service, so state changes go through interior mutability.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
}

impl<S: Service + 'static> From<Arc<S>> for Callbacks {
    fn from(service: Arc<S>) -> Self {
        let stopper = Arc::clone(&service);
        Callbacks::new(move || service.start(), move || stopper.stop())
    }
}
