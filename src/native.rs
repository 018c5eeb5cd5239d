//! Hosting under the operating system's service control manager.
//!
//! The OS drives three threads through this runner: the dispatcher thread
//! that runs the main entry, the control thread that delivers control codes
//! and must not be held up, and a worker spawned here for the stop routine.

use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::HostError;
use crate::identity::ServiceIdentity;
use crate::platform::{ControlBackend, ControlHandler, ServiceEntry, StatusHandle};
use crate::runner::{Runner, RunnerKind};
use crate::service::Callbacks;
use crate::status::{ControlCode, ServiceState, ServiceStatus};

pub struct PlatformServiceRunner {
    shared: Arc<Shared>,
}

struct Shared {
    identity: ServiceIdentity,
    callbacks: Callbacks,
    backend: Arc<dyn ControlBackend>,
    pending_wait_hint: Duration,
    record: Mutex<Record>,
    // Held for a whole stop sequence so only one is ever in flight.
    stop_gate: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Record {
    status: ServiceStatus,
    handle: Option<Arc<dyn StatusHandle>>,
    /// Status captured by a stop control whose sequence has not run yet.
    /// Whoever takes it runs that stop; it is the rollback target.
    pending_stop: Option<ServiceStatus>,
}

/// Who asked for a stop sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopOrigin {
    /// The worker spawned for a stop or shutdown control.
    Control,
    /// A direct call to `Runner::stop`.
    Direct,
}

impl Record {
    fn new(pending_wait_hint: Duration) -> Self {
        Self {
            status: ServiceStatus::initial(pending_wait_hint),
            handle: None,
            pending_stop: None,
        }
    }

    fn enter(&mut self, state: ServiceState, pending_wait_hint: Duration) {
        self.status.current_state = state;
        self.status.checkpoint = 0;
        self.status.wait_hint = match state {
            ServiceState::StartPending | ServiceState::StopPending => pending_wait_hint,
            ServiceState::Running | ServiceState::Stopped => Duration::ZERO,
        };
    }

    fn publish(&self) -> Result<(), HostError> {
        match &self.handle {
            Some(handle) => handle.publish(&self.status),
            None => Err(HostError::PublishFailure {
                state: self.status.current_state,
                reason: "no control handler registered".into(),
            }),
        }
    }

    /// Put `before` back and tell the OS.
    fn restore(&mut self, before: ServiceStatus, identity: &ServiceIdentity) {
        self.status = before;
        if let Err(e) = self.publish() {
            tracing::warn!(service = %identity, error = %e, "native: could not restore status");
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PlatformServiceRunner {
    pub fn new(
        identity: ServiceIdentity,
        callbacks: Callbacks,
        backend: Arc<dyn ControlBackend>,
        pending_wait_hint: Duration,
    ) -> Self {
        let shared = Shared {
            identity,
            callbacks,
            backend,
            pending_wait_hint,
            record: Mutex::new(Record::new(pending_wait_hint)),
            stop_gate: Mutex::new(()),
            worker: Mutex::new(None),
        };
        Self { shared: Arc::new(shared) }
    }

    /// Snapshot of the last status this runner recorded.
    pub fn status(&self) -> ServiceStatus {
        lock(&self.shared.record).status
    }

    /// Wait for a stop worker spawned by a control code, if any.
    pub(crate) fn join_stop_worker(&self) {
        let worker = lock(&self.shared.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!(service = %self.shared.identity, "native: stop worker panicked");
            }
        }
    }
}

impl Runner for PlatformServiceRunner {
    fn kind(&self) -> RunnerKind {
        RunnerKind::Native
    }

    fn try_run(&self) -> Result<bool, HostError> {
        let shared = Arc::clone(&self.shared);
        let entry: ServiceEntry = Box::new(move |arguments| shared.service_main(arguments));

        match self.shared.backend.start_dispatcher(&self.shared.identity, entry) {
            Ok(()) => {
                self.join_stop_worker();
                tracing::info!(service = %self.shared.identity, "native: dispatcher returned");
                Ok(true)
            }
            Err(e) => {
                tracing::debug!(
                    service = %self.shared.identity,
                    error = %e,
                    "native: not available"
                );
                Ok(false)
            }
        }
    }

    fn stop(&self) -> Result<(), HostError> {
        self.shared.stop_sequence(StopOrigin::Direct)
    }
}

impl Shared {
    fn set_state(&self, state: ServiceState) -> Result<(), HostError> {
        let mut record = lock(&self.record);
        record.enter(state, self.pending_wait_hint);
        record.publish()
    }

    fn service_main(self: &Arc<Self>, arguments: Vec<OsString>) {
        tracing::debug!(service = %self.identity, ?arguments, "native: service main entered");

        let weak = Arc::downgrade(self);
        let handler: ControlHandler = Box::new(move |code| match weak.upgrade() {
            Some(shared) => shared.on_control(code),
            None => false,
        });
        let handle = match self.backend.register_control_handler(&self.identity, handler) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    service = %self.identity,
                    error = %e,
                    "native: control handler registration failed"
                );
                return;
            }
        };

        {
            let mut record = lock(&self.record);
            record.handle = Some(handle);
            record.enter(ServiceState::StartPending, self.pending_wait_hint);
            if let Err(e) = record.publish() {
                tracing::error!(
                    service = %self.identity,
                    error = %e,
                    "native: could not report start pending"
                );
                return;
            }
        }

        if let Err(e) = self.callbacks.start() {
            tracing::error!(service = %self.identity, error = %e, "native: start routine failed");
            self.publish_stopped();
            return;
        }

        if let Err(e) = self.set_state(ServiceState::Running) {
            tracing::error!(
                service = %self.identity,
                error = %e,
                "native: could not report running"
            );
            self.publish_stopped();
            return;
        }
        tracing::info!(service = %self.identity, "native: running");
    }

    fn publish_stopped(&self) {
        if let Err(e) = self.set_state(ServiceState::Stopped) {
            tracing::error!(
                service = %self.identity,
                error = %e,
                "native: could not report stopped"
            );
        }
    }

    /// Runs on the OS control thread; never waits on the stop routine.
    fn on_control(self: &Arc<Self>, code: ControlCode) -> bool {
        match code {
            ControlCode::Interrogate => {
                if let Err(e) = lock(&self.record).publish() {
                    tracing::warn!(
                        service = %self.identity,
                        error = %e,
                        "native: interrogate reply failed"
                    );
                }
                true
            }
            ControlCode::Stop | ControlCode::Shutdown => {
                {
                    let mut record = lock(&self.record);
                    if record.status.current_state != ServiceState::Running {
                        return true;
                    }
                    record.pending_stop = Some(record.status);
                    record.enter(ServiceState::StopPending, self.pending_wait_hint);
                    if let Err(e) = record.publish() {
                        tracing::warn!(
                            service = %self.identity,
                            error = %e,
                            "native: could not report stop pending"
                        );
                    }
                }
                tracing::info!(
                    service = %self.identity,
                    ?code,
                    "native: stop requested by service control manager"
                );
                self.spawn_stop_worker();
                true
            }
            ControlCode::Other(raw) => {
                tracing::debug!(service = %self.identity, raw, "native: ignoring control code");
                false
            }
        }
    }

    fn spawn_stop_worker(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new().name("service-stop".into()).spawn(move || {
            if let Err(e) = shared.stop_sequence(StopOrigin::Control) {
                tracing::error!(service = %shared.identity, error = %e, "native: stop failed");
            }
        });

        match spawned {
            Ok(worker) => {
                let previous = lock(&self.worker).replace(worker);
                // A previous worker can only still be here if it has already finished.
                drop(previous);
            }
            Err(e) => {
                tracing::error!(
                    service = %self.identity,
                    error = %e,
                    "native: could not spawn stop worker"
                );
                let mut record = lock(&self.record);
                if let Some(before) = record.pending_stop.take() {
                    record.restore(before, &self.identity);
                }
            }
        }
    }

    fn stop_sequence(&self, origin: StopOrigin) -> Result<(), HostError> {
        let _gate = lock(&self.stop_gate);
        self.run_stop(origin)
    }

    /// Publish STOP_PENDING, run the stop routine, then publish STOPPED or
    /// restore the pre-stop status if it failed. Caller holds `stop_gate`.
    ///
    /// A control worker only runs the stop its control code claimed. A direct
    /// stop starts from RUNNING, or takes over a claimed stop whose worker has
    /// not got to it yet.
    fn run_stop(&self, origin: StopOrigin) -> Result<(), HostError> {
        let before = {
            let mut record = lock(&self.record);
            let state = record.status.current_state;
            let claimed = match (state, origin) {
                (ServiceState::StopPending, _) => record.pending_stop.take(),
                (ServiceState::Running, StopOrigin::Direct) if record.handle.is_some() => {
                    Some(record.status)
                }
                _ => None,
            };
            let Some(before) = claimed else {
                tracing::debug!(
                    service = %self.identity,
                    ?state,
                    ?origin,
                    "native: nothing to stop"
                );
                return Ok(());
            };

            record.enter(ServiceState::StopPending, self.pending_wait_hint);
            if let Err(e) = record.publish() {
                record.restore(before, &self.identity);
                return Err(e);
            }
            before
        };

        match self.callbacks.stop() {
            Ok(()) => {
                self.set_state(ServiceState::Stopped)?;
                tracing::info!(service = %self.identity, "native: stopped");
                Ok(())
            }
            Err(e) => {
                lock(&self.record).restore(before, &self.identity);
                Err(HostError::StopFailure(e))
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    #[derive(Default)]
    struct Log {
        published: Mutex<Vec<ServiceStatus>>,
        fail_on: Option<ServiceState>,
    }

    impl Log {
        fn states(&self) -> Vec<ServiceState> {
            lock(&self.published).iter().map(|s| s.current_state).collect()
        }

        fn last(&self) -> Option<ServiceStatus> {
            lock(&self.published).last().copied()
        }
    }

    struct FakeHandle(Arc<Log>);

    impl StatusHandle for FakeHandle {
        fn publish(&self, status: &ServiceStatus) -> Result<(), HostError> {
            if self.0.fail_on == Some(status.current_state) {
                return Err(HostError::PublishFailure {
                    state: status.current_state,
                    reason: "refused".into(),
                });
            }
            lock(&self.0.published).push(*status);
            Ok(())
        }
    }

    /// Runs the entry inline and keeps the control handler for later injection.
    #[derive(Default)]
    struct FakeScm {
        log: Arc<Log>,
        handler: Mutex<Option<ControlHandler>>,
        refuse_dispatch: bool,
        refuse_register: bool,
    }

    impl FakeScm {
        fn send(&self, code: ControlCode) -> bool {
            let mut handler = lock(&self.handler);
            let handler = handler.as_mut().expect("handler registered");
            handler(code)
        }
    }

    impl ControlBackend for FakeScm {
        fn start_dispatcher(
            &self,
            _identity: &ServiceIdentity,
            entry: ServiceEntry,
        ) -> Result<(), HostError> {
            if self.refuse_dispatch {
                return Err(HostError::RegistrationFailure("not started by the SCM".into()));
            }
            entry(vec![OsString::from("FakeService")]);
            Ok(())
        }

        fn register_control_handler(
            &self,
            _identity: &ServiceIdentity,
            handler: ControlHandler,
        ) -> Result<Arc<dyn StatusHandle>, HostError> {
            if self.refuse_register {
                return Err(HostError::RegistrationFailure("denied".into()));
            }
            *lock(&self.handler) = Some(handler);
            Ok(Arc::new(FakeHandle(Arc::clone(&self.log))))
        }
    }

    struct Counts {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    fn callbacks(start_ok: bool, stop_ok: bool) -> (Callbacks, Counts) {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let (a, b) = (Arc::clone(&starts), Arc::clone(&stops));
        let cb = Callbacks::new(
            move || {
                a.fetch_add(1, Ordering::SeqCst);
                if start_ok { Ok(()) } else { Err("bind failed".into()) }
            },
            move || {
                b.fetch_add(1, Ordering::SeqCst);
                if stop_ok { Ok(()) } else { Err("flush failed".into()) }
            },
        );
        (cb, Counts { starts, stops })
    }

    fn runner(scm: &Arc<FakeScm>, cb: Callbacks) -> PlatformServiceRunner {
        PlatformServiceRunner::new(
            ServiceIdentity::new("FakeService").unwrap(),
            cb,
            Arc::clone(scm) as Arc<dyn ControlBackend>,
            Duration::from_millis(500),
        )
    }

    use ServiceState::*;

    #[test]
    fn refused_dispatch_falls_through() {
        let scm = Arc::new(FakeScm { refuse_dispatch: true, ..Default::default() });
        let (cb, counts) = callbacks(true, true);
        let r = runner(&scm, cb);

        assert!(!r.try_run().unwrap());
        assert_eq!(counts.starts.load(Ordering::SeqCst), 0);
        assert!(scm.log.states().is_empty());
        // Nothing is attached, so stopping does nothing.
        r.stop().unwrap();
        assert_eq!(counts.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn startup_publishes_pending_then_running() {
        let scm = Arc::new(FakeScm::default());
        let (cb, counts) = callbacks(true, true);
        let r = runner(&scm, cb);

        assert!(r.try_run().unwrap());
        assert_eq!(counts.starts.load(Ordering::SeqCst), 1);
        assert_eq!(scm.log.states(), vec![StartPending, Running]);

        let published = lock(&scm.log.published).clone();
        assert_eq!(published[0].wait_hint, Duration::from_millis(500));
        assert_eq!(published[1].wait_hint, Duration::ZERO);
        assert_eq!(published[1].checkpoint, 0);
    }

    #[test]
    fn start_failure_publishes_stopped() {
        let scm = Arc::new(FakeScm::default());
        let (cb, counts) = callbacks(false, true);
        let r = runner(&scm, cb);

        assert!(r.try_run().unwrap());
        assert_eq!(scm.log.states(), vec![StartPending, Stopped]);
        assert_eq!(r.status().current_state, Stopped);

        r.stop().unwrap();
        assert_eq!(counts.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registration_failure_aborts_quietly() {
        let scm = Arc::new(FakeScm { refuse_register: true, ..Default::default() });
        let (cb, counts) = callbacks(true, true);
        let r = runner(&scm, cb);

        assert!(r.try_run().unwrap());
        assert_eq!(counts.starts.load(Ordering::SeqCst), 0);
        assert!(scm.log.states().is_empty());
    }

    #[test]
    fn unpublishable_start_pending_skips_start() {
        let log = Arc::new(Log { fail_on: Some(StartPending), ..Default::default() });
        let scm = Arc::new(FakeScm { log, ..Default::default() });
        let (cb, counts) = callbacks(true, true);
        let r = runner(&scm, cb);

        assert!(r.try_run().unwrap());
        assert_eq!(counts.starts.load(Ordering::SeqCst), 0);
        assert!(scm.log.states().is_empty());
    }

    #[test]
    fn unpublishable_running_reports_stopped() {
        let log = Arc::new(Log { fail_on: Some(Running), ..Default::default() });
        let scm = Arc::new(FakeScm { log, ..Default::default() });
        let (cb, _counts) = callbacks(true, true);
        let r = runner(&scm, cb);

        assert!(r.try_run().unwrap());
        assert_eq!(scm.log.states(), vec![StartPending, Stopped]);
    }

    #[test]
    fn direct_stop_runs_once() {
        let scm = Arc::new(FakeScm::default());
        let (cb, counts) = callbacks(true, true);
        let r = runner(&scm, cb);
        r.try_run().unwrap();

        r.stop().unwrap();
        r.stop().unwrap();
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(scm.log.states(), vec![StartPending, Running, StopPending, Stopped]);
    }

    #[test]
    fn stop_failure_restores_prior_status() {
        let scm = Arc::new(FakeScm::default());
        let (cb, counts) = callbacks(true, false);
        let r = runner(&scm, cb);
        r.try_run().unwrap();
        let before = r.status();

        assert!(matches!(r.stop(), Err(HostError::StopFailure(_))));
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(scm.log.last(), Some(before));
        assert_eq!(r.status().current_state, Running);
    }

    #[test]
    fn unpublishable_stop_pending_restores_running() {
        let log = Arc::new(Log { fail_on: Some(StopPending), ..Default::default() });
        let scm = Arc::new(FakeScm { log, ..Default::default() });
        let (cb, counts) = callbacks(true, true);
        let r = runner(&scm, cb);
        r.try_run().unwrap();
        let before = r.status();

        assert!(matches!(r.stop(), Err(HostError::PublishFailure { .. })));
        assert_eq!(counts.stops.load(Ordering::SeqCst), 0);
        assert_eq!(r.status(), before);
        assert_eq!(scm.log.states(), vec![StartPending, Running, Running]);
    }

    #[test]
    fn stop_control_rolls_back_on_failure() {
        let scm = Arc::new(FakeScm::default());
        let (cb, _counts) = callbacks(true, false);
        let r = runner(&scm, cb);
        r.try_run().unwrap();
        let before = r.status();

        assert!(scm.send(ControlCode::Stop));
        r.join_stop_worker();
        assert_eq!(scm.log.last(), Some(before));
        assert_eq!(
            scm.log.states(),
            vec![StartPending, Running, StopPending, StopPending, Running]
        );
    }

    #[test]
    fn interrogate_republishes_current_state() {
        let scm = Arc::new(FakeScm::default());
        let (cb, _counts) = callbacks(true, true);
        let r = runner(&scm, cb);
        r.try_run().unwrap();

        assert!(scm.send(ControlCode::Interrogate));
        assert_eq!(scm.log.states(), vec![StartPending, Running, Running]);
        assert!(!scm.send(ControlCode::Other(0x2)));
        assert_eq!(scm.log.states().len(), 3);
    }

    #[test]
    fn shutdown_control_stops_service() {
        let scm = Arc::new(FakeScm::default());
        let (cb, counts) = callbacks(true, true);
        let r = runner(&scm, cb);
        r.try_run().unwrap();

        assert!(scm.send(ControlCode::Shutdown));
        r.join_stop_worker();
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(r.status().current_state, Stopped);

        // Not running any more: a second stop control is ignored.
        assert!(scm.send(ControlCode::Stop));
        r.join_stop_worker();
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            scm.log.states(),
            vec![StartPending, Running, StopPending, StopPending, Stopped]
        );
    }

    #[test]
    fn stop_control_does_not_wait_for_stop_routine() {
        let scm = Arc::new(FakeScm::default());
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let cb = Callbacks::new(
            || Ok(()),
            move || {
                let _ = lock(&entered_tx).send(());
                let _ = lock(&release_rx).recv();
                Ok(())
            },
        );
        let r = runner(&scm, cb);
        r.try_run().unwrap();

        let begun = Instant::now();
        assert!(scm.send(ControlCode::Stop));
        assert!(scm.send(ControlCode::Interrogate));
        assert!(begun.elapsed() < Duration::from_secs(2));

        // The stop routine is now blocked on the worker thread.
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(r.status().current_state, StopPending);

        release_tx.send(()).unwrap();
        r.join_stop_worker();
        assert_eq!(r.status().current_state, Stopped);
    }

    #[test]
    fn published_states_keep_lifecycle_order() {
        let scm = Arc::new(FakeScm::default());
        let (cb, _counts) = callbacks(true, true);
        let r = runner(&scm, cb);
        r.try_run().unwrap();
        scm.send(ControlCode::Interrogate);
        scm.send(ControlCode::Stop);
        r.join_stop_worker();
        r.stop().unwrap();

        let rank = |s: ServiceState| match s {
            StartPending => 0,
            Running => 1,
            StopPending => 2,
            Stopped => 3,
        };
        let states = scm.log.states();
        assert!(states.windows(2).all(|w| rank(w[0]) <= rank(w[1])), "{states:?}");
        assert_eq!(states.last(), Some(&Stopped));
    }

    #[test]
    fn direct_stop_takes_over_a_claimed_control_stop() {
        let scm = Arc::new(FakeScm::default());
        let (cb, counts) = callbacks(true, false);
        let r = runner(&scm, cb);
        r.try_run().unwrap();
        let before = r.status();

        let result = {
            let _gate = lock(&r.shared.stop_gate);
            assert!(scm.send(ControlCode::Stop));
            // The worker is parked on the gate; the direct stop gets there first.
            r.shared.run_stop(StopOrigin::Direct)
        };
        r.join_stop_worker();

        assert!(matches!(result, Err(HostError::StopFailure(_))));
        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(scm.log.last(), Some(before));
        assert_eq!(
            scm.log.states(),
            vec![StartPending, Running, StopPending, StopPending, Running]
        );
    }

    #[test]
    fn control_and_direct_stop_run_the_routine_once() {
        let scm = Arc::new(FakeScm::default());
        let (cb, counts) = callbacks(true, true);
        let r = runner(&scm, cb);
        r.try_run().unwrap();

        assert!(scm.send(ControlCode::Stop));
        // Whichever of the worker and this call wins, the other finds nothing to do.
        r.stop().unwrap();
        r.join_stop_worker();

        assert_eq!(counts.stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            scm.log.states(),
            vec![StartPending, Running, StopPending, StopPending, Stopped]
        );
    }

    #[test]
    fn concurrent_direct_stops_are_serialized() {
        let scm = Arc::new(FakeScm::default());
        let stops = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let s = Arc::clone(&stops);
        let cb = Callbacks::new(
            || Ok(()),
            move || {
                s.fetch_add(1, Ordering::SeqCst);
                let _ = lock(&entered_tx).send(());
                let _ = lock(&release_rx).recv();
                Ok(())
            },
        );
        let r = Arc::new(runner(&scm, cb));
        r.try_run().unwrap();

        let stoppers: Vec<_> = (0..3)
            .map(|_| {
                let r = Arc::clone(&r);
                thread::spawn(move || r.stop())
            })
            .collect();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Give the other callers time to queue up behind the first.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(r.status().current_state, StopPending);

        drop(release_tx);
        for stopper in stoppers {
            stopper.join().unwrap().unwrap();
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(scm.log.states(), vec![StartPending, Running, StopPending, Stopped]);
    }
}
