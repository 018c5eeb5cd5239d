use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use clap::Parser;

use servhost::cli::{Cli, Command};
use servhost::{
    init_telemetry, load_config, load_config_from, Result, Service, ServiceHost, ServiceIdentity,
    StrategyPreference,
};

// Demo service: logs a heartbeat until stopped.
struct Heartbeat {
    name: String,
    tick: Duration,
    worker: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl Heartbeat {
    fn new(name: String, tick: Duration) -> Self {
        Self { name, tick, worker: Mutex::new(None) }
    }
}

impl Service for Heartbeat {
    fn name(&self) -> &str { &self.name }

    fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().map_err(|_| "heartbeat state poisoned")?;
        if worker.is_some() {
            return Err("heartbeat already running".into());
        }
        let (tx, rx) = mpsc::channel::<()>();
        let tick = self.tick;
        let name = self.name.clone();
        let handle = thread::Builder::new().name("heartbeat".into()).spawn(move || {
            let mut beats: u64 = 0;
            loop {
                match rx.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => {
                        beats += 1;
                        tracing::info!(service = %name, beats, "heartbeat");
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })?;
        *worker = Some((tx, handle));
        tracing::info!(
            service = %self.name,
            tick_ms = self.tick.as_millis() as u64,
            "heartbeat started"
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let worker = self.worker.lock().map_err(|_| "heartbeat state poisoned")?.take();
        if let Some((tx, handle)) = worker {
            let _ = tx.send(());
            handle.join().map_err(|_| "heartbeat thread panicked")?;
            tracing::info!(service = %self.name, "heartbeat stopped");
        }
        Ok(())
    }
}

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config + init logs
    let mut cfg = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    init_telemetry(&cfg)?;
    tracing::info!(version = VERSION, strategy = ?cfg.strategy, "servhost starting");

    match cli.command {
        Command::CheckName { name } => match ServiceIdentity::new(name) {
            Ok(id) => println!("{id}: ok"),
            Err(e) => {
                println!("{e}");
                std::process::exit(2);
            }
        },
        Command::Run { name, console, tick_ms } => {
            if console {
                cfg.strategy = StrategyPreference::Console;
            }
            let service = Arc::new(Heartbeat::new(name, Duration::from_millis(tick_ms)));
            let host = ServiceHost::for_service(service)?.with_config(cfg);
            match host.run() {
                Some(kind) => tracing::info!(strategy = %kind, "servhost exiting"),
                None => {
                    tracing::error!("no hosting strategy took over");
                    drop(host);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
