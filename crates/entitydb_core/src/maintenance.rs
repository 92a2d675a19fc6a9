//! Cooperative background tasks: fixed-schedule work that stops cleanly
//! at shutdown.
//!
//! Session-expiry cleanup, interner pressure cleanup and retention
//! evaluation all run this way. Tasks are plain closures, so tests can
//! call them synchronously instead of waiting on the scheduler.

use crate::error::Result;
use crate::interner::Interner;
use crate::repository::EntityRepository;
use crate::retention::RetentionEngine;
use crate::session::SessionStore;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs named tasks on fixed schedules until shutdown.
pub struct MaintenanceScheduler {
    shutdown_tx: Option<Sender<()>>,
    shutdown_rx: Receiver<()>,
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceScheduler {
    /// Creates an idle scheduler.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = unbounded();
        Self {
            shutdown_tx: Some(shutdown_tx),
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    /// Spawns a named task that runs every `interval` until shutdown.
    ///
    /// Task failures are logged and the schedule continues.
    pub fn spawn(
        &mut self,
        name: &str,
        interval: Duration,
        task: impl Fn() -> Result<()> + Send + 'static,
    ) {
        let shutdown = self.shutdown_rx.clone();
        let task_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("entitydb-{name}"))
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => {
                            debug!(task = %task_name, "maintenance tick");
                            if let Err(e) = task() {
                                warn!(task = %task_name, error = %e, "maintenance task failed");
                            }
                        }
                        // The sender is dropped at shutdown; recv errors
                        // and the loop ends.
                        recv(shutdown) -> _ => break,
                    }
                }
                debug!(task = %task_name, "maintenance task stopped");
            })
            .expect("failed to spawn maintenance thread");

        self.handles.push(handle);
    }

    /// Signals every task to stop and waits for them.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.shutdown_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Default for MaintenanceScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MaintenanceScheduler {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Task closure: delete sessions whose expiry has passed.
pub fn session_cleanup_task(sessions: Arc<SessionStore>) -> impl Fn() -> Result<()> {
    move || {
        let purged = sessions.purge_expired()?;
        if purged > 0 {
            debug!(purged, "expired sessions removed");
        }
        Ok(())
    }
}

/// Task closure: evict the interner back under its bounds.
pub fn interner_trim_task(interner: &'static Interner) -> impl Fn() -> Result<()> {
    move || {
        interner.trim();
        Ok(())
    }
}

/// Task closure: run one retention sweep.
pub fn retention_task(
    engine: Arc<RetentionEngine>,
    repo: Arc<dyn EntityRepository>,
) -> impl Fn() -> Result<()> {
    move || {
        let report = engine.evaluate(repo.as_ref())?;
        if !report.transitions.is_empty() {
            debug!(
                transitions = report.transitions.len(),
                examined = report.entities_examined,
                "retention sweep applied"
            );
        }
        Ok(())
    }
}
