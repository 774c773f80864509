//! Background sync worker.
//!
//! One worker drives the [`SyncEngine`] of one event. A cycle starts on the
//! sync interval, on an explicit trigger, when connectivity comes back, or
//! when a retry after a transient failure falls due. Cycles are skipped
//! while the worker believes it is offline. Each cycle's outcome is sent on
//! the event channel returned by [`SyncWorker::spawn`].

use crate::error::SyncError;
use crate::state::{SyncEngine, SyncReport};
use crate::transport::RemoteService;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

const COMMAND_CAPACITY: usize = 8;
const EVENT_CAPACITY: usize = 64;

/// Outcome of one cycle, as reported by the worker.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The cycle ran. The report may still carry a transient failure.
    Completed(SyncReport),
    /// The cycle failed.
    Failed {
        /// Error message.
        error: String,
        /// Whether the worker will retry on its own.
        retryable: bool,
    },
}

#[derive(Debug)]
enum SyncCommand {
    SyncNow,
    Shutdown,
}

/// Control handle of a running [`SyncWorker`].
pub struct SyncWorkerHandle<T: RemoteService> {
    engine: Arc<SyncEngine<T>>,
    commands: mpsc::Sender<SyncCommand>,
    connectivity: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl<T: RemoteService + 'static> SyncWorkerHandle<T> {
    /// Requests a cycle as soon as possible.
    ///
    /// Returns false if a request is already queued or the worker stopped.
    pub fn trigger(&self) -> bool {
        self.commands.try_send(SyncCommand::SyncNow).is_ok()
    }

    /// Reports the current connectivity. Going from offline to online
    /// starts a cycle.
    pub fn set_connected(&self, connected: bool) {
        self.connectivity.send_replace(connected);
    }

    /// Cancels the cycle in progress, if any, before its next batch.
    pub fn cancel(&self) {
        self.engine.cancel();
    }

    /// Gets the engine driven by the worker.
    pub fn engine(&self) -> &Arc<SyncEngine<T>> {
        &self.engine
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(self) {
        self.engine.cancel();
        // A closed channel means the worker already exited.
        let _ = self.commands.send(SyncCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "sync worker task ended abnormally");
        }
    }
}

/// Periodic driver of a [`SyncEngine`].
pub struct SyncWorker<T: RemoteService> {
    engine: Arc<SyncEngine<T>>,
    commands: mpsc::Receiver<SyncCommand>,
    connectivity: watch::Receiver<bool>,
    events: mpsc::Sender<SyncEvent>,
    online: bool,
    retry_attempt: u32,
}

impl<T: RemoteService + 'static> SyncWorker<T> {
    /// Spawns a worker on the current tokio runtime.
    ///
    /// The worker starts with the transport's connectivity and runs a first
    /// cycle right away.
    pub fn spawn(engine: Arc<SyncEngine<T>>) -> (SyncWorkerHandle<T>, mpsc::Receiver<SyncEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let online = engine.transport().is_connected();
        let (connectivity_tx, connectivity_rx) = watch::channel(online);

        let worker = SyncWorker {
            engine: Arc::clone(&engine),
            commands: command_rx,
            connectivity: connectivity_rx,
            events: event_tx,
            online,
            retry_attempt: 0,
        };
        let task = tokio::spawn(worker.run());

        let handle = SyncWorkerHandle {
            engine,
            commands: command_tx,
            connectivity: connectivity_tx,
            task,
        };
        (handle, event_rx)
    }

    async fn run(mut self) {
        let event_id = self.engine.queue().event_id().clone();
        // A zero period would make tokio panic.
        let period = self.engine.config().sync_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry: Option<Pin<Box<Sleep>>> = None;

        info!(
            event_id = %event_id,
            interval_secs = self.engine.config().sync_interval.as_secs(),
            "sync worker started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SyncCommand::SyncNow) => debug!(event_id = %event_id, "sync requested"),
                    Some(SyncCommand::Shutdown) | None => break,
                },
                _ = interval.tick() => {}
                changed = self.connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *self.connectivity.borrow_and_update();
                    let regained = now_online && !self.online;
                    if self.online && !now_online {
                        info!(event_id = %event_id, "network offline; keeping queue pending");
                    }
                    self.online = now_online;
                    if !regained {
                        continue;
                    }
                    info!(event_id = %event_id, "network restored; resuming queued sync");
                }
                () = wait_retry(&mut retry) => {
                    debug!(event_id = %event_id, attempt = self.retry_attempt, "retrying sync");
                }
            }

            retry = None;
            if !self.online {
                continue;
            }

            match self.run_cycle().await {
                Some(true) => retry = self.schedule_retry(),
                _ => self.retry_attempt = 0,
            }
        }

        info!(event_id = %event_id, "sync worker stopped");
    }

    /// Runs one cycle and reports it. Returns whether the cycle should be
    /// retried, or `None` if it did not run.
    async fn run_cycle(&self) -> Option<bool> {
        let engine = Arc::clone(&self.engine);
        let result = match tokio::task::spawn_blocking(move || engine.sync()).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "sync cycle task failed");
                self.emit(SyncEvent::Failed {
                    error: e.to_string(),
                    retryable: false,
                });
                return None;
            }
        };

        match result {
            Ok(report) => {
                let retryable = report.is_partial();
                self.emit(SyncEvent::Completed(report));
                Some(retryable)
            }
            Err(SyncError::InvalidStateTransition { .. }) => {
                debug!("a sync cycle is already running");
                None
            }
            Err(e) => {
                let retryable = e.is_retryable();
                self.emit(SyncEvent::Failed {
                    error: e.to_string(),
                    retryable,
                });
                Some(retryable)
            }
        }
    }

    fn schedule_retry(&mut self) -> Option<Pin<Box<Sleep>>> {
        let retry = &self.engine.config().retry;
        self.retry_attempt += 1;
        if self.retry_attempt > retry.max_attempts {
            debug!(
                attempts = retry.max_attempts,
                "retries exhausted; waiting for the next interval"
            );
            self.retry_attempt = 0;
            return None;
        }
        let delay = retry.delay_for_attempt(self.retry_attempt);
        debug!(attempt = self.retry_attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
        Some(Box::pin(sleep(delay)))
    }

    fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!(error = %e, "sync event dropped");
        }
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
