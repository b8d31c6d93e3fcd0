//! Scheduler module for running checks and persisting their results.
//!
//! Every check gets its own tick loop. Probes run in tasks of their own so a
//! stalled target never delays another check's timer. Results flow through a
//! channel to a single batch writer.

use crate::db::{CheckResult, ResultStore};
use crate::monitor::{Check, MonitorConfig};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

/// Probes allowed in flight per check. One keeps a check's results ordered.
const MAX_IN_FLIGHT: usize = 1;
/// Upper bound of the random delay before a check's first tick.
const MAX_START_STAGGER_MS: u64 = 100;
const RESULT_BUFFER: usize = 1000;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const FLUSH_THRESHOLD: usize = 500;
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Lifecycle of a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

/// Lifecycle misuse.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler was already started")]
    AlreadyStarted,
    #[error("scheduler is not running")]
    NotRunning,
    #[error("scheduler was already stopped")]
    AlreadyStopped,
}

#[derive(Default)]
struct Tasks {
    stop_tx: Option<broadcast::Sender<()>>,
    loops: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// Runs every check of a monitor config on its own interval.
pub struct Scheduler {
    config: Arc<MonitorConfig>,
    store: Arc<dyn ResultStore>,
    state: watch::Sender<SchedulerState>,
    tasks: Mutex<Tasks>,
}

impl Scheduler {
    pub fn new(config: Arc<MonitorConfig>, store: Arc<dyn ResultStore>) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            config,
            store,
            state,
            tasks: Mutex::new(Tasks::default()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Register one tick loop per check and return.
    ///
    /// The first probe of each check fires right away, after a stagger of
    /// less than 100ms; later ones follow every `interval`.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.lock().await;
        if self.state() != SchedulerState::Idle {
            return Err(SchedulerError::AlreadyStarted);
        }

        let (stop_tx, _) = broadcast::channel(1);
        let (result_tx, result_rx) = mpsc::channel(RESULT_BUFFER);

        tasks.writer = Some(tokio::spawn(run_batch_writer(result_rx, self.store.clone())));

        for check in self.config.checks() {
            tracing::info!(
                "Scheduler: Adding check {} for {} every {:?}",
                check.target(),
                check.owner(),
                check.interval()
            );
            tasks.loops.push(tokio::spawn(run_check_loop(
                Arc::new(check.clone()),
                result_tx.clone(),
                stop_tx.subscribe(),
            )));
        }

        tracing::info!("Starting scheduler with {} checks", tasks.loops.len());

        tasks.stop_tx = Some(stop_tx);
        self.state.send_replace(SchedulerState::Running);
        Ok(())
    }

    /// Stop scheduling new probes and wait up to `deadline` for in-flight ones.
    ///
    /// Probes still running at the deadline are abandoned and their results dropped.
    /// Results of probes that already finished are always flushed.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.lock().await;
        match self.state() {
            SchedulerState::Idle => return Err(SchedulerError::NotRunning),
            SchedulerState::ShuttingDown | SchedulerState::Stopped => {
                return Err(SchedulerError::AlreadyStopped)
            }
            SchedulerState::Running => {}
        }

        self.state.send_replace(SchedulerState::ShuttingDown);
        tracing::info!("Scheduler: Shutting down {} checks", tasks.loops.len());

        if let Some(stop_tx) = tasks.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let deadline = Instant::now()
            .checked_add(deadline)
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE);
        let mut abandoned = 0;

        for mut handle in std::mem::take(&mut tasks.loops) {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                // Wait for the abort so the loop's result sender is dropped.
                let _ = handle.await;
                abandoned += 1;
            }
        }

        // Every sender is gone now; the writer drains and flushes what completed.
        if let Some(writer) = tasks.writer.take() {
            if let Err(e) = writer.await {
                tracing::error!("Scheduler: Result writer failed: {}", e);
            }
        }

        if abandoned > 0 {
            tracing::warn!(
                "Scheduler: Abandoned {} checks with probes still in flight",
                abandoned
            );
        }

        self.state.send_replace(SchedulerState::Stopped);
        tracing::info!("Scheduler: Stopped");
        Ok(())
    }
}

/// Run the tick loop for a single check.
async fn run_check_loop(
    check: Arc<Check>,
    tx: mpsc::Sender<CheckResult>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let stagger = Duration::from_millis(rand::random::<u64>() % MAX_START_STAGGER_MS);
    let mut interval = tokio::time::interval_at(Instant::now() + stagger, check.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Dropping the set aborts whatever is still running in it.
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                while in_flight.try_join_next().is_some() {}

                if in_flight.len() >= MAX_IN_FLIGHT {
                    tracing::warn!(
                        "Skipping probe of {} for {}: previous probe still running",
                        check.target(),
                        check.owner()
                    );
                    continue;
                }

                let check = check.clone();
                let tx = tx.clone();

                in_flight.spawn(async move {
                    let result = check.execute().await;
                    if tx.send(result).await.is_err() {
                        tracing::error!("Failed to send result for {}", check.owner());
                    }
                });
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
}

/// Run the batch writer that accumulates and flushes results.
async fn run_batch_writer(mut rx: mpsc::Receiver<CheckResult>, store: Arc<dyn ResultStore>) {
    let mut buffer: Vec<CheckResult> = Vec::with_capacity(100);
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Some(r) => {
                        buffer.push(r);
                        if buffer.len() >= FLUSH_THRESHOLD {
                            flush_buffer(store.as_ref(), &mut buffer);
                        }
                    }
                    None => {
                        // All senders gone, flush remaining and exit
                        flush_buffer(store.as_ref(), &mut buffer);
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                flush_buffer(store.as_ref(), &mut buffer);
            }
        }
    }
}

fn flush_buffer(store: &dyn ResultStore, buffer: &mut Vec<CheckResult>) {
    if buffer.is_empty() {
        return;
    }

    if let Err(e) = store.save_all(buffer) {
        tracing::error!("Failed to flush {} check results: {}", buffer.len(), e);
    }

    buffer.clear();
}
