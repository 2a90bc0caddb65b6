//! Task runtime shared by every processor.
//!
//! A [`ProcessorHandle`] owns the processor, its pending queue and its
//! counters. Starting spawns one task that loops: handle pending items in
//! order, run periodic work, then pull the next batch. Cancellation is only
//! observed while pulling or backing off, so an item that has started is
//! always finished. Items pulled but not handled stay queued across
//! restarts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use domain::ports::ServiceError;
use domain::services::RetryPolicy;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ConfigPatch, ProcessorError, ProcessorKind, ProcessorState, ProcessorStats};
use crate::middleware::metrics::{
    record_processor_error, record_processor_items, record_processor_pending,
};

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Processed { emitted: usize },
    /// Dropped by input validation.
    Rejected,
}

/// The work a processor does. The runtime supplies the task, ordering,
/// lifecycle and failure handling.
#[async_trait::async_trait]
pub trait Processor: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    fn kind(&self) -> ProcessorKind;

    /// Runs before the task is spawned. Failure leaves the processor in
    /// `error`.
    async fn on_start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn pull(&self, max: usize, wait: Duration) -> Result<Vec<Self::Item>, ServiceError>;

    /// Handles one item. Errors are fatal for the task; transient failures
    /// are expected to be retried inside.
    async fn process(&self, item: &Self::Item) -> Result<ItemOutcome, ServiceError>;

    /// Periodic work between batches. Returns the number of records emitted.
    async fn tick(&self) -> Result<usize, ServiceError> {
        Ok(0)
    }

    /// Final work once the task has been asked to stop.
    async fn on_stop(&self) -> Result<usize, ServiceError> {
        Ok(0)
    }

    /// Applies processor-specific settings. Either every key is applied or
    /// none is.
    fn apply_settings(&self, patch: &ConfigPatch) -> Result<(), ProcessorError>;
}

/// Object-safe view of a processor used by the coordinator.
#[async_trait::async_trait]
pub trait ManagedProcessor: Send + Sync {
    fn kind(&self) -> ProcessorKind;

    fn state(&self) -> ProcessorState;

    fn stats(&self) -> ProcessorStats;

    async fn start(&self) -> Result<(), ProcessorError>;

    async fn stop(&self) -> Result<(), ProcessorError>;

    async fn restart(&self) -> Result<(), ProcessorError>;

    fn update_settings(&self, patch: &ConfigPatch) -> Result<(), ProcessorError>;
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub batch_size: usize,
    /// Longest a single pull waits for new items.
    pub poll_wait: Duration,
    /// How long a stop waits for the task before aborting it.
    pub stop_timeout: Duration,
    /// Backoff for failed pulls.
    pub retry: RetryPolicy,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_wait: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

struct Shared<P: Processor> {
    processor: P,
    state: Mutex<ProcessorState>,
    stats: Mutex<ProcessorStats>,
    pending: Mutex<VecDeque<P::Item>>,
    batch_size: AtomicUsize,
}

impl<P: Processor> Shared<P> {
    fn kind(&self) -> ProcessorKind {
        self.processor.kind()
    }

    fn state(&self) -> ProcessorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ProcessorState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        debug!(processor = %self.kind(), state = %state, "Processor state changed");
    }

    fn with_stats(&self, f: impl FnOnce(&mut ProcessorStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, VecDeque<P::Item>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn front(&self) -> Option<P::Item> {
        self.pending().front().cloned()
    }

    fn enqueue(&self, items: Vec<P::Item>) {
        let len = {
            let mut pending = self.pending();
            pending.extend(items);
            pending.len()
        };
        record_processor_pending(self.kind(), len);
    }

    fn complete(&self, outcome: ItemOutcome) {
        let len = {
            let mut pending = self.pending();
            pending.pop_front();
            pending.len()
        };
        record_processor_pending(self.kind(), len);

        let (label, emitted) = match outcome {
            ItemOutcome::Processed { emitted } => ("processed", emitted),
            ItemOutcome::Rejected => ("rejected", 0),
        };
        record_processor_items(self.kind(), label, 1);
        self.with_stats(|stats| {
            stats.processed += 1;
            stats.emitted += emitted as u64;
            if outcome == ItemOutcome::Rejected {
                stats.rejected += 1;
            }
            stats.last_activity_at = Some(Utc::now());
        });
    }

    fn emitted(&self, count: usize) {
        if count > 0 {
            self.with_stats(|stats| {
                stats.emitted += count as u64;
                stats.last_activity_at = Some(Utc::now());
            });
        }
    }

    fn fail(&self, message: String) {
        error!(processor = %self.kind(), error = %message, "Processor failed");
        record_processor_error(self.kind());
        self.with_stats(|stats| {
            stats.errors += 1;
            stats.last_error = Some(message);
        });
        self.set_state(ProcessorState::Error);
    }
}

struct RunningTask {
    cancel: CancellationToken,
    abort: AbortHandle,
    finished: watch::Receiver<bool>,
}

/// Owns one processor and drives its task.
pub struct ProcessorHandle<P: Processor> {
    shared: Arc<Shared<P>>,
    options: RuntimeOptions,
    lifecycle: AsyncMutex<Option<RunningTask>>,
}

impl<P: Processor> ProcessorHandle<P> {
    pub fn new(processor: P, options: RuntimeOptions) -> Self {
        let batch_size = options.batch_size.max(1);
        Self {
            shared: Arc::new(Shared {
                processor,
                state: Mutex::new(ProcessorState::Stopped),
                stats: Mutex::new(ProcessorStats::default()),
                pending: Mutex::new(VecDeque::new()),
                batch_size: AtomicUsize::new(batch_size),
            }),
            options,
            lifecycle: AsyncMutex::new(None),
        }
    }

    pub fn processor(&self) -> &P {
        &self.shared.processor
    }

    pub fn batch_size(&self) -> usize {
        self.shared.batch_size.load(Ordering::Relaxed)
    }

    async fn start_locked(&self, slot: &mut Option<RunningTask>) -> Result<(), ProcessorError> {
        let kind = self.shared.kind();
        if self.shared.state() == ProcessorState::Running {
            return Ok(());
        }
        // A task that ended on its own leaves its handle behind.
        slot.take();

        self.shared.set_state(ProcessorState::Starting);
        if let Err(e) = self.shared.processor.on_start().await {
            self.shared.fail(e.to_string());
            return Err(ProcessorError::StartFailed {
                kind,
                message: e.to_string(),
            });
        }

        let cancel = CancellationToken::new();
        let (finished_tx, finished) = watch::channel(false);

        self.shared.with_stats(|stats| {
            stats.started_at = Some(Utc::now());
            stats.last_error = None;
        });
        self.shared.set_state(ProcessorState::Running);

        let task = tokio::spawn(run(
            Arc::clone(&self.shared),
            self.options.clone(),
            cancel.clone(),
        ));
        let abort = task.abort_handle();

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    shared.fail("processor task panicked".to_string());
                }
            }
            let _ = finished_tx.send(true);
        });

        *slot = Some(RunningTask {
            cancel,
            abort,
            finished,
        });
        info!(processor = %kind, "Processor started");
        Ok(())
    }

    async fn stop_locked(&self, slot: &mut Option<RunningTask>) -> Result<(), ProcessorError> {
        let kind = self.shared.kind();
        let Some(task) = slot.take() else {
            if self.shared.state() != ProcessorState::Error {
                self.shared.set_state(ProcessorState::Stopped);
            }
            return Ok(());
        };

        if self.shared.state() == ProcessorState::Running {
            self.shared.set_state(ProcessorState::Stopping);
        }
        task.cancel.cancel();

        let mut finished = task.finished;
        let timeout_ms = self.options.stop_timeout.as_millis() as u64;
        let stopped_in_time =
            tokio::time::timeout(self.options.stop_timeout, finished.wait_for(|done| *done))
                .await
                .is_ok();
        let result = if stopped_in_time {
            Ok(())
        } else {
            warn!(
                processor = %kind,
                timeout_ms = timeout_ms,
                "Processor did not stop in time, aborting"
            );
            task.abort.abort();
            let _ = finished.wait_for(|done| *done).await;
            Err(ProcessorError::StopTimedOut { kind, timeout_ms })
        };

        if self.shared.state() != ProcessorState::Error {
            self.shared.set_state(ProcessorState::Stopped);
        }
        info!(processor = %kind, "Processor stopped");
        result
    }
}

#[async_trait::async_trait]
impl<P: Processor> ManagedProcessor for ProcessorHandle<P> {
    fn kind(&self) -> ProcessorKind {
        self.shared.kind()
    }

    fn state(&self) -> ProcessorState {
        self.shared.state()
    }

    fn stats(&self) -> ProcessorStats {
        let mut stats = self
            .shared
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        stats.pending = self.shared.pending().len();
        stats.batch_size = self.batch_size();
        stats
    }

    async fn start(&self) -> Result<(), ProcessorError> {
        let mut slot = self.lifecycle.lock().await;
        self.start_locked(&mut slot).await
    }

    async fn stop(&self) -> Result<(), ProcessorError> {
        let mut slot = self.lifecycle.lock().await;
        self.stop_locked(&mut slot).await
    }

    async fn restart(&self) -> Result<(), ProcessorError> {
        let mut slot = self.lifecycle.lock().await;
        if let Err(e) = self.stop_locked(&mut slot).await {
            warn!(processor = %self.kind(), error = %e, "Stop during restart failed");
        }
        self.shared.set_state(ProcessorState::Stopped);
        self.shared.with_stats(|stats| stats.restarts += 1);
        self.start_locked(&mut slot).await
    }

    fn update_settings(&self, patch: &ConfigPatch) -> Result<(), ProcessorError> {
        let batch_size = match patch.get("batch_size") {
            Some(value) => Some(super::positive_u64("batch_size", value)? as usize),
            None => None,
        };

        let rest: ConfigPatch = patch
            .iter()
            .filter(|(key, _)| key.as_str() != "batch_size")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.shared.processor.apply_settings(&rest)?;

        if let Some(batch_size) = batch_size {
            self.shared.batch_size.store(batch_size, Ordering::Relaxed);
        }
        info!(
            processor = %self.kind(),
            keys = ?patch.keys().collect::<Vec<_>>(),
            "Processor settings updated"
        );
        Ok(())
    }
}

async fn run<P: Processor>(
    shared: Arc<Shared<P>>,
    options: RuntimeOptions,
    cancel: CancellationToken,
) {
    let kind = shared.kind();
    debug!(processor = %kind, "Processor task running");

    loop {
        while !cancel.is_cancelled() {
            let Some(item) = shared.front() else {
                break;
            };
            match shared.processor.process(&item).await {
                Ok(outcome) => shared.complete(outcome),
                Err(e) => {
                    shared.fail(e.to_string());
                    return;
                }
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        match shared.processor.tick().await {
            Ok(emitted) => shared.emitted(emitted),
            Err(e) => {
                shared.fail(e.to_string());
                return;
            }
        }

        let Some(items) = pull_with_backoff(&shared, &options, &cancel).await else {
            break;
        };
        if !items.is_empty() {
            shared.enqueue(items);
        }
    }

    match shared.processor.on_stop().await {
        Ok(emitted) => shared.emitted(emitted),
        Err(e) => warn!(processor = %kind, error = %e, "Final flush failed"),
    }
    debug!(processor = %kind, "Processor task finished");
}

/// Pulls the next batch. Returns `None` when cancelled or after a fatal
/// pull failure, which has already been recorded.
async fn pull_with_backoff<P: Processor>(
    shared: &Shared<P>,
    options: &RuntimeOptions,
    cancel: &CancellationToken,
) -> Option<Vec<P::Item>> {
    let max_attempts = options.retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let batch_size = shared.batch_size.load(Ordering::Relaxed);
        let pulled = tokio::select! {
            _ = cancel.cancelled() => return None,
            pulled = shared.processor.pull(batch_size, options.poll_wait) => pulled,
        };

        match pulled {
            Ok(items) => return Some(items),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = options.retry.backoff_for(attempt);
                warn!(
                    processor = %shared.kind(),
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Pull failed, retrying"
                );
                attempt += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                shared.fail(e.to_string());
                return None;
            }
        }
    }
}
