//! Batch coordinator.
//!
//! Owns every batch's lifecycle: materialized batches are started, paused,
//! resumed and cancelled here, and the automatic transition to `completed`
//! happens here once a batch is drained. The coordinator is the single
//! writer of batch state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{error, info, warn};

use crate::config::FlowBatchConfig;
use crate::events::{EventPublisher, ProgressEvent};
use crate::models::{Batch, WorkflowBinding};
use crate::orchestration::dispatcher::{BatchControl, Dispatcher};
use crate::orchestration::progress::ProgressTracker;
use crate::orchestration::retry::RetryPolicy;
use crate::state_machine::{batch_target_state, BatchEvent, BatchState};
use crate::store::Store;
use crate::{FlowBatchError, Result};

/// Live control handle for a batch whose runner is (or was) active.
struct BatchHandle {
    control: watch::Sender<BatchControl>,
}

type HandleMap = Arc<Mutex<HashMap<String, BatchHandle>>>;

#[derive(Clone)]
pub struct BatchCoordinator {
    store: Store,
    config: FlowBatchConfig,
    publisher: EventPublisher,
    /// Process-wide ceiling shared by all batches' workers.
    throttle: Arc<Semaphore>,
    active: HandleMap,
}

impl BatchCoordinator {
    pub fn new(store: Store, config: FlowBatchConfig, publisher: EventPublisher) -> Self {
        let throttle = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        Self {
            store,
            config,
            publisher,
            throttle,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `created|paused -> running`. Starting a batch that is already
    /// running is a no-op.
    pub async fn start(&self, batch_id: &str) -> Result<()> {
        let batch = self.load_batch(batch_id).await?;

        match batch.state {
            BatchState::Running => {
                if self.active.lock().await.contains_key(batch_id) {
                    return Ok(());
                }
                // Stale `running` left by a dead process: re-materialize.
                warn!(batch_id = %batch_id, "re-materializing batch left running");
                self.store.requeue_running_tasks(batch_id).await?;
                self.spawn_runner(batch, BatchControl::Running).await?;
                return Ok(());
            }
            BatchState::Paused => {
                return self.transition_to_running(batch, BatchEvent::Start).await;
            }
            _ => {}
        }

        let target = batch_target_state(batch.state, &BatchEvent::Start)?;
        self.persist_batch_transition(&batch, target).await?;
        self.store.mark_batch_started(batch_id).await?;

        let mut batch = batch;
        batch.state = target;
        self.spawn_runner(batch, BatchControl::Running).await?;
        info!(batch_id = %batch_id, "🚀 BATCH: started");
        Ok(())
    }

    /// `running -> paused`. The dispatcher stops claiming; in-flight tasks
    /// run to a terminal state.
    pub async fn pause(&self, batch_id: &str) -> Result<()> {
        let batch = self.load_batch(batch_id).await?;
        let target = batch_target_state(batch.state, &BatchEvent::Pause)?;
        self.persist_batch_transition(&batch, target).await?;
        self.signal(batch_id, BatchControl::Paused).await;
        info!(batch_id = %batch_id, "⏸️ BATCH: paused");
        Ok(())
    }

    /// `paused -> running`.
    pub async fn resume(&self, batch_id: &str) -> Result<()> {
        let batch = self.load_batch(batch_id).await?;
        self.transition_to_running(batch, BatchEvent::Resume).await
    }

    /// Any non-terminal state `-> cancelling`. Cancelling a completed batch
    /// is a no-op.
    pub async fn cancel(&self, batch_id: &str) -> Result<()> {
        let batch = self.load_batch(batch_id).await?;

        if batch.state == BatchState::Completed {
            return Ok(());
        }
        let target = batch_target_state(batch.state, &BatchEvent::Cancel)?;
        self.persist_batch_transition(&batch, target).await?;
        info!(batch_id = %batch_id, "🛑 BATCH: cancelling");

        // A live runner sweeps remaining work and completes the batch
        // itself. Without one (batch never started, or process restarted)
        // the sweep happens inline. The re-check after signalling covers a
        // runner that wound down in between.
        self.signal(batch_id, BatchControl::Cancelling).await;
        if !self.active.lock().await.contains_key(batch_id) {
            self.store.cancel_pending_tasks(batch_id).await?;
            self.store.cancel_abandoned_running_tasks(batch_id).await?;
            self.complete_if_drained(batch_id).await?;
        }
        Ok(())
    }

    /// Re-materialize batches found `running`/`cancelling` after a process
    /// restart: their `running` tasks go back to `pending` for re-dispatch.
    /// Re-dispatch may duplicate remote runs; `external_run_id` records
    /// whether a prior attempt may have reached the remote.
    pub async fn recover(&self) -> Result<usize> {
        let batches = self.store.batches_needing_recovery().await?;
        let count = batches.len();
        for batch in batches {
            let requeued = self.store.requeue_running_tasks(&batch.id).await?;
            info!(
                batch_id = %batch.id,
                state = %batch.state,
                requeued,
                "recovering batch after restart"
            );
            let control = match batch.state {
                BatchState::Cancelling => BatchControl::Cancelling,
                _ => BatchControl::Running,
            };
            self.spawn_runner(batch, control).await?;
        }
        Ok(count)
    }

    /// Wait until a batch's runner has stopped. Test and shutdown helper;
    /// returns immediately when no runner is live.
    pub async fn wait_for_idle(&self, batch_id: &str) {
        loop {
            if !self.active.lock().await.contains_key(batch_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn transition_to_running(&self, batch: Batch, event: BatchEvent) -> Result<()> {
        let target = batch_target_state(batch.state, &event)?;
        self.persist_batch_transition(&batch, target).await?;
        self.store.mark_batch_started(&batch.id).await?;

        let batch_id = batch.id.clone();
        let has_runner = {
            let active = self.active.lock().await;
            active.contains_key(&batch_id)
        };
        if has_runner {
            // Paused runner is still parked on its control channel.
            self.signal(&batch_id, BatchControl::Running).await;
        } else {
            let mut batch = batch;
            batch.state = target;
            self.spawn_runner(batch, BatchControl::Running).await?;
        }
        info!(batch_id = %batch_id, "▶️ BATCH: running");
        Ok(())
    }

    async fn persist_batch_transition(&self, batch: &Batch, target: BatchState) -> Result<()> {
        self.store.update_batch_state(&batch.id, target).await?;
        self.publisher.publish(ProgressEvent::BatchStateChanged {
            batch_id: batch.id.clone(),
            from: Some(batch.state),
            to: target,
        });
        Ok(())
    }

    async fn signal(&self, batch_id: &str, control: BatchControl) {
        let active = self.active.lock().await;
        if let Some(handle) = active.get(batch_id) {
            let _ = handle.control.send(control);
        }
    }

    async fn spawn_runner(&self, batch: Batch, initial: BatchControl) -> Result<()> {
        let binding = self
            .store
            .get_binding(&batch.binding_id)
            .await?
            .ok_or_else(|| FlowBatchError::BindingNotFound(batch.binding_id.clone()))?;

        let (control_tx, control_rx) = watch::channel(initial);
        self.active
            .lock()
            .await
            .insert(batch.id.clone(), BatchHandle { control: control_tx });

        let runner = BatchRunner {
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            policy: RetryPolicy::from_config(&self.config.retry),
            request_timeout: Duration::from_millis(self.config.batch.request_timeout_ms),
            progress_tick: self.config.progress_tick(),
            throttle: self.throttle.clone(),
            active: self.active.clone(),
            batch,
            binding,
            control_rx,
        };
        tokio::spawn(runner.run());
        Ok(())
    }

    async fn load_batch(&self, batch_id: &str) -> Result<Batch> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| FlowBatchError::BatchNotFound(batch_id.to_string()))
    }

    async fn complete_if_drained(&self, batch_id: &str) -> Result<()> {
        complete_if_drained(&self.store, &self.publisher, batch_id)
            .await
            .map(|_| ())
    }
}

/// Shared completion rule: once `pending + running = 0`, a running or
/// cancelling batch moves to `completed`.
async fn complete_if_drained(
    store: &Store,
    publisher: &EventPublisher,
    batch_id: &str,
) -> Result<bool> {
    let counts = store.batch_counts(batch_id).await?;
    if !counts.is_drained() {
        return Ok(false);
    }
    let Some(state) = store.batch_state(batch_id).await? else {
        return Ok(false);
    };
    let Ok(target) = batch_target_state(state, &BatchEvent::Complete) else {
        return Ok(false);
    };

    store.update_batch_state(batch_id, target).await?;
    store.mark_batch_finished(batch_id).await?;
    publisher.publish(ProgressEvent::BatchStateChanged {
        batch_id: batch_id.to_string(),
        from: Some(state),
        to: target,
    });
    info!(
        batch_id = %batch_id,
        succeeded = counts.succeeded,
        failed = counts.failed,
        cancelled = counts.cancelled,
        "✅ BATCH: completed"
    );
    Ok(true)
}

/// Drives one batch until it reaches a terminal state, surviving
/// pause/resume cycles without respawning workers' state.
struct BatchRunner {
    store: Store,
    publisher: EventPublisher,
    policy: RetryPolicy,
    request_timeout: Duration,
    progress_tick: Duration,
    throttle: Arc<Semaphore>,
    active: HandleMap,
    batch: Batch,
    binding: WorkflowBinding,
    control_rx: watch::Receiver<BatchControl>,
}

impl BatchRunner {
    async fn run(self) {
        let batch_id = self.batch.id.clone();
        if let Err(e) = self.drive().await {
            error!(batch_id = %batch_id, error = %e, "batch runner failed");
            if let Err(persist_err) = self
                .store
                .mark_batch_failed(&batch_id, &e.to_string())
                .await
            {
                error!(batch_id = %batch_id, error = %persist_err, "could not persist batch failure");
            }
            self.publisher.publish(ProgressEvent::BatchStateChanged {
                batch_id: batch_id.clone(),
                from: None,
                to: BatchState::Failed,
            });
        }
        self.active.lock().await.remove(&batch_id);
    }

    async fn drive(&self) -> Result<()> {
        let progress = Arc::new(ProgressTracker::new(
            self.store.clone(),
            self.publisher.clone(),
            self.batch.id.clone(),
            self.progress_tick,
        ));
        let dispatcher = Dispatcher::new(
            self.store.clone(),
            self.publisher.clone(),
            self.policy.clone(),
            self.request_timeout,
            self.throttle.clone(),
        );

        loop {
            let clean = dispatcher
                .drain(
                    &self.batch.id,
                    &self.binding,
                    self.batch.concurrency_limit,
                    self.control_rx.clone(),
                    progress.clone(),
                )
                .await;

            let state = self
                .store
                .batch_state(&self.batch.id)
                .await?
                .ok_or_else(|| FlowBatchError::BatchNotFound(self.batch.id.clone()))?;

            match state {
                BatchState::Running => {
                    if complete_if_drained(&self.store, &self.publisher, &self.batch.id).await? {
                        progress.emit_now().await;
                        return Ok(());
                    }
                    if !clean {
                        return Err(FlowBatchError::Execution(
                            "worker pool aborted with pending work".to_string(),
                        ));
                    }
                    // Pending work reappeared (late requeue); drain again.
                }
                BatchState::Paused => {
                    progress.emit_now().await;
                    if !self.wait_while_paused().await {
                        return Ok(());
                    }
                }
                BatchState::Cancelling => {
                    let swept = self.store.cancel_pending_tasks(&self.batch.id).await?;
                    if swept > 0 {
                        info!(batch_id = %self.batch.id, swept, "cancelled remaining pending tasks");
                    }
                    complete_if_drained(&self.store, &self.publisher, &self.batch.id).await?;
                    progress.emit_now().await;
                    return Ok(());
                }
                // Terminal or externally rewound; nothing left to drive.
                _ => return Ok(()),
            }
        }
    }

    /// Park until the control channel leaves `Paused`. Returns false when
    /// the coordinator was dropped.
    async fn wait_while_paused(&self) -> bool {
        let mut control = self.control_rx.clone();
        loop {
            if *control.borrow() != BatchControl::Paused {
                return true;
            }
            if control.changed().await.is_err() {
                return false;
            }
        }
    }
}
