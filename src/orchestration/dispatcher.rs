//! Bounded worker pool draining one batch.
//!
//! Each worker claims pending tasks FIFO by `source_row_index`, constructs
//! a fresh remote client per call, applies the retry policy and writes the
//! terminal task transition. Completions happen in any order; nothing here
//! may assume completion order matches claim order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::client::{RunStatus, WorkflowClient};
use crate::events::{EventPublisher, ProgressEvent};
use crate::models::{ErrorKind, Task, WorkflowBinding};
use crate::orchestration::progress::ProgressTracker;
use crate::orchestration::retry::RetryPolicy;
use crate::store::Store;
use crate::Result;

/// Control signal shared between the coordinator and a batch's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchControl {
    Running,
    /// Stop claiming; in-flight calls run to their natural outcome.
    Paused,
    /// Stop claiming and abort in-flight calls; outcomes are discarded.
    Cancelling,
}

/// One drain pass over a batch's pending tasks.
pub struct Dispatcher {
    store: Store,
    publisher: EventPublisher,
    policy: RetryPolicy,
    request_timeout: Duration,
    /// Process-wide ceiling on concurrently running tasks.
    throttle: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        publisher: EventPublisher,
        policy: RetryPolicy,
        request_timeout: Duration,
        throttle: Arc<Semaphore>,
    ) -> Self {
        Self {
            store,
            publisher,
            policy,
            request_timeout,
            throttle,
        }
    }

    /// Run `concurrency_limit` workers until the batch has no pending work
    /// or the control channel leaves `Running`. Returns `false` when a
    /// worker died on a store failure.
    pub async fn drain(
        &self,
        batch_id: &str,
        binding: &WorkflowBinding,
        concurrency_limit: usize,
        control: watch::Receiver<BatchControl>,
        progress: Arc<ProgressTracker>,
    ) -> bool {
        let context = Arc::new(WorkerContext {
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            policy: self.policy.clone(),
            request_timeout: self.request_timeout,
            throttle: self.throttle.clone(),
            batch_id: batch_id.to_string(),
            binding: binding.clone(),
            control,
            progress,
        });

        debug!(batch_id = %batch_id, workers = concurrency_limit, "dispatcher drain starting");

        let mut handles = Vec::with_capacity(concurrency_limit);
        for worker_id in 0..concurrency_limit {
            let context = context.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, context).await
            }));
        }

        let mut clean = true;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(batch_id = %batch_id, error = %e, "worker aborted on store failure");
                    clean = false;
                }
                Err(e) => {
                    error!(batch_id = %batch_id, error = %e, "worker panicked");
                    clean = false;
                }
            }
        }
        clean
    }
}

struct WorkerContext {
    store: Store,
    publisher: EventPublisher,
    policy: RetryPolicy,
    request_timeout: Duration,
    throttle: Arc<Semaphore>,
    batch_id: String,
    binding: WorkflowBinding,
    control: watch::Receiver<BatchControl>,
    progress: Arc<ProgressTracker>,
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>) -> Result<()> {
    loop {
        if *ctx.control.borrow() != BatchControl::Running {
            debug!(batch_id = %ctx.batch_id, worker_id, "worker stopping on control signal");
            return Ok(());
        }

        let Ok(permit) = ctx.throttle.clone().acquire_owned().await else {
            return Ok(());
        };

        // The ceiling wait can outlast a pause or cancel signal.
        if *ctx.control.borrow() != BatchControl::Running {
            return Ok(());
        }

        let Some(task) = ctx.store.claim_next_task(&ctx.batch_id).await? else {
            debug!(batch_id = %ctx.batch_id, worker_id, "no pending tasks left");
            return Ok(());
        };

        let outcome = process_task(&ctx, task).await;
        drop(permit);
        outcome?;

        ctx.progress.maybe_emit().await;
    }
}

async fn process_task(ctx: &WorkerContext, task: Task) -> Result<()> {
    // A cancel that landed between claim and dispatch: no remote call.
    if *ctx.control.borrow() == BatchControl::Cancelling {
        ctx.store.cancel_task(&task.id).await?;
        return Ok(());
    }

    let attempt = ctx.store.record_attempt(&task.id).await?;
    ctx.publisher.publish(ProgressEvent::TaskStarted {
        batch_id: task.batch_id.clone(),
        task_id: task.id.clone(),
        source_row_index: task.source_row_index,
        attempt,
    });

    // Every call gets its own client; one call's completion must not be
    // able to tear down another call's connections.
    let client = match WorkflowClient::new(&ctx.binding, ctx.request_timeout) {
        Ok(client) => client,
        Err(e) => {
            return fail_task(ctx, &task, e.kind(), &e.to_string(), None).await;
        }
    };

    let mut control = ctx.control.clone();
    let outcome = tokio::select! {
        result = client.run(&task.inputs) => Some(result),
        _ = cancelled(&mut control) => None,
    };

    match outcome {
        // Aborted mid-flight: the outcome (if any ever arrives remotely)
        // is discarded.
        None => {
            info!(
                batch_id = %task.batch_id,
                task_id = %task.id,
                "in-flight call abandoned by cancellation"
            );
            ctx.store.cancel_task(&task.id).await?;
            Ok(())
        }

        Some(Ok(run)) => {
            ctx.store
                .record_external_run_id(&task.id, &run.external_run_id)
                .await?;
            match run.status {
                RunStatus::Succeeded => {
                    let text = run.result_text();
                    let applied = ctx
                        .store
                        .complete_task_success(&task.id, &text, Some(&run.external_run_id))
                        .await?;
                    if applied {
                        ctx.publisher.publish(ProgressEvent::TaskSucceeded {
                            batch_id: task.batch_id.clone(),
                            task_id: task.id.clone(),
                            source_row_index: task.source_row_index,
                            elapsed_ms: run.elapsed_ms,
                        });
                    }
                    Ok(())
                }
                RunStatus::Failed => {
                    let detail = run
                        .error_detail
                        .unwrap_or_else(|| "workflow reported failure".to_string());
                    fail_task(
                        ctx,
                        &task,
                        ErrorKind::Application,
                        &detail,
                        Some(&run.external_run_id),
                    )
                    .await
                }
            }
        }

        Some(Err(e)) => {
            let kind = e.kind();
            if kind.is_retryable() && attempt < task.max_attempts {
                let delay = ctx.policy.backoff(attempt);
                warn!(
                    batch_id = %task.batch_id,
                    task_id = %task.id,
                    attempt,
                    max_attempts = task.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retryable failure, backing off"
                );
                let mut control = ctx.control.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        ctx.store.requeue_task(&task.id).await?;
                    }
                    _ = cancelled(&mut control) => {
                        ctx.store.cancel_task(&task.id).await?;
                    }
                }
                Ok(())
            } else {
                fail_task(ctx, &task, kind, &e.to_string(), None).await
            }
        }
    }
}

async fn fail_task(
    ctx: &WorkerContext,
    task: &Task,
    kind: ErrorKind,
    detail: &str,
    external_run_id: Option<&str>,
) -> Result<()> {
    let applied = ctx
        .store
        .complete_task_failure(&task.id, kind, detail, external_run_id)
        .await?;
    if applied {
        warn!(
            batch_id = %task.batch_id,
            task_id = %task.id,
            error_kind = %kind,
            "task failed"
        );
        ctx.publisher.publish(ProgressEvent::TaskFailed {
            batch_id: task.batch_id.clone(),
            task_id: task.id.clone(),
            source_row_index: task.source_row_index,
            error_kind: kind,
            error_detail: detail.to_string(),
        });
    }
    Ok(())
}

/// Resolve only when the batch enters `Cancelling`. Never resolves if the
/// control channel closes, so a dropped sender cannot abort calls.
async fn cancelled(control: &mut watch::Receiver<BatchControl>) {
    loop {
        if *control.borrow() == BatchControl::Cancelling {
            return;
        }
        if control.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
