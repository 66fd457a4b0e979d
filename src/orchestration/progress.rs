//! Debounced batch progress reporting.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::events::{EventPublisher, ProgressEvent};
use crate::models::BatchCounts;
use crate::store::Store;

/// Emits `batch_progress` events, at most one per progress tick. Workers
/// call [`maybe_emit`](Self::maybe_emit) after every terminal transition;
/// the coordinator forces a final snapshot with
/// [`emit_now`](Self::emit_now).
pub struct ProgressTracker {
    store: Store,
    publisher: EventPublisher,
    batch_id: String,
    tick: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressTracker {
    pub fn new(store: Store, publisher: EventPublisher, batch_id: String, tick: Duration) -> Self {
        Self {
            store,
            publisher,
            batch_id,
            tick,
            last_emit: Mutex::new(None),
        }
    }

    /// Emit a progress event unless one was emitted within the last tick.
    pub async fn maybe_emit(&self) {
        {
            let mut last = self.last_emit.lock().await;
            if let Some(at) = *last {
                if at.elapsed() < self.tick {
                    return;
                }
            }
            *last = Some(Instant::now());
        }
        self.emit().await;
    }

    /// Emit a progress snapshot regardless of the debounce window.
    pub async fn emit_now(&self) {
        *self.last_emit.lock().await = Some(Instant::now());
        self.emit().await;
    }

    async fn emit(&self) {
        let counts = match self.store.batch_counts(&self.batch_id).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(batch_id = %self.batch_id, error = %e, "progress snapshot failed");
                return;
            }
        };
        let estimated_remaining_ms = self.estimate_remaining(&counts).await;
        self.publisher.publish(ProgressEvent::BatchProgress {
            batch_id: self.batch_id.clone(),
            percent: counts.percent_complete(),
            counts,
            estimated_remaining_ms,
        });
    }

    /// Naive estimate: mean latency of terminal tasks times remaining work.
    async fn estimate_remaining(&self, counts: &BatchCounts) -> Option<u64> {
        if counts.terminal() == 0 {
            return None;
        }
        let batch = self.store.get_batch(&self.batch_id).await.ok()??;
        let started_at = batch.started_at?;
        let elapsed_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
        let mean_ms = elapsed_ms / counts.terminal() as u64;
        let remaining = (counts.pending + counts.running) as u64;
        Some(mean_ms * remaining)
    }
}
