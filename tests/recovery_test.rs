//! Restart recovery: batches interrupted mid-flight are re-materialized
//! and their in-flight tasks re-dispatched.

mod common;

use std::time::Duration;

use common::*;
use flowbatch::state_machine::{BatchState, TaskState};
use flowbatch::store::Store;
use flowbatch::{BatchOptions, BatchService};

#[tokio::test]
async fn restart_recovers_interrupted_batch() {
    let remote = MockRemote::start("q", MockBehavior::default()).await;

    let dir = tempfile::TempDir::new().unwrap();
    let database_url = format!("sqlite://{}", dir.path().join("flowbatch.db").display());
    let mut config = test_config();
    config.database_url = database_url.clone();

    // First process: create a binding and a batch, then die with the batch
    // marked running and two tasks claimed. The crash is simulated by
    // fabricating that exact store state and dropping the service.
    let batch_id;
    let interrupted_task_id;
    {
        let store = Store::connect(&database_url).await.unwrap();
        let service = BatchService::with_store(store.clone(), config.clone());
        let binding_id = service
            .create_binding("wf", None, remote.base_url.clone(), "secret")
            .await
            .unwrap();
        let sheet = single_column_workbook("q", &["a", "b", "c", "d", "e"]);
        batch_id = service
            .create_batch(&binding_id, &sheet, BatchOptions::default())
            .await
            .unwrap();

        store
            .update_batch_state(&batch_id, BatchState::Running)
            .await
            .unwrap();
        store.mark_batch_started(&batch_id).await.unwrap();

        let first = store.claim_next_task(&batch_id).await.unwrap().unwrap();
        store.record_attempt(&first.id).await.unwrap();
        interrupted_task_id = first.id;
        store.claim_next_task(&batch_id).await.unwrap().unwrap();
    }

    // Second process: recover and let the batch run to completion.
    let store = Store::connect(&database_url).await.unwrap();
    let service = BatchService::with_store(store, config);
    let recovered = service.recover().await.unwrap();
    assert_eq!(recovered, 1);

    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;

    let tasks = service.list_tasks(&batch_id, None).await.unwrap();
    assert_eq!(tasks.len(), 5);
    assert!(tasks.iter().all(|t| t.state == TaskState::Succeeded));

    // The interrupted task was dispatched once before the crash and once
    // after recovery; only recovery legitimately makes attempts exceed the
    // completed-call count.
    let interrupted = tasks
        .iter()
        .find(|t| t.id == interrupted_task_id)
        .unwrap();
    assert_eq!(interrupted.attempts, 2);
}

#[tokio::test]
async fn cancelling_batch_recovers_to_completed() {
    let remote = MockRemote::start("q", MockBehavior::default()).await;

    let dir = tempfile::TempDir::new().unwrap();
    let database_url = format!("sqlite://{}", dir.path().join("flowbatch.db").display());
    let mut config = test_config();
    config.database_url = database_url.clone();

    let batch_id;
    {
        let store = Store::connect(&database_url).await.unwrap();
        let service = BatchService::with_store(store.clone(), config.clone());
        let binding_id = service
            .create_binding("wf", None, remote.base_url.clone(), "secret")
            .await
            .unwrap();
        let sheet = single_column_workbook("q", &["a", "b", "c"]);
        batch_id = service
            .create_batch(&binding_id, &sheet, BatchOptions::default())
            .await
            .unwrap();
        store
            .update_batch_state(&batch_id, BatchState::Cancelling)
            .await
            .unwrap();
    }

    let store = Store::connect(&database_url).await.unwrap();
    let service = BatchService::with_store(store, config);
    service.recover().await.unwrap();

    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;
    let status = service.get_batch(&batch_id).await.unwrap();
    assert_eq!(status.counts.cancelled, 3);
    // No remote calls were made for a batch that was already cancelling.
    assert_eq!(remote.calls(), 0);
}
