//! End-to-end batch execution scenarios against a mock remote service.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::*;
use flowbatch::models::ErrorKind;
use flowbatch::state_machine::{BatchState, TaskState};
use flowbatch::BatchOptions;

#[tokio::test]
async fn alignment_under_description_and_example_rows() {
    let remote = MockRemote::start("search_term", MockBehavior::default()).await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let sheet = workbook(&[
        &["search_term"],
        &["the term to search"],
        &["iPhone"],
        &["huawei"],
        &["xiaomi"],
        &["oppo"],
    ]);
    let batch_id = service
        .create_batch(&binding_id, &sheet, BatchOptions::default())
        .await
        .unwrap();

    let tasks = service.list_tasks(&batch_id, None).await.unwrap();
    let indices: Vec<u32> = tasks.iter().map(|t| t.source_row_index).collect();
    assert_eq!(indices, vec![3, 4, 5]);

    service.start_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;

    let output = service.download_result(&batch_id).await.unwrap();
    // Result column appended next to the single input column.
    assert_eq!(read_cell(&output, 2, 1), "execution_result");
    assert_eq!(read_cell(&output, 2, 4), "ok:huawei");
    assert_eq!(read_cell(&output, 2, 5), "ok:xiaomi");
    assert_eq!(read_cell(&output, 2, 6), "ok:oppo");
    // Header, description and example rows unchanged, result cells blank.
    assert_eq!(read_cell(&output, 1, 2), "the term to search");
    assert_eq!(read_cell(&output, 1, 3), "iPhone");
    assert_eq!(read_cell(&output, 2, 2), "");
    assert_eq!(read_cell(&output, 2, 3), "");
}

#[tokio::test]
async fn out_of_order_completion_keeps_row_order() {
    let values: Vec<String> = (0..10).map(|i| format!("v{i}")).collect();
    let mut delay_per_value = HashMap::new();
    // Every row is slow except v7, which finishes first.
    for value in &values {
        delay_per_value.insert(value.clone(), Duration::from_millis(150));
    }
    delay_per_value.insert("v7".to_string(), Duration::ZERO);

    let remote = MockRemote::start(
        "q",
        MockBehavior {
            delay_per_value,
            ..Default::default()
        },
    )
    .await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let value_refs: Vec<&str> = values.iter().map(String::as_str).collect();
    let sheet = single_column_workbook("q", &value_refs);
    let batch_id = service
        .create_batch(
            &binding_id,
            &sheet,
            BatchOptions {
                concurrency: Some(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut events = service.subscribe();
    service.start_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;

    // First completion observed belongs to v7's row (source row 8).
    let first_succeeded_row = loop {
        let published = events.recv().await.unwrap();
        if let flowbatch::events::ProgressEvent::TaskSucceeded {
            source_row_index, ..
        } = published.event
        {
            break source_row_index;
        }
    };
    assert_eq!(first_succeeded_row, 8);

    // Output is row-ordered regardless of completion order.
    let output = service.download_result(&batch_id).await.unwrap();
    for i in 0..10u32 {
        assert_eq!(read_cell(&output, 2, i + 2), format!("ok:v{i}"));
    }
}

#[tokio::test]
async fn retry_then_success() {
    let remote = MockRemote::start(
        "q",
        MockBehavior {
            fail_first: vec![503, 503],
            ..Default::default()
        },
    )
    .await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let sheet = single_column_workbook("q", &["huawei"]);
    let batch_id = service
        .create_batch(&binding_id, &sheet, BatchOptions::default())
        .await
        .unwrap();
    service.start_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;

    let tasks = service.list_tasks(&batch_id, None).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, TaskState::Succeeded);
    assert_eq!(tasks[0].attempts, 3);
    assert_eq!(tasks[0].output.as_deref(), Some("ok:huawei"));
    assert_eq!(remote.calls(), 3);
}

#[tokio::test]
async fn non_retryable_failure_fails_once() {
    let remote = MockRemote::start(
        "q",
        MockBehavior {
            always_status: Some(400),
            ..Default::default()
        },
    )
    .await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let sheet = single_column_workbook("q", &["huawei"]);
    let batch_id = service
        .create_batch(&binding_id, &sheet, BatchOptions::default())
        .await
        .unwrap();
    service.start_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;

    let tasks = service.list_tasks(&batch_id, None).await.unwrap();
    assert_eq!(tasks[0].state, TaskState::Failed);
    assert_eq!(tasks[0].attempts, 1);
    assert_eq!(tasks[0].error_kind, Some(ErrorKind::Permanent));
    assert_eq!(remote.calls(), 1);

    let output = service.download_result(&batch_id).await.unwrap();
    assert!(read_cell(&output, 2, 2).starts_with("[error:permanent]"));
}

#[tokio::test]
async fn application_failure_not_retried() {
    let remote = MockRemote::start(
        "q",
        MockBehavior {
            application_failure: true,
            ..Default::default()
        },
    )
    .await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let sheet = single_column_workbook("q", &["huawei"]);
    let batch_id = service
        .create_batch(&binding_id, &sheet, BatchOptions::default())
        .await
        .unwrap();
    service.start_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;

    let tasks = service.list_tasks(&batch_id, None).await.unwrap();
    assert_eq!(tasks[0].state, TaskState::Failed);
    assert_eq!(tasks[0].error_kind, Some(ErrorKind::Application));
    assert_eq!(tasks[0].attempts, 1);
    // The run id the remote reported is retained for the failed attempt.
    assert!(tasks[0].external_run_id.is_some());

    let output = service.download_result(&batch_id).await.unwrap();
    assert_eq!(
        read_cell(&output, 2, 2),
        "[error:application] workflow node exploded"
    );
}

#[tokio::test]
async fn pause_stops_claims_and_resume_finishes() {
    let remote = MockRemote::start(
        "q",
        MockBehavior {
            delay: Duration::from_millis(40),
            ..Default::default()
        },
    )
    .await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let values: Vec<String> = (0..30).map(|i| format!("item{i}")).collect();
    let value_refs: Vec<&str> = values.iter().map(String::as_str).collect();
    let sheet = single_column_workbook("q", &value_refs);
    let batch_id = service
        .create_batch(
            &binding_id,
            &sheet,
            BatchOptions {
                concurrency: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    service.start_batch(&batch_id).await.unwrap();
    wait_for_succeeded(&service, &batch_id, 5, Duration::from_secs(10)).await;
    service.pause_batch(&batch_id).await.unwrap();

    // In-flight tasks (at most the concurrency limit) drain to terminal.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let settled = loop {
        let status = service.get_batch(&batch_id).await.unwrap();
        assert_eq!(status.state, BatchState::Paused);
        if status.counts.running == 0 {
            break status.counts;
        }
        assert!(tokio::time::Instant::now() < deadline, "in-flight never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert!(settled.succeeded < 30);

    // No new claims while paused.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after_wait = service.get_batch(&batch_id).await.unwrap();
    assert_eq!(after_wait.counts.succeeded, settled.succeeded);
    assert_eq!(after_wait.counts.running, 0);

    service.resume_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(20)).await;
    let final_status = service.get_batch(&batch_id).await.unwrap();
    assert_eq!(final_status.counts.succeeded, 30);
}

#[tokio::test]
async fn cancel_sweeps_remaining_rows() {
    let remote = MockRemote::start(
        "q",
        MockBehavior {
            delay: Duration::from_millis(40),
            ..Default::default()
        },
    )
    .await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let values: Vec<String> = (0..20).map(|i| format!("item{i}")).collect();
    let value_refs: Vec<&str> = values.iter().map(String::as_str).collect();
    let sheet = single_column_workbook("q", &value_refs);
    let batch_id = service
        .create_batch(
            &binding_id,
            &sheet,
            BatchOptions {
                concurrency: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    service.start_batch(&batch_id).await.unwrap();
    wait_for_succeeded(&service, &batch_id, 3, Duration::from_secs(10)).await;
    service.cancel_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;

    let status = service.get_batch(&batch_id).await.unwrap();
    assert_eq!(status.counts.pending, 0);
    assert_eq!(status.counts.running, 0);
    assert_eq!(
        status.counts.succeeded + status.counts.failed + status.counts.cancelled,
        20
    );
    assert!(status.counts.cancelled > 0);

    let output = service.download_result(&batch_id).await.unwrap();
    let cancelled = service
        .list_tasks(&batch_id, Some(TaskState::Cancelled))
        .await
        .unwrap();
    for task in cancelled {
        let cell = read_cell(&output, 2, task.source_row_index + 1);
        assert!(cell.starts_with("[error:cancelled]"), "cell was '{cell}'");
    }

    // The runner winds down once the batch is terminal.
    service.coordinator().wait_for_idle(&batch_id).await;

    // Cancelling a completed batch is a no-op.
    service.cancel_batch(&batch_id).await.unwrap();
    let status = service.get_batch(&batch_id).await.unwrap();
    assert_eq!(status.state, BatchState::Completed);
}

#[tokio::test]
async fn concurrency_limit_bounds_in_flight_calls() {
    let remote = MockRemote::start(
        "q",
        MockBehavior {
            delay: Duration::from_millis(30),
            ..Default::default()
        },
    )
    .await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let values: Vec<String> = (0..20).map(|i| format!("item{i}")).collect();
    let value_refs: Vec<&str> = values.iter().map(String::as_str).collect();
    let sheet = single_column_workbook("q", &value_refs);
    let batch_id = service
        .create_batch(
            &binding_id,
            &sheet,
            BatchOptions {
                concurrency: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    service.start_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(20)).await;

    assert!(
        remote.max_in_flight() <= 3,
        "observed {} concurrent calls with limit 3",
        remote.max_in_flight()
    );
    let status = service.get_batch(&batch_id).await.unwrap();
    assert_eq!(status.counts.succeeded, 20);
}

#[tokio::test]
async fn starting_a_running_batch_is_a_noop() {
    let remote = MockRemote::start(
        "q",
        MockBehavior {
            delay: Duration::from_millis(30),
            ..Default::default()
        },
    )
    .await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let sheet = single_column_workbook("q", &["a", "b", "c", "d"]);
    let batch_id = service
        .create_batch(&binding_id, &sheet, BatchOptions::default())
        .await
        .unwrap();

    service.start_batch(&batch_id).await.unwrap();
    service.start_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;

    // Each row ran exactly once despite the double start.
    assert_eq!(remote.calls(), 4);
}

#[tokio::test]
async fn nested_outputs_flattened_into_cell() {
    let remote = MockRemote::start(
        "q",
        MockBehavior {
            outputs_override: Some(serde_json::json!({
                "outputs": {"result": "A", "confidence": "0.9"}
            })),
            ..Default::default()
        },
    )
    .await;
    let (service, binding_id) = service_with_binding(&remote).await;

    let sheet = single_column_workbook("q", &["x"]);
    let batch_id = service
        .create_batch(&binding_id, &sheet, BatchOptions::default())
        .await
        .unwrap();
    service.start_batch(&batch_id).await.unwrap();
    wait_for_state(&service, &batch_id, BatchState::Completed, Duration::from_secs(10)).await;

    let tasks = service.list_tasks(&batch_id, None).await.unwrap();
    assert_eq!(tasks[0].output.as_deref(), Some("A\n0.9"));
}
