//! Shared test harness: an in-process mock of the remote workflow service
//! and workbook/service builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use flowbatch::config::FlowBatchConfig;
use flowbatch::state_machine::BatchState;
use flowbatch::store::Store;
use flowbatch::BatchService;

/// Scripted behavior of the mock remote workflow service.
#[derive(Default)]
pub struct MockBehavior {
    /// HTTP statuses returned (in order) before calls start succeeding.
    pub fail_first: Vec<u16>,
    /// Status every call returns; overrides everything else.
    pub always_status: Option<u16>,
    /// Respond 200 with `status = failed` instead of succeeding.
    pub application_failure: bool,
    /// Base latency applied to every successful call.
    pub delay: Duration,
    /// Per-input-value latency overrides (keyed by the first input value).
    pub delay_per_value: HashMap<String, Duration>,
    /// Response `outputs` override; `{input}` is replaced by the first
    /// input value when the override is a string template.
    pub outputs_override: Option<Value>,
}

struct MockState {
    behavior: MockBehavior,
    fail_queue: Mutex<VecDeque<u16>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    schema_status: Option<u16>,
    parameter: String,
}

/// Handle to a running mock remote.
#[derive(Clone)]
pub struct MockRemote {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockRemote {
    pub async fn start(parameter: &str, behavior: MockBehavior) -> Self {
        Self::start_inner(parameter, behavior, None).await
    }

    /// A remote whose schema endpoint answers with the given HTTP status.
    pub async fn start_with_schema_status(parameter: &str, status: u16) -> Self {
        Self::start_inner(parameter, MockBehavior::default(), Some(status)).await
    }

    async fn start_inner(
        parameter: &str,
        behavior: MockBehavior,
        schema_status: Option<u16>,
    ) -> Self {
        let fail_queue = Mutex::new(behavior.fail_first.iter().copied().collect());
        let state = Arc::new(MockState {
            behavior,
            fail_queue,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            schema_status,
            parameter: parameter.to_string(),
        });

        let app = Router::new()
            .route("/parameters", get(parameters_handler))
            .route("/workflows/run", post(run_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously in-flight run calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

async fn parameters_handler(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    if let Some(status) = state.schema_status {
        return (
            StatusCode::from_u16(status).unwrap(),
            Json(json!({"message": "schema rejected"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "user_input_form": [
                {"paragraph": {
                    "variable": state.parameter,
                    "label": "test parameter",
                    "required": true
                }}
            ]
        })),
    )
}

async fn run_handler(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let call = state.calls.fetch_add(1, Ordering::SeqCst);

    if let Some(status) = state.behavior.always_status {
        return (
            StatusCode::from_u16(status).unwrap(),
            Json(json!({"message": "scripted failure"})),
        );
    }
    if let Some(status) = state.fail_queue.lock().unwrap().pop_front() {
        return (
            StatusCode::from_u16(status).unwrap(),
            Json(json!({"message": "transient failure"})),
        );
    }

    let input_value = body
        .get("inputs")
        .and_then(Value::as_object)
        .and_then(|inputs| inputs.values().next())
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let delay = state
        .behavior
        .delay_per_value
        .get(&input_value)
        .copied()
        .unwrap_or(state.behavior.delay);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    let run_id = format!("run-{call}");
    if state.behavior.application_failure {
        return (
            StatusCode::OK,
            Json(json!({
                "workflow_run_id": run_id,
                "task_id": format!("task-{call}"),
                "data": {
                    "id": run_id,
                    "status": "failed",
                    "error": "workflow node exploded",
                    "elapsed_time": 0.01
                }
            })),
        );
    }

    let outputs = match &state.behavior.outputs_override {
        Some(value) => value.clone(),
        None => json!({"text": format!("ok:{input_value}")}),
    };
    (
        StatusCode::OK,
        Json(json!({
            "workflow_run_id": run_id,
            "task_id": format!("task-{call}"),
            "data": {
                "id": run_id,
                "workflow_id": "wf-test",
                "status": "succeeded",
                "outputs": outputs,
                "elapsed_time": 0.01,
                "total_tokens": 7
            }
        })),
    )
}

/// Workbook bytes with the given rows on the `batch_data` sheet.
pub fn workbook(rows: &[&[&str]]) -> Vec<u8> {
    let mut book = umya_spreadsheet::new_file();
    let sheet = book.new_sheet("batch_data").unwrap();
    for (r, cells) in rows.iter().enumerate() {
        for (c, value) in cells.iter().enumerate() {
            if !value.is_empty() {
                sheet
                    .get_cell_mut(((c + 1) as u32, (r + 1) as u32))
                    .set_value(*value);
            }
        }
    }
    let mut cursor = std::io::Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(&book, &mut cursor).unwrap();
    cursor.into_inner()
}

/// A single-parameter sheet: header plus one data row per value.
pub fn single_column_workbook(parameter: &str, values: &[&str]) -> Vec<u8> {
    let mut rows: Vec<Vec<&str>> = vec![vec![parameter]];
    for value in values.iter().copied() {
        rows.push(vec![value]);
    }
    let borrowed: Vec<&[&str]> = rows.iter().map(|r| r.as_slice()).collect();
    workbook(&borrowed)
}

/// Read one cell of the `batch_data` sheet from workbook bytes.
pub fn read_cell(bytes: &[u8], col: u32, row: u32) -> String {
    let book =
        umya_spreadsheet::reader::xlsx::read_reader(std::io::Cursor::new(bytes.to_vec()), true)
            .unwrap();
    book.get_sheet_by_name("batch_data")
        .unwrap()
        .get_value((col, row))
}

/// Fast-retry configuration for tests.
pub fn test_config() -> FlowBatchConfig {
    let mut config = FlowBatchConfig::default();
    config.database_url = "sqlite::memory:".to_string();
    config.progress_tick_ms = 20;
    config.batch.request_timeout_ms = 5_000;
    config.retry.base_delay_ms = 10;
    config.retry.multiplier = 2.0;
    config.retry.max_delay_ms = 100;
    config
}

/// Service over an in-memory store with a binding registered against the
/// given mock remote.
pub async fn service_with_binding(remote: &MockRemote) -> (BatchService, String) {
    let config = test_config();
    let store = Store::connect(&config.database_url).await.unwrap();
    let service = BatchService::with_store(store, config);
    let binding_id = service
        .create_binding("test workflow", None, remote.base_url.clone(), "secret")
        .await
        .unwrap();
    (service, binding_id)
}

/// Poll until the batch reaches `state` or the timeout elapses.
pub async fn wait_for_state(
    service: &BatchService,
    batch_id: &str,
    state: BatchState,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = service.get_batch(batch_id).await.unwrap();
        if status.state == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "batch {batch_id} stuck in {:?} waiting for {state:?} (counts: {:?})",
            status.state,
            status.counts,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until at least `n` tasks of the batch have succeeded.
pub async fn wait_for_succeeded(
    service: &BatchService,
    batch_id: &str,
    n: u32,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = service.get_batch(batch_id).await.unwrap();
        if status.counts.succeeded >= n {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "batch {batch_id} never reached {n} succeeded (counts: {:?})",
            status.counts,
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
