//! Single-shot remote workflow client.
//!
//! One client instance serves exactly one in-flight call. Each instance
//! owns its own transport; closing or dropping one call's client can never
//! tear down connections in use by another task's call. Sharing one
//! long-lived HTTP context across concurrent calls is forbidden.

mod error;
mod extract;

pub use error::ClientError;
pub use extract::extract_result_text;

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::models::{TaskInputs, WorkflowBinding, WorkflowParameter, WorkflowSchema};

/// Terminal status reported by the remote service for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Parsed response of one workflow run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub external_run_id: String,
    pub status: RunStatus,
    /// The remote `data` object; outputs are extracted from it on demand.
    pub data: Value,
    pub elapsed_ms: u64,
    pub error_detail: Option<String>,
}

impl RunResult {
    /// Displayable result string per the output extraction rule.
    pub fn result_text(&self) -> String {
        extract_result_text(&self.data)
    }
}

/// HTTP client bound to one binding and one call.
pub struct WorkflowClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl WorkflowClient {
    /// Build a fresh client for a single call against `binding`.
    pub fn new(binding: &WorkflowBinding, timeout: Duration) -> Result<Self, ClientError> {
        use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", binding.credential))
            .map_err(|e| ClientError::Configuration(format!("invalid credential: {e}")))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url: binding.base_url.clone(),
            timeout,
        })
    }

    /// Issue the single blocking workflow-run request.
    #[instrument(skip(self, inputs), fields(base_url = %self.base_url))]
    pub async fn run(&self, inputs: &TaskInputs) -> Result<RunResult, ClientError> {
        let url = format!("{}/workflows/run", self.base_url);
        let body = json!({
            "inputs": inputs,
            "response_mode": "blocking",
            "user": "batch-user",
        });

        debug!(url = %url, "dispatching workflow run");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(e, self.timeout))?;

        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        parse_run_response(&text)
    }

    /// Fetch the workflow parameter schema (`GET {base_url}/parameters`).
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn fetch_parameters(&self) -> Result<WorkflowSchema, ClientError> {
        let url = format!("{}/parameters", self.base_url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(e, self.timeout))?;

        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        parse_parameters_response(&text)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.chars().take(500).collect())
}

fn parse_run_response(text: &str) -> Result<RunResult, ClientError> {
    let body: Value = serde_json::from_str(text)
        .map_err(|e| ClientError::Protocol(format!("response is not JSON: {e}")))?;

    let data = body
        .get("data")
        .cloned()
        .ok_or_else(|| ClientError::Protocol("response missing 'data' object".to_string()))?;
    if !data.is_object() {
        return Err(ClientError::Protocol(
            "response 'data' is not an object".to_string(),
        ));
    }

    let external_run_id = body
        .get("workflow_run_id")
        .and_then(Value::as_str)
        .or_else(|| data.get("id").and_then(Value::as_str))
        .ok_or_else(|| ClientError::Protocol("response missing run id".to_string()))?
        .to_string();

    let status = match data.get("status").and_then(Value::as_str) {
        Some("succeeded") => RunStatus::Succeeded,
        Some("failed") | Some("stopped") => RunStatus::Failed,
        Some(other) => {
            return Err(ClientError::Protocol(format!(
                "unexpected run status '{other}'"
            )))
        }
        None => return Err(ClientError::Protocol("response missing run status".to_string())),
    };

    let elapsed_ms = data
        .get("elapsed_time")
        .and_then(Value::as_f64)
        .map(|seconds| (seconds * 1000.0) as u64)
        .unwrap_or(0);

    let error_detail = data
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(RunResult {
        external_run_id,
        status,
        data,
        elapsed_ms,
        error_detail,
    })
}

fn parse_parameters_response(text: &str) -> Result<WorkflowSchema, ClientError> {
    let body: Value = serde_json::from_str(text)
        .map_err(|e| ClientError::Protocol(format!("schema response is not JSON: {e}")))?;

    let form = body
        .get("user_input_form")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ClientError::Protocol("schema response missing 'user_input_form'".to_string())
        })?;

    let mut parameters = Vec::new();
    for item in form {
        let Some(widgets) = item.as_object() else {
            continue;
        };
        // Each entry is keyed by its input widget type, e.g.
        // {"paragraph": {"variable": "query", "label": "...", ...}}.
        for (widget, param) in widgets {
            let name = param
                .get("variable")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if name.is_empty() {
                continue;
            }
            parameters.push(WorkflowParameter {
                name,
                parameter_type: WorkflowSchema::map_widget_type(widget),
                required: param.get("required").and_then(Value::as_bool).unwrap_or(false),
                description: param
                    .get("label")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                default: param
                    .get("default")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                options: param.get("options").and_then(Value::as_array).map(|opts| {
                    opts.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                }),
            });
        }
    }

    Ok(WorkflowSchema { parameters })
}
