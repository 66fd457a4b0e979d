//! Output extraction from a remote run's `data` object.
//!
//! Shared by the client and the result assembler: given the run data, the
//! displayable result string is derived by (a) preferring `outputs`, else a
//! top-level `output`, else `result`; (b) descending once if `outputs`
//! nests another `outputs` object; (c) joining map values in insertion
//! order after filtering reserved bookkeeping keys; (d) falling back to the
//! `"no output"` sentinel when nothing displayable remains.

use serde_json::Value;

const NO_OUTPUT: &str = "no output";

/// Bookkeeping keys the remote mixes into output maps.
const RESERVED_KEYS: [&str; 9] = [
    "id",
    "workflow_id",
    "status",
    "elapsed_time",
    "total_tokens",
    "total_steps",
    "created_at",
    "finished_at",
    "error",
];

/// Derive the displayable result string from a run's `data` object.
pub fn extract_result_text(data: &Value) -> String {
    let candidate = ["outputs", "output", "result"]
        .iter()
        .find_map(|key| data.get(*key).filter(|v| !v.is_null()));

    let Some(mut value) = candidate else {
        return NO_OUTPUT.to_string();
    };

    // Some remotes wrap the output map in a second `outputs` level.
    if let Some(nested) = value.get("outputs") {
        if nested.is_object() {
            value = nested;
        }
    }

    match value {
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
                .filter_map(|(_, v)| flatten_value(v))
                .collect();
            if parts.is_empty() {
                NO_OUTPUT.to_string()
            } else {
                parts.join("\n")
            }
        }
        other => flatten_value(other).unwrap_or_else(|| NO_OUTPUT.to_string()),
    }
}

/// Render one output value as display text. Structured values are flattened
/// through their compact JSON form, which loses type information.
fn flatten_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(s.clone())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_outputs_map() {
        let data = json!({"outputs": {"text": "hello"}, "output": "ignored"});
        assert_eq!(extract_result_text(&data), "hello");
    }

    #[test]
    fn nested_outputs_descends_once() {
        let data = json!({"outputs": {"outputs": {"result": "A", "confidence": "0.9"}}});
        assert_eq!(extract_result_text(&data), "A\n0.9");
    }

    #[test]
    fn reserved_keys_filtered() {
        let data = json!({"outputs": {
            "id": "run-1",
            "workflow_id": "wf-1",
            "status": "succeeded",
            "elapsed_time": 0.4,
            "total_tokens": 12,
            "total_steps": 3,
            "created_at": 1,
            "finished_at": 2,
            "error": null,
            "answer": "42"
        }});
        assert_eq!(extract_result_text(&data), "42");
    }

    #[test]
    fn falls_back_to_output_then_result() {
        assert_eq!(
            extract_result_text(&json!({"output": "direct"})),
            "direct"
        );
        assert_eq!(
            extract_result_text(&json!({"result": "legacy"})),
            "legacy"
        );
    }

    #[test]
    fn empty_yields_sentinel() {
        assert_eq!(extract_result_text(&json!({})), NO_OUTPUT);
        assert_eq!(extract_result_text(&json!({"outputs": {}})), NO_OUTPUT);
        assert_eq!(
            extract_result_text(&json!({"outputs": {"text": "  "}})),
            NO_OUTPUT
        );
        assert_eq!(extract_result_text(&json!({"outputs": null})), NO_OUTPUT);
    }

    #[test]
    fn multiple_values_join_in_insertion_order() {
        let data = json!({"outputs": {"first": "a", "second": "b", "third": "c"}});
        assert_eq!(extract_result_text(&data), "a\nb\nc");
    }

    #[test]
    fn structured_values_flatten_to_json() {
        let data = json!({"outputs": {"items": ["x", "y"], "score": 3}});
        assert_eq!(extract_result_text(&data), "[\"x\",\"y\"]\n3");
    }
}
