//! Row validation against the cached binding schema.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{ParameterType, WorkflowParameter, WorkflowSchema};

use super::parser::ParsedSheet;

/// One field error found while validating a parsed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowValidationError {
    /// Absolute 0-based row index in the original sheet.
    pub source_row_index: u32,
    pub field: String,
    pub message: String,
}

impl fmt::Display for RowValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {}: field '{}': {}",
            self.source_row_index, self.field, self.message
        )
    }
}

/// Validate every parsed row against the schema. An empty result means the
/// sheet is acceptable for batch creation.
pub fn validate_rows(sheet: &ParsedSheet, schema: &WorkflowSchema) -> Vec<RowValidationError> {
    let mut errors = Vec::new();

    for row in &sheet.rows {
        for param in schema.required_parameters() {
            let present = row
                .inputs
                .get(&param.name)
                .and_then(|v| v.as_str())
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !present {
                errors.push(RowValidationError {
                    source_row_index: row.source_row_index,
                    field: param.name.clone(),
                    message: "required parameter is missing".to_string(),
                });
            }
        }

        for (name, value) in &row.inputs {
            let Some(param) = schema.parameter(name) else {
                continue;
            };
            let Some(text) = value.as_str() else { continue };
            if text.trim().is_empty() {
                continue;
            }
            if let Some(message) = validate_value(param, text) {
                errors.push(RowValidationError {
                    source_row_index: row.source_row_index,
                    field: name.clone(),
                    message,
                });
            }
        }
    }

    errors
}

/// Type-check a single cell value. Returns a message on violation.
pub(crate) fn validate_value(param: &WorkflowParameter, value: &str) -> Option<String> {
    match param.parameter_type {
        ParameterType::Number => {
            if value.trim().parse::<f64>().is_err() {
                return Some(format!("'{value}' is not a number"));
            }
        }
        ParameterType::Select => {
            if let Some(options) = &param.options {
                if !options.iter().any(|o| o == value) {
                    return Some(format!("'{value}' is not one of {options:?}"));
                }
            }
        }
        ParameterType::String | ParameterType::Paragraph | ParameterType::File => {}
    }
    None
}
