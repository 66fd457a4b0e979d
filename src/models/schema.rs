//! Cached workflow parameter schema.
//!
//! The schema is fetched from the remote service by the registry and is the
//! authoritative description used for row validation and result assembly.
//! It is never inferred from row content.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSchema {
    pub parameters: Vec<WorkflowParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Number,
    Select,
    Paragraph,
    File,
}

impl WorkflowSchema {
    /// Parameters the uploaded sheet must provide a value for in every row.
    pub fn required_parameters(&self) -> impl Iterator<Item = &WorkflowParameter> {
        self.parameters.iter().filter(|p| p.required)
    }

    pub fn parameter(&self, name: &str) -> Option<&WorkflowParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Map a remote input-widget type onto the internal parameter type set.
    /// Unknown widget types degrade to plain strings.
    pub fn map_widget_type(widget: &str) -> ParameterType {
        match widget {
            "text-input" => ParameterType::String,
            "paragraph" => ParameterType::Paragraph,
            "number" => ParameterType::Number,
            "select" => ParameterType::Select,
            "file" => ParameterType::File,
            _ => ParameterType::String,
        }
    }
}
