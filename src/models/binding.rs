//! Workflow binding: endpoint, credential, cached schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::WorkflowSchema;

/// One registered remote workflow: base URL, credential and the cached
/// parameter schema synchronized from the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowBinding {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub base_url: String,
    pub credential: String,
    pub schema: Option<WorkflowSchema>,
    pub synced_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowBinding {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        base_url: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description,
            base_url: normalize_base_url(base_url.into()),
            credential: credential.into(),
            schema: None,
            synced_at: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Schema accessor for callers that require a synced binding.
    pub fn schema(&self) -> Option<&WorkflowSchema> {
        self.schema.as_ref()
    }
}

/// Trailing slashes are stripped so endpoint paths can be joined uniformly.
pub fn normalize_base_url(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}
