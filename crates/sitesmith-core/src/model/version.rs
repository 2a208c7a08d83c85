use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable snapshot of generated code. A revision appends a new one and
/// repoints the project; it never edits an existing version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: Uuid,
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    pub code: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl Version {
    pub fn new(project_id: Uuid, code: String, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            project_id,
            code,
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}
