use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// One conversation entry. The assistant role covers both model replies and
/// status narration written by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(project_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            project_id,
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(project_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(project_id, Role::User, content)
    }

    pub fn assistant(project_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(project_id, Role::Assistant, content)
    }
}
