use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SitesmithError};

use super::{Message, TimelineEvent, Version};

pub const MAX_PROMPT_LENGTH: usize = 10_000;
pub const MAX_CODE_LENGTH: usize = 2_000_000;

/// Validate a creation prompt or revision request. Returns the trimmed text.
pub fn validate_prompt(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SitesmithError::InvalidInput(
            "Please enter a valid prompt".into(),
        ));
    }
    if trimmed.len() > MAX_PROMPT_LENGTH {
        return Err(SitesmithError::InvalidInput(format!(
            "prompt exceeds maximum length of {MAX_PROMPT_LENGTH} characters"
        )));
    }
    Ok(trimmed)
}

/// Validate hand-edited code submitted from the preview.
pub fn validate_code(code: &str) -> Result<()> {
    if code.trim().is_empty() {
        return Err(SitesmithError::InvalidInput("code is required".into()));
    }
    if code.len() > MAX_CODE_LENGTH {
        return Err(SitesmithError::InvalidInput(format!(
            "code exceeds maximum length of {MAX_CODE_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// Derive a display name from the initial prompt: the first `max_chars`
/// characters, followed by `...` when the prompt was longer.
pub fn project_name(prompt: &str, max_chars: usize) -> String {
    let trimmed = prompt.trim();
    if trimmed.chars().count() > max_chars {
        let head: String = trimmed.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

/// A generated website. `current_code` is `None` until the first generation lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub name: String,
    pub initial_prompt: String,
    pub current_code: Option<String>,
    /// Id of the version reflected in `current_code`, or `""` after a hand save.
    pub current_version_index: String,
    #[serde(rename = "isPublished")]
    pub is_published: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(user_id: String, initial_prompt: String, name_max_chars: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            name: project_name(&initial_prompt, name_max_chars),
            initial_prompt,
            current_code: None,
            current_version_index: String::new(),
            is_published: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// True while the first generation is still in flight.
    pub fn is_generating(&self) -> bool {
        self.current_code.is_none()
    }

    /// Code that may be served publicly, if any.
    pub fn public_code(&self) -> Option<&str> {
        if !self.is_published {
            return None;
        }
        self.current_code.as_deref().filter(|c| !c.is_empty())
    }
}

/// A project with its transcript and version history, as returned to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub conversation: Vec<Message>,
    pub versions: Vec<Version>,
    pub timeline: Vec<TimelineEvent>,
}

impl ProjectDetail {
    pub fn new(project: Project, conversation: Vec<Message>, versions: Vec<Version>) -> Self {
        let timeline = super::merge_timeline(&conversation, &versions);
        Self {
            project,
            conversation,
            versions,
            timeline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOwner {
    pub id: String,
    pub name: String,
}

/// A published project listed in the community feed.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedProject {
    #[serde(flatten)]
    pub project: Project,
    pub user: ProjectOwner,
}
