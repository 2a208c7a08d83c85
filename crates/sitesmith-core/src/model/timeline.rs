use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Message, Version};

/// A conversation entry or a version, merged into one display stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineEvent {
    Message(Message),
    Version(Version),
}

impl TimelineEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Message(m) => m.timestamp,
            Self::Version(v) => v.timestamp,
        }
    }
}

/// Interleave messages and versions by timestamp. The sort is stable, so
/// entries sharing a timestamp keep messages ahead of versions.
pub fn merge_timeline(messages: &[Message], versions: &[Version]) -> Vec<TimelineEvent> {
    let mut events: Vec<TimelineEvent> = messages
        .iter()
        .cloned()
        .map(TimelineEvent::Message)
        .chain(versions.iter().cloned().map(TimelineEvent::Version))
        .collect();
    events.sort_by_key(|e| e.timestamp());
    events
}
