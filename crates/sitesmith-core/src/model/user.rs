use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An account, as provisioned by the external auth layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub credits: i64,
    #[serde(rename = "totalCreation")]
    pub total_creation: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            credits: 0,
            total_creation: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_credits(mut self, credits: i64) -> Self {
        self.credits = credits;
        self
    }
}

/// An authenticated browser session: opaque token mapped to a user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            token: Uuid::new_v4().simple().to_string(),
            user_id: user_id.into(),
            expires_at: Utc::now() + ttl,
        }
    }
}
