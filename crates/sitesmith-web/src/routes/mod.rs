pub mod projects;
pub mod published;
pub mod users;
pub mod webhook;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use sitesmith_core::storage::StorageBackend;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(projects::routes())
        .merge(published::routes())
        .merge(users::routes())
        .merge(webhook::routes())
        .fallback(not_found)
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = state.storage.ping().await.is_ok();

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "database": if db_ok { "connected" } else { "unavailable" },
            "llm_provider": state.llm.provider_name(),
        })),
    )
}

async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

/// Parse a path id. Malformed ids are indistinguishable from missing ones.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found(format!("{what} not found")))
}
