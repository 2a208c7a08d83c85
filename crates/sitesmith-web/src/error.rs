use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use sitesmith_core::error::SitesmithError;

/// JSON API error, rendered as `{ "message": ... }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<SitesmithError> for ApiError {
    fn from(err: SitesmithError) -> Self {
        match &err {
            SitesmithError::Unauthorized(_) => Self::unauthorized("Unauthorized user"),
            SitesmithError::InsufficientCredits { .. } => {
                Self::new(StatusCode::FORBIDDEN, err.to_string())
            }
            SitesmithError::InvalidInput(_) => Self::bad_request(err.to_string()),
            SitesmithError::NotFound(_) => Self::not_found(err.to_string()),
            SitesmithError::GenerationFailed(_)
            | SitesmithError::Upstream(_)
            | SitesmithError::Http(_) => {
                tracing::warn!("upstream error: {err}");
                Self::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            _ => {
                // Storage and config detail stays in the log.
                tracing::error!("api error: {err}");
                Self::internal("Internal server error")
            }
        }
    }
}
