//! Session authentication. Sessions are issued by the external auth service
//! and stored in the `sessions` table; requests present the token either as a
//! cookie or as a bearer token.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use sitesmith_core::storage::StorageBackend;

use crate::error::ApiError;
use crate::AppState;

/// Id of the user behind a valid session.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| cookie_value(parts, &state.config.web.session_cookie))
            .ok_or_else(|| ApiError::unauthorized("Unauthorized user"))?;

        match state.storage.resolve_session(&token).await? {
            Some(user_id) => Ok(AuthUser(user_id)),
            None => Err(ApiError::unauthorized("Unauthorized user")),
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}
