use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use sitesmith_core::billing::{self, WebhookOutcome};

use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/stripe", post(stripe_webhook))
}

/// Stripe webhook. The body must stay raw bytes for signature verification.
async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let outcome = billing::handle_webhook(
        &state.storage,
        &state.payments,
        &state.config,
        &body,
        signature,
    )
    .await?;

    match outcome {
        WebhookOutcome::Credited {
            transaction_id,
            user_id,
            credits,
        } => tracing::info!(%transaction_id, %user_id, credits, "payment applied"),
        WebhookOutcome::AlreadyApplied(transaction_id) => {
            tracing::info!(%transaction_id, "duplicate payment delivery ignored")
        }
        WebhookOutcome::Ignored(reason) => tracing::debug!("webhook ignored: {reason}"),
    }

    Ok(Json(json!({ "received": true })))
}
