use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use sitesmith_core::{billing, ledger, publish};

use super::parse_id;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/credits", get(get_credits))
        .route("/publish-toggle/{project_id}", get(toggle_publish))
        .route("/purchase-credits", post(purchase_credits))
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    #[serde(rename = "planId", default)]
    pub plan_id: String,
}

async fn get_credits(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let credits = ledger::balance(&state.storage, &user_id).await?;
    Ok(Json(json!({ "credits": credits })))
}

async fn toggle_publish(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let project_id = parse_id(&project_id, "Project")?;
    let (published, message) = publish::toggle_publish(&state.storage, project_id, &user_id).await?;
    Ok(Json(json!({ "message": message, "isPublished": published })))
}

async fn purchase_credits(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<Value>, ApiError> {
    let link = billing::start_checkout(
        &state.storage,
        &state.payments,
        &state.config,
        &user_id,
        &req.plan_id,
    )
    .await?;
    Ok(Json(json!({ "payment_link": link })))
}
