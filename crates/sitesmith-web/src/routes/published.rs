//! Anonymous read paths. Everything here goes through the publication gate.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{Html, Json};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use sitesmith_core::publish;

use super::parse_id;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/project/published", get(list_published))
        .route("/project/published/{project_id}", get(published_code))
        .route("/view/{project_id}", get(view_published))
}

async fn list_published(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let projects = publish::list_published(&state.storage).await?;
    Ok(Json(json!({ "projects": projects })))
}

async fn published_code(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let project_id = parse_id(&project_id, "Project")?;
    let code = publish::public_code(&state.storage, project_id).await?;
    Ok(Json(json!({ "code": code })))
}

async fn view_published(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Html<String>, ApiError> {
    let project_id = parse_id(&project_id, "Project")?;
    Ok(Html(publish::public_code(&state.storage, project_id).await?))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use axum::http::StatusCode;
    use sitesmith_core::model::{Project, Version};
    use sitesmith_core::storage::StorageBackend;
    use tower::ServiceExt;

    use crate::AppState;

    async fn published_project(state: &AppState, publish: bool) -> Project {
        seed_user(state, "u1", 10).await;
        let project = Project::new("u1".into(), "a gallery for prints".into(), 50);
        state.storage.create_project(&project).await.unwrap();
        state
            .storage
            .commit_version(&Version::new(project.id, "<h1>Prints</h1>".into(), "Initial version"))
            .await
            .unwrap();
        if publish {
            state.storage.toggle_published(project.id, "u1").await.unwrap();
        }
        project
    }

    #[tokio::test]
    async fn published_code_is_public() {
        let state = test_app_state();
        let project = published_project(&state, true).await;

        let resp = test_router(&state)
            .oneshot(request("GET", &format!("/project/published/{}", project.id), None, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["code"], "<h1>Prints</h1>");

        let resp = test_router(&state)
            .oneshot(request("GET", &format!("/view/{}", project.id), None, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp.into_body()).await, "<h1>Prints</h1>");
    }

    #[tokio::test]
    async fn unpublished_code_is_not_found() {
        let state = test_app_state();
        let project = published_project(&state, false).await;

        for uri in [
            format!("/project/published/{}", project.id),
            format!("/view/{}", project.id),
        ] {
            let resp = test_router(&state)
                .oneshot(request("GET", &uri, None, None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn unpublishing_revokes_access_immediately() {
        let state = test_app_state();
        let project = published_project(&state, true).await;
        state.storage.toggle_published(project.id, "u1").await.unwrap();

        let resp = test_router(&state)
            .oneshot(request("GET", &format!("/project/published/{}", project.id), None, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_includes_owner_name() {
        let state = test_app_state();
        published_project(&state, true).await;

        let resp = test_router(&state)
            .oneshot(request("GET", "/project/published", None, None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        let projects = json["projects"].as_array().unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0]["user"]["name"], "u1");
        assert_eq!(projects[0]["isPublished"], true);
    }
}
