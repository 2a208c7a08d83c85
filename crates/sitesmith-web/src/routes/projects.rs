use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{Html, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use sitesmith_core::{pipeline, preview, projects, versions};

use super::parse_id;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/project", post(create_project))
        .route("/projects", get(list_projects))
        .route("/project/{project_id}", get(get_project).delete(delete_project))
        .route("/project/revision/{project_id}", post(revise_project))
        .route(
            "/project/rollback/{project_id}/{version_id}",
            get(rollback_version),
        )
        .route("/project/save/{project_id}", put(save_project))
        .route("/project/preview/{project_id}", get(preview_project))
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    #[serde(default)]
    pub initial_prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct RevisionRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PreviewQuery {
    #[serde(default)]
    pub editable: bool,
}

// -- Handlers --

/// Register the project and debit its cost, then generate in the background.
/// The client polls `GET /project/{id}` until code appears.
async fn create_project(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Json<Value>, ApiError> {
    let project = pipeline::start_project(
        &state.storage,
        &user_id,
        &req.initial_prompt,
        &state.config.generation,
    )
    .await?;
    let project_id = project.id;

    let worker = state.clone();
    tokio::spawn(async move {
        let cost = worker.config.generation.cost;
        if let Err(e) =
            pipeline::generate_project(&worker.storage, &worker.llm, &project, cost).await
        {
            tracing::warn!(%project_id, "background generation failed: {e}");
        }
    });

    Ok(Json(json!({ "projectId": project_id })))
}

async fn revise_project(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(project_id): Path<String>,
    Json(req): Json<RevisionRequest>,
) -> Result<Json<Value>, ApiError> {
    let project_id = parse_id(&project_id, "Project")?;
    pipeline::revise_project(
        &state.storage,
        &state.llm,
        project_id,
        &user_id,
        &req.message,
        state.config.generation.cost,
    )
    .await?;
    Ok(Json(json!({ "message": "Changes made successfully" })))
}

async fn get_project(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let project_id = parse_id(&project_id, "Project")?;
    let detail = projects::project_detail(&state.storage, project_id, &user_id).await?;
    Ok(Json(json!({ "project": detail })))
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let projects = projects::list_projects(&state.storage, &user_id).await?;
    Ok(Json(json!({ "projects": projects })))
}

async fn rollback_version(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((project_id, version_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let project_id = parse_id(&project_id, "Project")?;
    let version_id = parse_id(&version_id, "Version")?;
    versions::rollback(&state.storage, project_id, &user_id, version_id).await?;
    Ok(Json(json!({ "message": "Version rolled back" })))
}

async fn save_project(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(project_id): Path<String>,
    Json(req): Json<SaveRequest>,
) -> Result<Json<Value>, ApiError> {
    let project_id = parse_id(&project_id, "Project")?;
    preview::save_project_code(&state.storage, project_id, &user_id, &req.code).await?;
    Ok(Json(json!({ "message": "Project saved successfully" })))
}

async fn delete_project(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let project_id = parse_id(&project_id, "Project")?;
    projects::delete_project(&state.storage, project_id, &user_id).await?;
    Ok(Json(json!({ "message": "Project deleted successfully" })))
}

/// Owner-only document. `?editable=true` injects the selection helper.
async fn preview_project(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(project_id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<Html<String>, ApiError> {
    let project_id = parse_id(&project_id, "Project")?;
    let doc = preview::render_preview(&state.storage, project_id, &user_id, query.editable).await?;
    Ok(Html(doc))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::testing::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use sitesmith_core::model::{Project, Version};
    use sitesmith_core::preview::HELPER_SCRIPT_ID;
    use sitesmith_core::storage::StorageBackend;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::AppState;

    async fn project_with_code(state: &AppState, user_id: &str, code: &str) -> (Project, Version) {
        let project = Project::new(user_id.to_string(), "portfolio for a potter".into(), 50);
        state.storage.create_project(&project).await.unwrap();
        let version = Version::new(project.id, code.to_string(), "Initial version");
        state.storage.commit_version(&version).await.unwrap();
        (project, version)
    }

    #[tokio::test]
    async fn create_requires_session() {
        let state = test_app_state();
        let body = json!({ "initial_prompt": "a bakery" });
        let resp = test_router(&state)
            .oneshot(request("POST", "/project", None, Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = test_router(&state)
            .oneshot(request("POST", "/project", Some("bogus"), Some(body)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_with_short_balance_is_forbidden() {
        let state = test_app_state();
        let token = seed_user(&state, "u1", 3).await;

        let resp = test_router(&state)
            .oneshot(request(
                "POST",
                "/project",
                Some(&token),
                Some(json!({ "initial_prompt": "landing page for a bakery" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(state.storage.list_projects("u1").await.unwrap().is_empty());
        assert_eq!(state.storage.get_user("u1").await.unwrap().credits, 3);
    }

    #[tokio::test]
    async fn create_with_blank_prompt_is_bad_request() {
        let state = test_app_state();
        let token = seed_user(&state, "u1", 10).await;

        let resp = test_router(&state)
            .oneshot(request("POST", "/project", Some(&token), Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.storage.get_user("u1").await.unwrap().credits, 10);
    }

    #[tokio::test]
    async fn create_returns_id_then_generates_in_background() {
        let state = test_app_state();
        let token = seed_user(&state, "u1", 10).await;

        let resp = test_router(&state)
            .oneshot(request(
                "POST",
                "/project",
                Some(&token),
                Some(json!({ "initial_prompt": "landing page for a bakery" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        let project_id = json["projectId"].as_str().unwrap().to_string();
        assert_eq!(state.storage.get_user("u1").await.unwrap().credits, 5);

        // Poll the way the client does.
        let mut detail = serde_json::Value::Null;
        for _ in 0..100 {
            let resp = test_router(&state)
                .oneshot(request("GET", &format!("/project/{project_id}"), Some(&token), None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            detail = body_json(resp.into_body()).await;
            if detail["project"]["current_code"].is_string() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let project = &detail["project"];
        assert!(project["current_code"].as_str().unwrap().contains("bakery"));
        assert_eq!(project["versions"].as_array().unwrap().len(), 1);
        assert_eq!(
            project["current_version_index"],
            project["versions"][0]["id"]
        );
        assert!(project["conversation"].as_array().unwrap().len() >= 3);
        assert_eq!(state.storage.get_user("u1").await.unwrap().credits, 5);
    }

    #[tokio::test]
    async fn revision_adds_version_and_charges() {
        let state = test_app_state();
        let token = seed_user(&state, "u1", 20).await;
        let (project, _) = project_with_code(&state, "u1", "<html><body>old</body></html>").await;

        let resp = test_router(&state)
            .oneshot(request(
                "POST",
                &format!("/project/revision/{}", project.id),
                Some(&token),
                Some(json!({ "message": "make the header blue" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.into_body()).await;
        assert_eq!(json["message"], "Changes made successfully");

        assert_eq!(state.storage.list_versions(project.id).await.unwrap().len(), 2);
        assert_eq!(state.storage.get_user("u1").await.unwrap().credits, 15);
    }

    #[tokio::test]
    async fn revision_with_empty_message_is_rejected_without_charge() {
        let state = test_app_state();
        let token = seed_user(&state, "u1", 20).await;
        let (project, _) = project_with_code(&state, "u1", "<p>x</p>").await;

        let resp = test_router(&state)
            .oneshot(request(
                "POST",
                &format!("/project/revision/{}", project.id),
                Some(&token),
                Some(json!({ "message": "  " })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.storage.get_user("u1").await.unwrap().credits, 20);
    }

    #[tokio::test]
    async fn strangers_and_bad_ids_get_not_found() {
        let state = test_app_state();
        seed_user(&state, "owner", 10).await;
        let stranger = seed_user(&state, "stranger", 10).await;
        let (project, _) = project_with_code(&state, "owner", "<p>mine</p>").await;

        for uri in [
            format!("/project/{}", project.id),
            format!("/project/{}", Uuid::now_v7()),
            "/project/not-a-uuid".to_string(),
            format!("/project/preview/{}", project.id),
        ] {
            let resp = test_router(&state)
                .oneshot(request("GET", &uri, Some(&stranger), None))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn list_returns_only_own_projects() {
        let state = test_app_state();
        let token = seed_user(&state, "u1", 10).await;
        seed_user(&state, "u2", 10).await;
        project_with_code(&state, "u1", "<p>a</p>").await;
        project_with_code(&state, "u2", "<p>b</p>").await;

        let resp = test_router(&state)
            .oneshot(request("GET", "/projects", Some(&token), None))
            .await
            .unwrap();
        let json = body_json(resp.into_body()).await;
        let projects = json["projects"].as_array().unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0]["userId"], "u1");
    }

    #[tokio::test]
    async fn rollback_save_and_delete_flow() {
        let state = test_app_state();
        let token = seed_user(&state, "u1", 10).await;
        let (project, v1) = project_with_code(&state, "u1", "<p>one</p>").await;
        let v2 = Version::new(project.id, "<p>two</p>".into(), "changes made");
        state.storage.commit_version(&v2).await.unwrap();

        let resp = test_router(&state)
            .oneshot(request(
                "GET",
                &format!("/project/rollback/{}/{}", project.id, v1.id),
                Some(&token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let current = state.storage.get_project(project.id).await.unwrap();
        assert_eq!(current.current_code.as_deref(), Some("<p>one</p>"));
        assert_eq!(current.current_version_index, v1.id.to_string());

        let resp = test_router(&state)
            .oneshot(request(
                "PUT",
                &format!("/project/save/{}", project.id),
                Some(&token),
                Some(json!({ "code": "<p>hand edited</p>" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let saved = state.storage.get_project(project.id).await.unwrap();
        assert_eq!(saved.current_code.as_deref(), Some("<p>hand edited</p>"));
        assert_eq!(saved.current_version_index, "");
        assert_eq!(state.storage.list_versions(project.id).await.unwrap().len(), 2);

        let resp = test_router(&state)
            .oneshot(request(
                "PUT",
                &format!("/project/save/{}", project.id),
                Some(&token),
                Some(json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test_router(&state)
            .oneshot(request("DELETE", &format!("/project/{}", project.id), Some(&token), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.storage.list_versions(project.id).await.unwrap().is_empty());

        let resp = test_router(&state)
            .oneshot(request("GET", &format!("/project/{}", project.id), Some(&token), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preview_injects_helper_only_when_editable() {
        let state = test_app_state();
        let token = seed_user(&state, "u1", 10).await;
        let code = "<html><body><h1>Hi</h1></body></html>";
        let (project, _) = project_with_code(&state, "u1", code).await;

        let resp = test_router(&state)
            .oneshot(request(
                "GET",
                &format!("/project/preview/{}", project.id),
                Some(&token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp.into_body()).await, code);

        let resp = test_router(&state)
            .oneshot(request(
                "GET",
                &format!("/project/preview/{}?editable=true", project.id),
                Some(&token),
                None,
            ))
            .await
            .unwrap();
        let html = body_text(resp.into_body()).await;
        assert!(html.contains(HELPER_SCRIPT_ID));
        assert!(html.ends_with("</body></html>"));
    }

    #[tokio::test]
    async fn session_cookie_authenticates() {
        let state = test_app_state();
        let token = seed_user(&state, "u1", 10).await;
        let cookie = format!("{}={token}", state.config.web.session_cookie);

        let req = axum::http::Request::builder()
            .uri("/projects")
            .header("cookie", cookie)
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = test_router(&state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
