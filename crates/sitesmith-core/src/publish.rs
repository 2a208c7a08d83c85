//! Publication gate: the published flag is the only thing that exposes a
//! project's code to anonymous readers.

use uuid::Uuid;

use crate::error::{Result, SitesmithError};
use crate::model::PublishedProject;
use crate::storage::StorageBackend;

/// Flip the published flag. Returns the new state and a status line.
///
/// The flip is a single store update scoped to the owner, so concurrent
/// toggles each observe a distinct state.
pub async fn toggle_publish(
    storage: &impl StorageBackend,
    project_id: Uuid,
    user_id: &str,
) -> Result<(bool, &'static str)> {
    let published = storage.toggle_published(project_id, user_id).await?;
    tracing::info!(%project_id, published, "publication toggled");

    let message = if published {
        "Project published successfully"
    } else {
        "Project unpublished successfully"
    };
    Ok((published, message))
}

/// Code of a published project for anonymous readers. Reads the flag fresh
/// on every call.
pub async fn public_code(storage: &impl StorageBackend, project_id: Uuid) -> Result<String> {
    let project = storage.get_project(project_id).await?;
    project
        .public_code()
        .map(str::to_string)
        .ok_or_else(|| SitesmithError::NotFound(format!("project {project_id}")))
}

pub async fn list_published(storage: &impl StorageBackend) -> Result<Vec<PublishedProject>> {
    storage.list_published().await
}
