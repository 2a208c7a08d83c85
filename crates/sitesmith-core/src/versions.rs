use uuid::Uuid;

use crate::error::{Result, SitesmithError};
use crate::model::{Message, Project, Version};
use crate::projects::owned_project;
use crate::prompts;
use crate::storage::StorageBackend;

/// Versions of an owned project, oldest first.
pub async fn list_versions(
    storage: &impl StorageBackend,
    project_id: Uuid,
    user_id: &str,
) -> Result<Vec<Version>> {
    owned_project(storage, project_id, user_id).await?;
    storage.list_versions(project_id).await
}

/// Point the project back at an earlier version. Later versions stay in
/// place, so rolling forward again is just another rollback.
pub async fn rollback(
    storage: &impl StorageBackend,
    project_id: Uuid,
    user_id: &str,
    version_id: Uuid,
) -> Result<Project> {
    owned_project(storage, project_id, user_id).await?;

    let version = match storage.get_version(version_id).await {
        Ok(v) if v.project_id == project_id => v,
        Ok(_) | Err(SitesmithError::NotFound(_)) => {
            return Err(SitesmithError::NotFound(format!(
                "version {version_id} in project {project_id}"
            )));
        }
        Err(e) => return Err(e),
    };

    storage
        .set_current_code(project_id, &version.code, &version.id.to_string())
        .await?;
    storage
        .append_message(&Message::assistant(
            project_id,
            prompts::rolled_back(&version.id.to_string()),
        ))
        .await?;

    tracing::info!(%project_id, version_id = %version.id, "rolled back");
    storage.get_project(project_id).await
}
