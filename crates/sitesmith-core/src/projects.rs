//! Owner-scoped project reads and deletion.

use uuid::Uuid;

use crate::error::{Result, SitesmithError};
use crate::model::{Project, ProjectDetail};
use crate::storage::StorageBackend;

/// Load a project only if `user_id` owns it. Someone else's project is
/// reported as missing.
pub async fn owned_project(
    storage: &impl StorageBackend,
    project_id: Uuid,
    user_id: &str,
) -> Result<Project> {
    let project = storage.get_project(project_id).await?;
    if project.user_id != user_id {
        return Err(SitesmithError::NotFound(format!("project {project_id}")));
    }
    Ok(project)
}

/// Project with its conversation, versions and merged timeline.
pub async fn project_detail(
    storage: &impl StorageBackend,
    project_id: Uuid,
    user_id: &str,
) -> Result<ProjectDetail> {
    let project = owned_project(storage, project_id, user_id).await?;
    let conversation = storage.list_messages(project_id).await?;
    let versions = storage.list_versions(project_id).await?;
    Ok(ProjectDetail::new(project, conversation, versions))
}

pub async fn list_projects(storage: &impl StorageBackend, user_id: &str) -> Result<Vec<Project>> {
    storage.list_projects(user_id).await
}

/// Delete a project with its versions and conversation.
pub async fn delete_project(
    storage: &impl StorageBackend,
    project_id: Uuid,
    user_id: &str,
) -> Result<()> {
    owned_project(storage, project_id, user_id).await?;
    storage.delete_project(project_id).await?;
    tracing::info!(%project_id, user_id, "project deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, User, Version};
    use crate::storage::SqliteStorage;

    async fn setup() -> (SqliteStorage, Project) {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .save_user(&User::new("owner", "Owner", "o@example.com"))
            .await
            .unwrap();
        let project = Project::new("owner".into(), "a cafe menu".into(), 50);
        storage.create_project(&project).await.unwrap();
        (storage, project)
    }

    #[tokio::test]
    async fn stranger_sees_not_found() {
        let (storage, project) = setup().await;
        assert!(matches!(
            owned_project(&storage, project.id, "stranger").await,
            Err(SitesmithError::NotFound(_))
        ));
        assert!(matches!(
            delete_project(&storage, project.id, "stranger").await,
            Err(SitesmithError::NotFound(_))
        ));
        assert!(storage.get_project(project.id).await.is_ok());
    }

    #[tokio::test]
    async fn detail_merges_timeline() {
        let (storage, project) = setup().await;
        storage
            .append_message(&Message::user(project.id, "a cafe menu"))
            .await
            .unwrap();
        storage
            .commit_version(&Version::new(project.id, "<html></html>".into(), "Initial version"))
            .await
            .unwrap();
        storage
            .append_message(&Message::assistant(project.id, "done"))
            .await
            .unwrap();

        let detail = project_detail(&storage, project.id, "owner").await.unwrap();
        assert_eq!(detail.conversation.len(), 2);
        assert_eq!(detail.versions.len(), 1);
        assert_eq!(detail.timeline.len(), 3);
        let stamps: Vec<_> = detail.timeline.iter().map(|e| e.timestamp()).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn owner_can_delete() {
        let (storage, project) = setup().await;
        delete_project(&storage, project.id, "owner").await.unwrap();
        assert!(list_projects(&storage, "owner").await.unwrap().is_empty());
    }
}
