use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{Project, ProjectStatus};
use crate::store::{JsonStore, StoreError};

/// Field values applied by an update. `description` replaces the stored
/// one outright; `status` is kept when `None`.
pub struct ProjectChanges {
    pub name: String,
    pub description: Option<String>,
    pub status: Option<ProjectStatus>,
}

impl Project {
    pub async fn list_by_user(
        db: &JsonStore<Project>,
        user_id: Uuid,
    ) -> Result<Vec<Project>, StoreError> {
        db.filter(|p| p.user_id == user_id).await
    }

    pub async fn find_by_id(
        db: &JsonStore<Project>,
        id: Uuid,
    ) -> Result<Option<Project>, StoreError> {
        db.find(|p| p.id == id).await
    }

    pub async fn create(
        db: &JsonStore<Project>,
        user_id: Uuid,
        name: &str,
        description: Option<String>,
    ) -> Result<Project, StoreError> {
        let now = OffsetDateTime::now_utc();
        db.insert(Project {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            description,
            status: ProjectStatus::Draft,
            file_count: 0,
            cell_count: 0,
            created_at: now,
            updated_at: now,
        })
        .await
    }

    /// Update a project the caller owns; `None` if no such project.
    pub async fn update_owned(
        db: &JsonStore<Project>,
        id: Uuid,
        user_id: Uuid,
        changes: ProjectChanges,
    ) -> Result<Option<Project>, StoreError> {
        db.update_where(
            |p| p.id == id && p.user_id == user_id,
            |p| {
                p.name = changes.name;
                p.description = changes.description;
                if let Some(status) = changes.status {
                    p.status = status;
                }
                p.updated_at = OffsetDateTime::now_utc();
            },
        )
        .await
    }

    /// Delete a project the caller owns; `None` if no such project.
    pub async fn delete_owned(
        db: &JsonStore<Project>,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Project>, StoreError> {
        db.remove_where(|p| p.id == id && p.user_id == user_id)
            .await
    }
}
