use uuid::Uuid;

use super::repo_types::FileRecord;
use crate::store::{JsonStore, StoreError};

impl FileRecord {
    /// Files of one project that belong to `user_id`.
    pub async fn list_for_project(
        db: &JsonStore<FileRecord>,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<FileRecord>, StoreError> {
        db.filter(|f| f.project_id == project_id && f.user_id == user_id)
            .await
    }

    pub async fn find_by_id(
        db: &JsonStore<FileRecord>,
        id: Uuid,
    ) -> Result<Option<FileRecord>, StoreError> {
        db.find(|f| f.id == id).await
    }

    pub async fn insert(db: &JsonStore<FileRecord>, record: FileRecord) -> Result<FileRecord, StoreError> {
        db.insert(record).await
    }

    pub async fn remove_by_id(
        db: &JsonStore<FileRecord>,
        id: Uuid,
    ) -> Result<Option<FileRecord>, StoreError> {
        db.remove_where(|f| f.id == id).await
    }
}
