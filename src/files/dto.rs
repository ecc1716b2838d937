use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::FileRecord;

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub filename: String,
    pub original_name: String,
    pub file_size: u64,
    pub file_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

impl From<FileRecord> for FileResponse {
    fn from(f: FileRecord) -> Self {
        Self {
            id: f.id,
            project_id: f.project_id,
            filename: f.filename,
            original_name: f.original_name,
            file_size: f.file_size,
            file_type: f.file_type,
            uploaded_at: f.uploaded_at,
        }
    }
}
