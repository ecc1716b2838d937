use std::path::Path;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::repo_types::FileRecord;
use crate::{error::AppError, projects::repo_types::Project, state::AppState};

const ALLOWED_MIME_TYPES: &[&str] = &[
    "text/csv",
    "text/plain",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/x-hdf5",
    "application/octet-stream",
];

const ALLOWED_EXTENSIONS: &[&str] = &[".csv", ".txt", ".xlsx", ".xls", ".h5", ".h5ad", ".h5ad.gz"];

pub const INVALID_TYPE: &str = "Invalid file type. Only CSV, TXT, Excel, and H5 files are allowed.";

/// One buffered file from a multipart upload.
pub struct UploadItem {
    pub original_name: String,
    pub content_type: String,
    pub body: Bytes,
}

/// A file passes when either its MIME type or its name suffix is on the
/// allow-list.
pub fn is_allowed(original_name: &str, content_type: &str) -> bool {
    let lower = original_name.to_ascii_lowercase();
    ALLOWED_MIME_TYPES.contains(&content_type)
        || ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Last extension of `original_name` including the dot, or `""` when it
/// has none or it is not plain alphanumeric.
fn ext_from_name(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{e}"))
        .unwrap_or_default()
}

pub fn stored_name(id: Uuid, original_name: &str) -> String {
    format!("{}{}", id, ext_from_name(original_name))
}

/// The project must exist and belong to the caller.
async fn owned_project(state: &AppState, project_id: Uuid, user_id: Uuid) -> Result<Project, AppError> {
    let project = Project::find_by_id(&state.projects, project_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Project not found".into()))?;
    if project.user_id != user_id {
        warn!(%project_id, %user_id, "upload into foreign project");
        return Err(AppError::Forbidden("Access denied".into()));
    }
    Ok(project)
}

pub async fn upload_file(
    state: &AppState,
    user_id: Uuid,
    project_id: Uuid,
    item: UploadItem,
) -> Result<FileRecord, AppError> {
    owned_project(state, project_id, user_id).await?;

    if !is_allowed(&item.original_name, &item.content_type) {
        warn!(name = %item.original_name, content_type = %item.content_type, "rejected file type");
        return Err(AppError::BadRequest(INVALID_TYPE.into()));
    }

    let id = Uuid::new_v4();
    let filename = stored_name(id, &item.original_name);
    let file_size = item.body.len() as u64;
    state.storage.put_object(&filename, item.body).await?;

    let record = FileRecord {
        id,
        project_id,
        user_id,
        filename: filename.clone(),
        original_name: item.original_name,
        file_size,
        file_type: item.content_type,
        uploaded_at: OffsetDateTime::now_utc(),
    };
    let record = match FileRecord::insert(&state.files, record).await {
        Ok(r) => r,
        Err(e) => {
            if let Err(cleanup) = state.storage.delete_object(&filename).await {
                warn!(error = %cleanup, %filename, "orphaned blob after failed insert");
            }
            return Err(e.into());
        }
    };

    info!(file_id = %id, %project_id, size = file_size, "file uploaded");
    Ok(record)
}

pub async fn delete_file(state: &AppState, file_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
    let not_found = || AppError::NotFound("File not found".into());
    let file = FileRecord::find_by_id(&state.files, file_id)
        .await?
        .ok_or_else(not_found)?;
    if file.user_id != user_id {
        warn!(%file_id, %user_id, "file access denied");
        return Err(AppError::Forbidden("Access denied".into()));
    }

    FileRecord::remove_by_id(&state.files, file_id)
        .await?
        .ok_or_else(not_found)?;

    // The record is gone either way; a missing blob is only worth a log line.
    if let Err(e) = state.storage.delete_object(&file.filename).await {
        warn!(error = %e, filename = %file.filename, "failed to delete blob");
    }

    info!(%file_id, %user_id, "file deleted");
    Ok(())
}
