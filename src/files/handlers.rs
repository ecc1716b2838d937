use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::PathRejection,
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::FileResponse,
    repo_types::FileRecord,
    services::{delete_file, upload_file, UploadItem},
};
use crate::{auth::AuthUser, error::AppError, state::AppState};

// Headroom for multipart boundaries and part headers on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/files/project/:project_id", get(list_project_files))
}

pub fn write_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/files/upload/:project_id", post(upload))
        .route("/files/:id", delete(remove_file))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
}

fn uuid_or(id: Result<Path<Uuid>, PathRejection>, missing: &str) -> Result<Uuid, AppError> {
    id.map(|Path(id)| id)
        .map_err(|_| AppError::NotFound(missing.into()))
}

/// POST /files/upload/:project_id, multipart field `file`.
#[instrument(skip(state, project_id, mp))]
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    project_id: Result<Path<Uuid>, PathRejection>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<FileResponse>), AppError> {
    let project_id = uuid_or(project_id, "Project not found")?;
    let no_file = || AppError::BadRequest("No file uploaded".into());
    let mut mp = mp.map_err(|_| no_file())?;

    let mut item = None;
    while let Some(field) = mp.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".into());
        let body = field.bytes().await?;
        item = Some(UploadItem {
            original_name,
            content_type,
            body,
        });
        break;
    }
    let item = item.ok_or_else(no_file)?;

    if item.body.len() > state.config.storage.max_upload_bytes {
        return Err(AppError::PayloadTooLarge("File too large".into()));
    }

    let record = upload_file(&state, user_id, project_id, item).await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

#[instrument(skip(state, project_id))]
pub async fn list_project_files(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    project_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<FileResponse>>, AppError> {
    // An unparseable project id simply has no files.
    let Ok(Path(project_id)) = project_id else {
        return Ok(Json(Vec::new()));
    };
    let files = FileRecord::list_for_project(&state.files, project_id, user_id).await?;
    Ok(Json(files.into_iter().map(FileResponse::from).collect()))
}

#[instrument(skip(state, id))]
pub async fn remove_file(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let id = uuid_or(id, "File not found")?;
    delete_file(&state, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
