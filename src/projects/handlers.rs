use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{CreateProjectRequest, ProjectResponse, UpdateProjectRequest},
    repo::ProjectChanges,
    repo_types::Project,
};
use crate::{auth::AuthUser, error::AppError, state::AppState};

pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/", get(list_projects).post(create_project))
        .route(
            "/projects/:id",
            get(get_project).put(update_project).delete(delete_project),
        )
}

fn not_found() -> AppError {
    AppError::NotFound("Project not found".into())
}

fn required_name(name: Option<String>) -> Result<String, AppError> {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("Project name is required".into()))
}

/// A malformed id cannot name an existing project.
fn project_id(id: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    id.map(|Path(id)| id).map_err(|_| not_found())
}

#[instrument(skip(state))]
pub async fn list_projects(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ProjectResponse>>, AppError> {
    let projects = Project::list_by_user(&state.projects, user_id).await?;
    Ok(Json(projects.into_iter().map(ProjectResponse::from).collect()))
}

#[instrument(skip(state, payload))]
pub async fn create_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProjectResponse>), AppError> {
    let Json(payload) = payload?;
    let name = required_name(payload.name)?;
    let description = payload.description.map(|d| d.trim().to_string());

    let project = Project::create(&state.projects, user_id, &name, description).await?;
    info!(project_id = %project.id, %user_id, "project created");
    Ok((StatusCode::CREATED, Json(project.into())))
}

#[instrument(skip(state, id))]
pub async fn get_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ProjectResponse>, AppError> {
    let id = project_id(id)?;
    let project = Project::find_by_id(&state.projects, id)
        .await?
        .ok_or_else(not_found)?;

    if project.user_id != user_id {
        warn!(project_id = %id, %user_id, "project access denied");
        return Err(AppError::Forbidden("Access denied".into()));
    }
    Ok(Json(project.into()))
}

#[instrument(skip(state, id, payload))]
pub async fn update_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateProjectRequest>, JsonRejection>,
) -> Result<Json<ProjectResponse>, AppError> {
    let id = project_id(id)?;

    // Ownership is checked before the body so strangers always see 404.
    let owned = Project::find_by_id(&state.projects, id)
        .await?
        .is_some_and(|p| p.user_id == user_id);
    if !owned {
        return Err(not_found());
    }

    let Json(payload) = payload?;
    let changes = ProjectChanges {
        name: required_name(payload.name)?,
        description: payload.description.map(|d| d.trim().to_string()),
        status: payload.status,
    };
    let project = Project::update_owned(&state.projects, id, user_id, changes)
        .await?
        .ok_or_else(not_found)?;

    info!(project_id = %id, %user_id, "project updated");
    Ok(Json(project.into()))
}

#[instrument(skip(state, id))]
pub async fn delete_project(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let id = project_id(id)?;
    Project::delete_owned(&state.projects, id, user_id)
        .await?
        .ok_or_else(not_found)?;

    info!(project_id = %id, %user_id, "project deleted");
    Ok(StatusCode::NO_CONTENT)
}
