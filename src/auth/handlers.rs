use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthResponse, MeResponse, RegisterRequest},
        extractors::{AuthUser, Credentials},
        repo_types::User,
        services::{authenticate, issue_token, register_user},
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/token", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(payload) = payload?;
    let user = register_user(&state, payload).await?;
    Ok(Json(issue_token(&state.jwt, &user)?))
}

#[instrument(skip(state, creds))]
pub async fn login(
    State(state): State<AppState>,
    Credentials(creds): Credentials,
) -> Result<Json<AuthResponse>, AppError> {
    let (Some(username), Some(password)) = (creds.username, creds.password) else {
        return Err(AppError::BadRequest(
            "Username and password are required".into(),
        ));
    };
    if username.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(
            "Username and password are required".into(),
        ));
    }

    let user = authenticate(&state, &username, &password).await?;
    Ok(Json(issue_token(&state.jwt, &user)?))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MeResponse>, AppError> {
    let user = User::find_by_id(&state.users, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(Json(MeResponse::from(user)))
}
