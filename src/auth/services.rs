use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use crate::{
    auth::{
        dto::{AuthResponse, PublicUser, RegisterRequest},
        jwt::JwtKeys,
        password::{check_password, hash_password, PasswordCheck},
        repo_types::User,
    },
    error::AppError,
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Empty strings count as missing, the way form fields arrive from the UI.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub async fn register_user(state: &AppState, req: RegisterRequest) -> Result<User, AppError> {
    let name = present(req.name).or_else(|| present(req.username));
    let (Some(email), Some(password), Some(name)) = (present(req.email), present(req.password), name)
    else {
        return Err(AppError::BadRequest(
            "Email, password and name are required".into(),
        ));
    };

    let email = normalize_email(&email);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::BadRequest("Invalid email".into()));
    }

    // Cheap early exit; `User::create` re-checks under the store lock.
    if User::find_by_email(&state.users, &email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::BadRequest("Email already registered".into()));
    }

    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(anyhow::Error::from)??;

    let user = User::create(&state.users, &email, &hash, name.trim())
        .await?
        .ok_or_else(|| AppError::BadRequest("Email already registered".into()))?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

pub async fn authenticate(state: &AppState, email: &str, password: &str) -> Result<User, AppError> {
    let email = normalize_email(email);
    let Some(user) = User::find_by_email(&state.users, &email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    };

    let plain = password.to_string();
    let hash = user.password_hash.clone();
    let check = tokio::task::spawn_blocking(move || check_password(&plain, &hash))
        .await
        .map_err(anyhow::Error::from)?;

    match check {
        PasswordCheck::Match => {}
        PasswordCheck::Mismatch => {
            warn!(email = %email, user_id = %user.id, "login invalid password");
            return Err(AppError::Unauthorized("Invalid credentials".into()));
        }
        PasswordCheck::Unsupported => {
            warn!(user_id = %user.id, "stored password hash is not argon2; login refused");
            return Err(AppError::Unauthorized("Invalid credentials".into()));
        }
    }

    info!(user_id = %user.id, "user logged in");
    Ok(user)
}

pub fn issue_token(keys: &JwtKeys, user: &User) -> Result<AuthResponse, AppError> {
    let access_token = keys.sign(user.id, &user.email)?;
    Ok(AuthResponse {
        access_token,
        token_type: "bearer",
        user: PublicUser::from(user),
    })
}
