use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `users.json`, `projects.json` and `files.json`.
    pub data_dir: PathBuf,
    /// Directory holding uploaded blobs.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "cellhub".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "cellhub-users".into()),
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 60 * 24 * 7),
        };
        let storage = StorageConfig {
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "./data".into())
                .into(),
            upload_dir: std::env::var("UPLOAD_DIR")
                .unwrap_or_else(|_| "./uploads".into())
                .into(),
            max_upload_bytes: parsed_or("MAX_UPLOAD_BYTES", 100 * 1024 * 1024),
        };
        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parsed_or("APP_PORT", 8000),
            cors_origin: std::env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            jwt,
            storage,
        })
    }

    pub fn users_file(&self) -> PathBuf {
        self.storage.data_dir.join("users.json")
    }

    pub fn projects_file(&self) -> PathBuf {
        self.storage.data_dir.join("projects.json")
    }

    pub fn files_file(&self) -> PathBuf {
        self.storage.data_dir.join("files.json")
    }
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}
