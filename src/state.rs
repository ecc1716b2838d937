use std::sync::Arc;

use crate::auth::{jwt::JwtKeys, repo_types::User};
use crate::config::AppConfig;
use crate::files::repo_types::FileRecord;
use crate::projects::repo_types::Project;
use crate::storage::{LocalStorage, StorageClient};
use crate::store::JsonStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<JsonStore<User>>,
    pub projects: Arc<JsonStore<Project>>,
    pub files: Arc<JsonStore<FileRecord>>,
    pub storage: Arc<dyn StorageClient>,
    pub jwt: JwtKeys,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        Self::from_config(AppConfig::from_env()?).await
    }

    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let users = Arc::new(JsonStore::new(config.users_file()));
        let projects = Arc::new(JsonStore::new(config.projects_file()));
        let files = Arc::new(JsonStore::new(config.files_file()));
        users.ensure().await?;
        projects.ensure().await?;
        files.ensure().await?;

        let local = LocalStorage::new(&config.storage.upload_dir).await?;
        tracing::info!(upload_dir = %local.root().display(), "blob storage ready");
        let storage = Arc::new(local) as Arc<dyn StorageClient>;
        let jwt = JwtKeys::from_config(&config.jwt);

        tracing::info!(
            users = %users.path().display(),
            projects = %projects.path().display(),
            files = %files.path().display(),
            "stores ready"
        );

        Ok(Self {
            config: Arc::new(config),
            users,
            projects,
            files,
            storage,
            jwt,
        })
    }

    /// State rooted in a scratch directory, for tests.
    #[cfg(test)]
    pub async fn fake(root: &std::path::Path) -> Self {
        use crate::config::{JwtConfig, StorageConfig};

        let config = AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origin: "http://localhost:3000".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            storage: StorageConfig {
                data_dir: root.join("data"),
                upload_dir: root.join("uploads"),
                max_upload_bytes: 1024 * 1024,
            },
        };
        Self::from_config(config).await.expect("fake state")
    }
}
