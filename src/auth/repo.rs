use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::store::{JsonStore, StoreError};

impl User {
    /// Find a user by email, ignoring ASCII case.
    pub async fn find_by_email(
        db: &JsonStore<User>,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        db.find(|u| u.email.eq_ignore_ascii_case(email)).await
    }

    pub async fn find_by_id(db: &JsonStore<User>, id: Uuid) -> Result<Option<User>, StoreError> {
        db.find(|u| u.id == id).await
    }

    /// Create a new user with a hashed password. Returns `None` when the
    /// email is already registered.
    pub async fn create(
        db: &JsonStore<User>,
        email: &str,
        password_hash: &str,
        name: &str,
    ) -> Result<Option<User>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        db.insert_unless(user, |u| u.email.eq_ignore_ascii_case(email))
            .await
    }
}
