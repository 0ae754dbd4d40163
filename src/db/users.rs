//! User repository.

use anyhow::Result;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::sqlite_helpers::now_iso8601;
use crate::db::Database;

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: String,
    pub external_identity_id: Option<String>,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub is_server_owner: bool,
    pub is_active: bool,
    pub is_local: bool,
    pub password_hash: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl UserRecord {
    /// A user is implicitly admin for all purposes if it is the irrevocable
    /// server owner, or carries the legacy admin flag (§9).
    pub fn is_effectively_admin(&self) -> bool {
        self.is_server_owner || self.is_admin
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateUser {
    pub external_identity_id: Option<String>,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_server_owner: bool,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub email: Option<Option<String>>,
    pub display_name: Option<Option<String>>,
    pub avatar_url: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub is_admin: Option<bool>,
    pub password_hash: Option<Option<String>>,
}

#[derive(Clone)]
pub struct UsersRepository {
    pool: Database,
}

impl UsersRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user: CreateUser) -> Result<UserRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_iso8601();
        let is_local = user.password_hash.is_some();

        sqlx::query(
            r#"
            INSERT INTO users (
                id, external_identity_id, username, email, display_name, avatar_url,
                is_admin, is_server_owner, is_active, is_local, password_hash,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, 1, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&user.external_identity_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.avatar_url)
        .bind(user.is_server_owner as i32)
        .bind(is_local as i32)
        .bind(&user.password_hash)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("failed to create user"))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(sqlx::query_as(
            "SELECT id, external_identity_id, username, email, display_name, avatar_url, \
             is_admin, is_server_owner, is_active, is_local, password_hash, created_at, updated_at \
             FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(sqlx::query_as(
            "SELECT id, external_identity_id, username, email, display_name, avatar_url, \
             is_admin, is_server_owner, is_active, is_local, password_hash, created_at, updated_at \
             FROM users WHERE username = ? COLLATE NOCASE",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_all(&self) -> Result<Vec<UserRecord>> {
        Ok(sqlx::query_as(
            "SELECT id, external_identity_id, username, email, display_name, avatar_url, \
             is_admin, is_server_owner, is_active, is_local, password_hash, created_at, updated_at \
             FROM users ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn has_server_owner(&self) -> Result<bool> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_server_owner = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 > 0)
    }

    pub async fn update(&self, id: &str, update: UpdateUser) -> Result<Option<UserRecord>> {
        let now = now_iso8601();
        if let Some(email) = update.email {
            sqlx::query("UPDATE users SET email = ?, updated_at = ? WHERE id = ?")
                .bind(email)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(display_name) = update.display_name {
            sqlx::query("UPDATE users SET display_name = ?, updated_at = ? WHERE id = ?")
                .bind(display_name)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(avatar_url) = update.avatar_url {
            sqlx::query("UPDATE users SET avatar_url = ?, updated_at = ? WHERE id = ?")
                .bind(avatar_url)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(is_active) = update.is_active {
            sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
                .bind(is_active as i32)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(is_admin) = update.is_admin {
            sqlx::query("UPDATE users SET is_admin = ?, updated_at = ? WHERE id = ?")
                .bind(is_admin as i32)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(password_hash) = update.password_hash {
            sqlx::query(
                "UPDATE users SET password_hash = ?, is_local = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&password_hash)
            .bind(password_hash.is_some() as i32)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        self.get_by_id(id).await
    }

    /// Delete a user. Blocked at the caller level while `media_requests` rows
    /// reference it (§3 "Ownership"); this method performs the raw delete.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn has_requests_referencing(&self, id: &str) -> Result<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM media_requests WHERE user_id = ? OR approved_by = ?",
        )
        .bind(id)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_and_fetch_user() {
        let repo = UsersRepository::new(pool().await);
        let created = repo
            .create(CreateUser {
                username: "alice".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(created.is_local);
        assert!(!created.is_server_owner);

        let fetched = repo.get_by_username("ALICE").await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
    }

    #[test]
    fn server_owner_is_effectively_admin() {
        let user = UserRecord {
            id: "u1".into(),
            external_identity_id: None,
            username: "owner".into(),
            email: None,
            display_name: None,
            avatar_url: None,
            is_admin: false,
            is_server_owner: true,
            is_active: true,
            is_local: false,
            password_hash: None,
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: None,
        };
        assert!(user.is_effectively_admin());
    }
}
