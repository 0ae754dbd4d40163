//! Refresh token repository. Tokens are stored hashed (SHA-256); the raw
//! token only ever exists in the response body and the caller's hands.

use anyhow::Result;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::sqlite_helpers::now_iso8601;
use crate::db::Database;

#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
    pub revoked_at: Option<String>,
}

impl RefreshTokenRecord {
    pub fn is_active(&self) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        crate::db::sqlite_helpers::str_to_datetime(&self.expires_at)
            .map(|exp| exp > chrono::Utc::now())
            .unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct RefreshTokensRepository {
    pool: Database,
}

impl RefreshTokensRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user_id: &str, token_hash: &str, expires_at: &str) -> Result<RefreshTokenRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_iso8601();
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(RefreshTokenRecord {
            id,
            user_id: user_id.to_string(),
            token_hash: token_hash.to_string(),
            expires_at: expires_at.to_string(),
            created_at: now,
            revoked_at: None,
        })
    }

    pub async fn get_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        Ok(sqlx::query_as(
            "SELECT id, user_id, token_hash, expires_at, created_at, revoked_at \
             FROM refresh_tokens WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn revoke(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE refresh_tokens SET revoked_at = ? WHERE id = ?")
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Revokes every active token for a user (§6 "logout all sessions").
    pub async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = ? WHERE user_id = ? AND revoked_at IS NULL",
        )
        .bind(now_iso8601())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::{CreateUser, UsersRepository};

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn active_token_round_trips_by_hash() {
        let pool = pool().await;
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser { username: "alice".into(), password_hash: Some("h".into()), ..Default::default() })
            .await
            .unwrap();

        let repo = RefreshTokensRepository::new(pool);
        let future = (chrono::Utc::now() + chrono::Duration::days(7)).to_rfc3339();
        let created = repo.create(&user.id, "hash-abc", &future).await.unwrap();
        assert!(created.is_active());

        let found = repo.get_by_hash("hash-abc").await.unwrap().unwrap();
        assert_eq!(found.user_id, user.id);
    }

    #[tokio::test]
    async fn revoked_token_is_not_active() {
        let pool = pool().await;
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser { username: "bob".into(), password_hash: Some("h".into()), ..Default::default() })
            .await
            .unwrap();

        let repo = RefreshTokensRepository::new(pool);
        let future = (chrono::Utc::now() + chrono::Duration::days(7)).to_rfc3339();
        let created = repo.create(&user.id, "hash-xyz", &future).await.unwrap();
        repo.revoke(&created.id).await.unwrap();

        let found = repo.get_by_hash("hash-xyz").await.unwrap().unwrap();
        assert!(!found.is_active());
    }
}
