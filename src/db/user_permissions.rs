//! Per-user permission overlay repository (§3 "UserPermissions", §4.B).

use std::collections::HashMap;

use anyhow::Result;
use sqlx::FromRow;

use crate::db::sqlite_helpers::{from_json, now_iso8601, to_json};
use crate::db::Database;

#[derive(Debug, Clone, FromRow)]
pub struct UserPermissionsRecord {
    pub user_id: String,
    pub role_id: Option<String>,
    pub custom_permissions: String,
    pub max_requests: Option<i64>,
    pub can_request_movies: Option<bool>,
    pub can_request_tv: Option<bool>,
    pub can_request_4k: Option<bool>,
    pub instance_permissions: String,
    pub current_request_count: i64,
    pub total_requests_made: i64,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl UserPermissionsRecord {
    pub fn custom_permissions_map(&self) -> HashMap<String, bool> {
        from_json(&self.custom_permissions).unwrap_or_default()
    }

    pub fn instance_permissions_map(&self) -> HashMap<String, bool> {
        from_json(&self.instance_permissions).unwrap_or_default()
    }

    /// `None` -> the grant is keyed only under `instance_<id>` / `category_<tag>`;
    /// this reads whichever key is present, instance id first (§4.B).
    pub fn instance_access(&self, instance_id: &str, category: Option<&str>) -> Option<bool> {
        let map = self.instance_permissions_map();
        if let Some(v) = map.get(&format!("instance_{instance_id}")) {
            return Some(*v);
        }
        if let Some(cat) = category {
            if let Some(v) = map.get(&format!("category_{cat}")) {
                return Some(*v);
            }
        }
        None
    }
}

#[derive(Clone)]
pub struct UserPermissionsRepository {
    pool: Database,
}

impl UserPermissionsRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    const COLUMNS: &'static str = "user_id, role_id, custom_permissions, max_requests, \
         can_request_movies, can_request_tv, can_request_4k, instance_permissions, \
         current_request_count, total_requests_made, created_at, updated_at";

    pub async fn get(&self, user_id: &str) -> Result<Option<UserPermissionsRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM user_permissions WHERE user_id = ?",
            Self::COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Lazily materializes a row pointed at the system default role, the
    /// first time any permission check runs for a user (ADDED, grounded on
    /// `create_default_user_permissions`).
    pub async fn ensure(&self, user_id: &str, default_role_id: Option<&str>) -> Result<UserPermissionsRecord> {
        if let Some(existing) = self.get(user_id).await? {
            return Ok(existing);
        }
        let now = now_iso8601();
        sqlx::query(
            "INSERT INTO user_permissions (user_id, role_id, custom_permissions, instance_permissions, created_at) \
             VALUES (?, ?, '{}', '{}', ?)",
        )
        .bind(user_id)
        .bind(default_role_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(self.get(user_id).await?.expect("just inserted"))
    }

    pub async fn set_role(&self, user_id: &str, role_id: Option<&str>) -> Result<Option<UserPermissionsRecord>> {
        sqlx::query("UPDATE user_permissions SET role_id = ?, updated_at = ? WHERE user_id = ?")
            .bind(role_id)
            .bind(now_iso8601())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        self.get(user_id).await
    }

    pub async fn set_custom_permissions(
        &self,
        user_id: &str,
        permissions: HashMap<String, bool>,
    ) -> Result<Option<UserPermissionsRecord>> {
        sqlx::query("UPDATE user_permissions SET custom_permissions = ?, updated_at = ? WHERE user_id = ?")
            .bind(to_json(&permissions))
            .bind(now_iso8601())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        self.get(user_id).await
    }

    pub async fn set_instance_permissions(
        &self,
        user_id: &str,
        permissions: HashMap<String, bool>,
    ) -> Result<Option<UserPermissionsRecord>> {
        sqlx::query("UPDATE user_permissions SET instance_permissions = ?, updated_at = ? WHERE user_id = ?")
            .bind(to_json(&permissions))
            .bind(now_iso8601())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        self.get(user_id).await
    }

    pub async fn set_max_requests(&self, user_id: &str, max_requests: Option<i64>) -> Result<Option<UserPermissionsRecord>> {
        sqlx::query("UPDATE user_permissions SET max_requests = ?, updated_at = ? WHERE user_id = ?")
            .bind(max_requests)
            .bind(now_iso8601())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        self.get(user_id).await
    }

    pub async fn set_tri_state_flags(
        &self,
        user_id: &str,
        can_request_movies: Option<Option<bool>>,
        can_request_tv: Option<Option<bool>>,
        can_request_4k: Option<Option<bool>>,
    ) -> Result<Option<UserPermissionsRecord>> {
        if let Some(v) = can_request_movies {
            sqlx::query("UPDATE user_permissions SET can_request_movies = ?, updated_at = ? WHERE user_id = ?")
                .bind(v)
                .bind(now_iso8601())
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(v) = can_request_tv {
            sqlx::query("UPDATE user_permissions SET can_request_tv = ?, updated_at = ? WHERE user_id = ?")
                .bind(v)
                .bind(now_iso8601())
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(v) = can_request_4k {
            sqlx::query("UPDATE user_permissions SET can_request_4k = ?, updated_at = ? WHERE user_id = ?")
                .bind(v)
                .bind(now_iso8601())
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        self.get(user_id).await
    }

    /// Guarded increment: never lets the counter go negative on the
    /// decrement side (used for drift-healing, see `syncRequestCounts`).
    pub async fn increment_request_count(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE user_permissions SET current_request_count = current_request_count + 1, \
             total_requests_made = total_requests_made + 1, updated_at = ? WHERE user_id = ?",
        )
        .bind(now_iso8601())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn decrement_request_count(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE user_permissions SET current_request_count = MAX(current_request_count - 1, 0), \
             updated_at = ? WHERE user_id = ?",
        )
        .bind(now_iso8601())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recompute every user's `current_request_count` from the pending rows
    /// in `media_requests` directly (§4.B `syncRequestCounts`, §8 invariant
    /// 3). Idempotent; used to heal drift after a restart or a bug.
    pub async fn sync_request_counts(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE user_permissions SET current_request_count = ( \
                SELECT COUNT(*) FROM media_requests \
                WHERE media_requests.user_id = user_permissions.user_id \
                AND media_requests.status = 'PENDING' \
             ), updated_at = ?",
        )
        .bind(now_iso8601())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_all(&self) -> Result<Vec<UserPermissionsRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM user_permissions",
            Self::COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?)
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
    async fn ensure_is_idempotent() {
        let repo = UserPermissionsRepository::new(pool().await);
        let first = repo.ensure("u1", Some("role-a")).await.unwrap();
        let second = repo.ensure("u1", Some("role-b")).await.unwrap();
        assert_eq!(first.role_id, second.role_id);
    }

    #[tokio::test]
    async fn decrement_never_goes_negative() {
        let repo = UserPermissionsRepository::new(pool().await);
        repo.ensure("u1", None).await.unwrap();
        repo.decrement_request_count("u1").await.unwrap();
        let record = repo.get("u1").await.unwrap().unwrap();
        assert_eq!(record.current_request_count, 0);
    }

    #[tokio::test]
    async fn instance_access_prefers_instance_key_over_category() {
        let repo = UserPermissionsRepository::new(pool().await);
        repo.ensure("u1", None).await.unwrap();
        let mut perms = HashMap::new();
        perms.insert("instance_i1".to_string(), false);
        perms.insert("category_movies".to_string(), true);
        let record = repo
            .set_instance_permissions("u1", perms)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.instance_access("i1", Some("movies")), Some(false));
    }
}
