//! Category cache repository (§3, §4.I).

use anyhow::Result;
use serde_json::Value as JsonValue;
use sqlx::FromRow;

use crate::db::media_requests::MediaType;
use crate::db::sqlite_helpers::now_iso8601;
use crate::db::Database;

const TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, FromRow)]
pub struct CategoryCacheRecord {
    pub media_type: String,
    pub category: String,
    pub page: i64,
    pub payload: String,
    pub expires_at: String,
}

impl CategoryCacheRecord {
    pub fn payload_json(&self) -> Result<JsonValue> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    pub fn is_expired(&self) -> bool {
        crate::db::sqlite_helpers::str_to_datetime(&self.expires_at)
            .map(|exp| exp < chrono::Utc::now())
            .unwrap_or(true)
    }
}

#[derive(Clone)]
pub struct CategoryCacheRepository {
    pool: Database,
}

impl CategoryCacheRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        media_type: MediaType,
        category: &str,
        page: i64,
    ) -> Result<Option<CategoryCacheRecord>> {
        Ok(sqlx::query_as(
            "SELECT media_type, category, page, payload, expires_at FROM category_cache \
             WHERE media_type = ? AND category = ? AND page = ?",
        )
        .bind(media_type.as_str())
        .bind(category)
        .bind(page)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Writes or updates the cache row with a fresh 24h TTL (§4.I).
    pub async fn put(
        &self,
        media_type: MediaType,
        category: &str,
        page: i64,
        payload: &JsonValue,
    ) -> Result<()> {
        let expires_at = (chrono::Utc::now() + chrono::Duration::hours(TTL_HOURS)).to_rfc3339();
        sqlx::query(
            "INSERT INTO category_cache (media_type, category, page, payload, expires_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(media_type, category, page) \
             DO UPDATE SET payload = excluded.payload, expires_at = excluded.expires_at",
        )
        .bind(media_type.as_str())
        .bind(category)
        .bind(page)
        .bind(payload.to_string())
        .bind(&expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM category_cache WHERE expires_at < ?")
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let repo = CategoryCacheRepository::new(pool().await);
        repo.put(MediaType::Movie, "popular", 1, &json!({"items": []}))
            .await
            .unwrap();
        let found = repo.get(MediaType::Movie, "popular", 1).await.unwrap().unwrap();
        assert!(!found.is_expired());
    }

    #[tokio::test]
    async fn put_overwrites_existing_page() {
        let repo = CategoryCacheRepository::new(pool().await);
        repo.put(MediaType::Movie, "popular", 1, &json!({"v": 1}))
            .await
            .unwrap();
        repo.put(MediaType::Movie, "popular", 1, &json!({"v": 2}))
            .await
            .unwrap();
        let found = repo.get(MediaType::Movie, "popular", 1).await.unwrap().unwrap();
        assert_eq!(found.payload_json().unwrap()["v"], 2);
    }
}
