//! Library mirror repository (§3 "PlexLibraryItem / PlexTVItem").
//!
//! A single `library_items` table carries both movie and TV entries; a
//! null `episode_number` denotes a season-level entry, and a null
//! `season_number` (with null `episode_number`) denotes a whole-show or
//! movie entry, matching the teacher's single-table-per-media-kind idiom
//! used elsewhere in `db::movies`/`db::tv_shows`.

use anyhow::Result;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::media_requests::MediaType;
use crate::db::sqlite_helpers::now_iso8601;
use crate::db::Database;

#[derive(Debug, Clone, FromRow)]
pub struct LibraryItemRecord {
    pub id: String,
    pub media_type: String,
    pub tmdb_id: i64,
    pub season_number: Option<i64>,
    pub episode_number: Option<i64>,
    pub has_file: bool,
    pub synced_at: String,
}

#[derive(Clone)]
pub struct LibraryMirrorRepository {
    pool: Database,
}

impl LibraryMirrorRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    /// Upsert keyed by `(media_type, tmdb_id, season_number, episode_number)`,
    /// matching the unique index; called once per item found during a
    /// library sync pass (§4.H `library_sync`).
    pub async fn upsert(
        &self,
        media_type: MediaType,
        tmdb_id: i64,
        season_number: Option<i64>,
        episode_number: Option<i64>,
        has_file: bool,
    ) -> Result<()> {
        let now = now_iso8601();
        sqlx::query(
            "INSERT INTO library_items (id, media_type, tmdb_id, season_number, episode_number, has_file, synced_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(media_type, tmdb_id, season_number, episode_number) \
             DO UPDATE SET has_file = excluded.has_file, synced_at = excluded.synced_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(media_type.as_str())
        .bind(tmdb_id)
        .bind(season_number)
        .bind(episode_number)
        .bind(has_file as i32)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn has_file(
        &self,
        media_type: MediaType,
        tmdb_id: i64,
        season_number: Option<i64>,
        episode_number: Option<i64>,
    ) -> Result<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT has_file FROM library_items WHERE media_type = ? AND tmdb_id = ? \
             AND season_number IS ? AND episode_number IS ?",
        )
        .bind(media_type.as_str())
        .bind(tmdb_id)
        .bind(season_number)
        .bind(episode_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(f,)| f).unwrap_or(false))
    }

    /// Batch membership check for the whole-title row of each tmdb id
    /// (season/episode both null); feeds the category cache's `in_plex`
    /// annotation (§4.I step 2).
    pub async fn batch_has_file(
        &self,
        media_type: MediaType,
        tmdb_ids: &[i64],
    ) -> Result<std::collections::HashSet<i64>> {
        if tmdb_ids.is_empty() {
            return Ok(std::collections::HashSet::new());
        }
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "SELECT tmdb_id FROM library_items WHERE media_type = ",
        );
        qb.push_bind(media_type.as_str());
        qb.push(" AND season_number IS NULL AND episode_number IS NULL AND has_file = 1 AND tmdb_id IN (");
        let mut separated = qb.separated(", ");
        for id in tmdb_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let rows: Vec<(i64,)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn episode_file_count(&self, tmdb_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM library_items WHERE media_type = 'TV' AND tmdb_id = ? \
             AND episode_number IS NOT NULL AND has_file = 1",
        )
        .bind(tmdb_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
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
    async fn upsert_is_idempotent_by_key() {
        let repo = LibraryMirrorRepository::new(pool().await);
        repo.upsert(MediaType::Movie, 603, None, None, true).await.unwrap();
        repo.upsert(MediaType::Movie, 603, None, None, true).await.unwrap();
        let found = repo.has_file(MediaType::Movie, 603, None, None).await.unwrap();
        assert!(found);
    }

    #[tokio::test]
    async fn season_and_whole_show_rows_are_distinct() {
        let repo = LibraryMirrorRepository::new(pool().await);
        repo.upsert(MediaType::Tv, 1399, Some(1), None, true).await.unwrap();
        assert!(!repo.has_file(MediaType::Tv, 1399, None, None).await.unwrap());
        assert!(repo.has_file(MediaType::Tv, 1399, Some(1), None).await.unwrap());
    }

    #[tokio::test]
    async fn episode_file_count_counts_episode_rows_only() {
        let repo = LibraryMirrorRepository::new(pool().await);
        repo.upsert(MediaType::Tv, 1399, Some(1), None, true).await.unwrap();
        repo.upsert(MediaType::Tv, 1399, Some(1), Some(1), true).await.unwrap();
        repo.upsert(MediaType::Tv, 1399, Some(1), Some(2), true).await.unwrap();
        assert_eq!(repo.episode_file_count(1399).await.unwrap(), 2);
    }
}
