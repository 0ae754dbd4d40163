//! Media request repository (§3 "MediaRequest", §4.A, §4.E).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::db::sqlite_helpers::now_iso8601;
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "MOVIE",
            MediaType::Tv => "TV",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "MOVIE" => Ok(MediaType::Movie),
            "TV" => Ok(MediaType::Tv),
            other => Err(anyhow!("unknown media_type '{other}' in media_requests row")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Downloading,
    Downloaded,
    Available,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Downloading => "DOWNLOADING",
            RequestStatus::Downloaded => "DOWNLOADED",
            RequestStatus::Available => "AVAILABLE",
            RequestStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(RequestStatus::Pending),
            "APPROVED" => Ok(RequestStatus::Approved),
            "DOWNLOADING" => Ok(RequestStatus::Downloading),
            "DOWNLOADED" => Ok(RequestStatus::Downloaded),
            "AVAILABLE" => Ok(RequestStatus::Available),
            "REJECTED" => Ok(RequestStatus::Rejected),
            other => Err(anyhow!("unknown status '{other}' in media_requests row")),
        }
    }

    /// Terminal states per §3: no further transition happens to them except
    /// an explicit admin action (§8 invariant 4).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Available | RequestStatus::Rejected)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MediaRequestRecord {
    pub id: String,
    pub user_id: String,
    pub tmdb_id: i64,
    pub media_type: String,
    pub title: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub status: String,
    pub service_instance_id: Option<String>,
    pub requested_quality_tier: String,
    pub radarr_id: Option<i64>,
    pub sonarr_id: Option<i64>,
    pub season_number: Option<i64>,
    pub episode_number: Option<i64>,
    pub is_season_request: bool,
    pub is_episode_request: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
}

impl MediaRequestRecord {
    pub fn media_type(&self) -> Result<MediaType> {
        MediaType::parse(&self.media_type)
    }

    pub fn status(&self) -> Result<RequestStatus> {
        RequestStatus::parse(&self.status)
    }

    pub fn is_whole_series_request(&self) -> bool {
        self.media_type == "TV" && !self.is_season_request && !self.is_episode_request
    }
}

#[derive(Debug, Clone)]
pub struct CreateMediaRequest {
    pub user_id: String,
    pub tmdb_id: i64,
    pub media_type: MediaType,
    pub title: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub status: RequestStatus,
    pub service_instance_id: Option<String>,
    pub requested_quality_tier: String,
    pub season_number: Option<i64>,
    pub episode_number: Option<i64>,
    pub is_season_request: bool,
    pub is_episode_request: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub user_id: Option<String>,
    pub media_type: Option<MediaType>,
    pub status_in: Option<Vec<RequestStatus>>,
    pub tmdb_id: Option<i64>,
}

#[derive(Clone)]
pub struct MediaRequestsRepository {
    pool: Database,
}

impl MediaRequestsRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    const COLUMNS: &'static str = "id, user_id, tmdb_id, media_type, title, overview, poster_path, \
         release_date, status, service_instance_id, requested_quality_tier, radarr_id, sonarr_id, \
         season_number, episode_number, is_season_request, is_episode_request, created_at, \
         updated_at, approved_by, approved_at";

    pub async fn create(&self, request: CreateMediaRequest) -> Result<MediaRequestRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_iso8601();
        sqlx::query(
            "INSERT INTO media_requests (id, user_id, tmdb_id, media_type, title, overview, \
             poster_path, release_date, status, service_instance_id, requested_quality_tier, \
             season_number, episode_number, is_season_request, is_episode_request, created_at, \
             updated_at, approved_by, approved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&request.user_id)
        .bind(request.tmdb_id)
        .bind(request.media_type.as_str())
        .bind(&request.title)
        .bind(&request.overview)
        .bind(&request.poster_path)
        .bind(&request.release_date)
        .bind(request.status.as_str())
        .bind(&request.service_instance_id)
        .bind(&request.requested_quality_tier)
        .bind(request.season_number)
        .bind(request.episode_number)
        .bind(request.is_season_request as i32)
        .bind(request.is_episode_request as i32)
        .bind(&now)
        .bind(&now)
        .bind(&request.approved_by)
        .bind(&request.approved_at)
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow!("failed to create media request"))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<MediaRequestRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM media_requests WHERE id = ?",
            Self::COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Exactly-one-row lookup for the movie uniqueness invariant (§3, §8-1).
    pub async fn find_movie_request(
        &self,
        user_id: &str,
        tmdb_id: i64,
    ) -> Result<Option<MediaRequestRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM media_requests WHERE user_id = ? AND tmdb_id = ? AND media_type = 'MOVIE'",
            Self::COLUMNS
        ))
        .bind(user_id)
        .bind(tmdb_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// The whole-series row for `(user, tmdb_id)`, if any (§3, §8-2).
    pub async fn find_whole_series_request(
        &self,
        user_id: &str,
        tmdb_id: i64,
    ) -> Result<Option<MediaRequestRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM media_requests WHERE user_id = ? AND tmdb_id = ? AND media_type = 'TV' \
             AND is_season_request = 0 AND is_episode_request = 0",
            Self::COLUMNS
        ))
        .bind(user_id)
        .bind(tmdb_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn find_season_request(
        &self,
        user_id: &str,
        tmdb_id: i64,
        season_number: i64,
    ) -> Result<Option<MediaRequestRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM media_requests WHERE user_id = ? AND tmdb_id = ? AND media_type = 'TV' \
             AND is_season_request = 1 AND season_number = ?",
            Self::COLUMNS
        ))
        .bind(user_id)
        .bind(tmdb_id)
        .bind(season_number)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn find_episode_request(
        &self,
        user_id: &str,
        tmdb_id: i64,
        season_number: i64,
        episode_number: i64,
    ) -> Result<Option<MediaRequestRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM media_requests WHERE user_id = ? AND tmdb_id = ? AND media_type = 'TV' \
             AND is_episode_request = 1 AND season_number = ? AND episode_number = ?",
            Self::COLUMNS
        ))
        .bind(user_id)
        .bind(tmdb_id)
        .bind(season_number)
        .bind(episode_number)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn find_requests(
        &self,
        filter: RequestFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MediaRequestRecord>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM media_requests WHERE 1=1", Self::COLUMNS));
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(media_type) = filter.media_type {
            qb.push(" AND media_type = ").push_bind(media_type.as_str());
        }
        if let Some(tmdb_id) = filter.tmdb_id {
            qb.push(" AND tmdb_id = ").push_bind(tmdb_id);
        }
        if let Some(status_in) = &filter.status_in {
            if status_in.is_empty() {
                qb.push(" AND 1=0");
            } else {
                qb.push(" AND status IN (");
                let mut separated = qb.separated(", ");
                for status in status_in {
                    separated.push_bind(status.as_str());
                }
                separated.push_unseparated(")");
            }
        }
        qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);
        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    pub async fn count_pending_by_user(&self, user_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM media_requests WHERE user_id = ? AND status = 'PENDING'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// One round-trip status lookup for a batch of tmdb ids, keyed by id;
    /// used by the category cache (§4.I step 2).
    pub async fn batch_status_lookup(
        &self,
        tmdb_ids: &[i64],
        media_type: MediaType,
    ) -> Result<std::collections::HashMap<i64, RequestStatus>> {
        if tmdb_ids.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT tmdb_id, status FROM media_requests WHERE media_type = ",
        );
        qb.push_bind(media_type.as_str());
        qb.push(" AND is_season_request = 0 AND is_episode_request = 0 AND tmdb_id IN (");
        let mut separated = qb.separated(", ");
        for id in tmdb_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows: Vec<(i64, String)> = qb.build_query_as().fetch_all(&self.pool).await?;
        let mut map = std::collections::HashMap::new();
        for (tmdb_id, status) in rows {
            if let Ok(parsed) = RequestStatus::parse(&status) {
                map.insert(tmdb_id, parsed);
            }
        }
        Ok(map)
    }

    /// Guarded status transition: only applies when the row's current status
    /// is one of `from`, so concurrent transitions commute (§5, §8).
    pub async fn transition_status(
        &self,
        id: &str,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<bool> {
        let placeholders = from.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE media_requests SET status = ?, updated_at = ? WHERE id = ? AND status IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql).bind(to.as_str()).bind(now_iso8601()).bind(id);
        for status in from {
            q = q.bind(status.as_str());
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn approve(
        &self,
        id: &str,
        acting_user: &str,
        override_instance_id: Option<&str>,
    ) -> Result<Option<MediaRequestRecord>> {
        let now = now_iso8601();
        if let Some(instance_id) = override_instance_id {
            sqlx::query(
                "UPDATE media_requests SET status = 'APPROVED', approved_by = ?, approved_at = ?, \
                 service_instance_id = ?, updated_at = ? WHERE id = ?",
            )
            .bind(acting_user)
            .bind(&now)
            .bind(instance_id)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "UPDATE media_requests SET status = 'APPROVED', approved_by = ?, approved_at = ?, \
                 updated_at = ? WHERE id = ?",
            )
            .bind(acting_user)
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        self.get_by_id(id).await
    }

    pub async fn reject(&self, id: &str, acting_user: &str) -> Result<Option<MediaRequestRecord>> {
        let now = now_iso8601();
        sqlx::query(
            "UPDATE media_requests SET status = 'REJECTED', approved_by = ?, approved_at = ?, \
             updated_at = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(acting_user)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_by_id(id).await
    }

    pub async fn mark_available(&self, id: &str, acting_user: &str) -> Result<Option<MediaRequestRecord>> {
        let now = now_iso8601();
        sqlx::query(
            "UPDATE media_requests SET status = 'AVAILABLE', approved_by = COALESCE(approved_by, ?), \
             updated_at = ? WHERE id = ? AND status != 'REJECTED'",
        )
        .bind(acting_user)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_by_id(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM media_requests WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_downstream_id(
        &self,
        id: &str,
        radarr_id: Option<i64>,
        sonarr_id: Option<i64>,
    ) -> Result<Option<MediaRequestRecord>> {
        sqlx::query(
            "UPDATE media_requests SET radarr_id = COALESCE(?, radarr_id), \
             sonarr_id = COALESCE(?, sonarr_id), updated_at = ? WHERE id = ?",
        )
        .bind(radarr_id)
        .bind(sonarr_id)
        .bind(now_iso8601())
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_by_id(id).await
    }

    /// Non-terminal, post-approval requests: the reconciler's input set
    /// (§4.G) or the deferred-submission job's candidate set (§4.H).
    pub async fn list_non_terminal_post_approval(&self) -> Result<Vec<MediaRequestRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM media_requests WHERE status IN ('APPROVED', 'DOWNLOADING', 'DOWNLOADED')",
            Self::COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?)
    }

    /// Requests that reached APPROVED but never got a downstream id
    /// (§4.H `request_submission`).
    pub async fn list_undispatched_approved(&self) -> Result<Vec<MediaRequestRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM media_requests WHERE status = 'APPROVED' \
             AND radarr_id IS NULL AND sonarr_id IS NULL",
            Self::COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?)
    }

    /// `AVAILABLE`/`REJECTED` rows older than the retention cutoff
    /// (§4.H `request_cleanup`); `cutoff_iso8601` is an RFC3339 timestamp.
    pub async fn delete_terminal_older_than(&self, cutoff_iso8601: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM media_requests WHERE status IN ('AVAILABLE', 'REJECTED') AND created_at < ?",
        )
        .bind(cutoff_iso8601)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
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

    fn movie(user_id: &str, tmdb_id: i64) -> CreateMediaRequest {
        CreateMediaRequest {
            user_id: user_id.into(),
            tmdb_id,
            media_type: MediaType::Movie,
            title: "The Matrix".into(),
            overview: None,
            poster_path: None,
            release_date: None,
            status: RequestStatus::Pending,
            service_instance_id: None,
            requested_quality_tier: "standard".into(),
            season_number: None,
            episode_number: None,
            is_season_request: false,
            is_episode_request: false,
            approved_by: None,
            approved_at: None,
        }
    }

    #[tokio::test]
    async fn transition_status_respects_guard() {
        let repo = MediaRequestsRepository::new(pool().await);
        let created = repo.create(movie("u1", 603)).await.unwrap();
        assert!(
            repo.transition_status(&created.id, &[RequestStatus::Pending], RequestStatus::Approved)
                .await
                .unwrap()
        );
        // Second attempt from PENDING fails: already APPROVED.
        assert!(
            !repo
                .transition_status(&created.id, &[RequestStatus::Pending], RequestStatus::Rejected)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn find_movie_request_is_unique() {
        let repo = MediaRequestsRepository::new(pool().await);
        repo.create(movie("u1", 603)).await.unwrap();
        let found = repo.find_movie_request("u1", 603).await.unwrap();
        assert!(found.is_some());
        let missing = repo.find_movie_request("u1", 999).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn batch_status_lookup_ignores_partial_rows() {
        let repo = MediaRequestsRepository::new(pool().await);
        repo.create(movie("u1", 603)).await.unwrap();
        let map = repo
            .batch_status_lookup(&[603, 999], MediaType::Movie)
            .await
            .unwrap();
        assert_eq!(map.get(&603), Some(&RequestStatus::Pending));
        assert!(!map.contains_key(&999));
    }

    #[tokio::test]
    async fn delete_terminal_older_than_respects_cutoff() {
        let repo = MediaRequestsRepository::new(pool().await);
        let created = repo.create(movie("u1", 603)).await.unwrap();
        repo.transition_status(&created.id, &[RequestStatus::Pending], RequestStatus::Rejected)
            .await
            .unwrap();
        let deleted = repo.delete_terminal_older_than("1970-01-01T00:00:00Z").await.unwrap();
        assert_eq!(deleted, 0);
        let far_future = "2999-01-01T00:00:00Z";
        let deleted = repo.delete_terminal_older_than(far_future).await.unwrap();
        assert_eq!(deleted, 1);
    }
}
