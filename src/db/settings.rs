//! Settings singleton repository (§3 "Settings", §4.J).
//!
//! There is exactly one row (`id = 1`); [`schema::sync_schema`](crate::db::schema::sync_schema)
//! seeds it on first boot.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::sqlite_helpers::{from_json, now_iso8601, to_json};
use crate::db::Database;

/// Per-job schedule configuration stored in the `job_config` JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub interval_seconds: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct SettingsRecord {
    pub id: i64,
    pub base_url: String,
    pub theme: String,
    pub request_approval_policy: String,
    pub library_sync_allow_list: String,
    pub job_config: String,
    pub default_request_limit: i64,
    pub request_retention_days: i64,
    pub connection_secrets: String,
    pub updated_at: String,
}

impl SettingsRecord {
    pub fn library_sync_allow_list(&self) -> Vec<String> {
        from_json(&self.library_sync_allow_list).unwrap_or_default()
    }

    pub fn job_config_map(&self) -> std::collections::HashMap<String, JobConfig> {
        from_json(&self.job_config).unwrap_or_default()
    }

    pub fn connection_secrets(&self) -> std::collections::HashMap<String, String> {
        from_json(&self.connection_secrets).unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct SettingsRepository {
    pool: Database,
}

impl SettingsRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> Result<SettingsRecord> {
        Ok(sqlx::query_as(
            "SELECT id, base_url, theme, request_approval_policy, library_sync_allow_list, \
             job_config, default_request_limit, request_retention_days, connection_secrets, \
             updated_at FROM settings WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?)
    }

    /// Normalizes `base_url` (§4.J: strips scheme/host, keeps the path
    /// component, trims a trailing slash) before writing.
    pub async fn set_base_url(&self, base_url: &str) -> Result<SettingsRecord> {
        let normalized = normalize_base_url(base_url);
        sqlx::query("UPDATE settings SET base_url = ?, updated_at = ? WHERE id = 1")
            .bind(&normalized)
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        self.get().await
    }

    pub async fn set_theme(&self, theme: &str) -> Result<SettingsRecord> {
        sqlx::query("UPDATE settings SET theme = ?, updated_at = ? WHERE id = 1")
            .bind(theme)
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        self.get().await
    }

    pub async fn set_request_approval_policy(&self, policy: &str) -> Result<SettingsRecord> {
        sqlx::query("UPDATE settings SET request_approval_policy = ?, updated_at = ? WHERE id = 1")
            .bind(policy)
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        self.get().await
    }

    pub async fn set_default_request_limit(&self, limit: i64) -> Result<SettingsRecord> {
        sqlx::query("UPDATE settings SET default_request_limit = ?, updated_at = ? WHERE id = 1")
            .bind(limit)
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        self.get().await
    }

    pub async fn set_request_retention_days(&self, days: i64) -> Result<SettingsRecord> {
        sqlx::query("UPDATE settings SET request_retention_days = ?, updated_at = ? WHERE id = 1")
            .bind(days)
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        self.get().await
    }

    pub async fn set_library_sync_allow_list(&self, list: &[String]) -> Result<SettingsRecord> {
        sqlx::query("UPDATE settings SET library_sync_allow_list = ?, updated_at = ? WHERE id = 1")
            .bind(to_json(&list))
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        self.get().await
    }

    /// Merge-update a single job's schedule. Callers (the scheduler) re-read
    /// job configuration after any write lands here (§4.J "trigger any live
    /// schedulers to re-read job configuration").
    pub async fn set_job_config(&self, job_name: &str, config: JobConfig) -> Result<SettingsRecord> {
        let mut map = self.get().await?.job_config_map();
        map.insert(job_name.to_string(), config);
        sqlx::query("UPDATE settings SET job_config = ?, updated_at = ? WHERE id = 1")
            .bind(to_json(&map))
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        self.get().await
    }

    pub async fn set_connection_secret(&self, key: &str, value: &str) -> Result<SettingsRecord> {
        let mut map = self.get().await?.connection_secrets();
        map.insert(key.to_string(), value.to_string());
        sqlx::query("UPDATE settings SET connection_secrets = ?, updated_at = ? WHERE id = 1")
            .bind(to_json(&map))
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;
        self.get().await
    }
}

/// Extracts only the path component from a full URL, trims the trailing
/// slash. `https://host/plex` -> `/plex`; `/plex/` -> `/plex`; `` -> ``.
pub fn normalize_base_url(input: &str) -> String {
    let path = match url::Url::parse(input) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => input.to_string(),
    };
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
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
    async fn singleton_row_seeded_on_sync() {
        let repo = SettingsRepository::new(pool().await);
        let settings = repo.get().await.unwrap();
        assert_eq!(settings.id, 1);
        assert_eq!(settings.default_request_limit, 10);
    }

    #[tokio::test]
    async fn job_config_merge_preserves_other_jobs() {
        let repo = SettingsRepository::new(pool().await);
        repo.set_job_config(
            "library_sync",
            JobConfig {
                interval_seconds: 21600,
                enabled: true,
            },
        )
        .await
        .unwrap();
        let settings = repo
            .set_job_config(
                "download_status_check",
                JobConfig {
                    interval_seconds: 900,
                    enabled: true,
                },
            )
            .await
            .unwrap();
        let map = settings.job_config_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["library_sync"].interval_seconds, 21600);
    }

    #[test]
    fn base_url_normalization() {
        assert_eq!(normalize_base_url("https://host.example/plex/"), "/plex");
        assert_eq!(normalize_base_url("/plex/"), "/plex");
        assert_eq!(normalize_base_url(""), "");
        assert_eq!(normalize_base_url("plex"), "/plex");
    }
}
