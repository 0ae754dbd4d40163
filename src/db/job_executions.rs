//! Job execution history repository (§3 "JobExecution", §4.H).

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::sqlite_helpers::now_iso8601;
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExecutionStatus {
    Running,
    Success,
    Failed,
}

impl JobExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobExecutionStatus::Running => "RUNNING",
            JobExecutionStatus::Success => "SUCCESS",
            JobExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "RUNNING" => Ok(JobExecutionStatus::Running),
            "SUCCESS" => Ok(JobExecutionStatus::Success),
            "FAILED" => Ok(JobExecutionStatus::Failed),
            other => Err(anyhow!("unknown job execution status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggeredBy {
    Scheduler,
    Manual,
    Api,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Scheduler => "scheduler",
            TriggeredBy::Manual => "manual",
            TriggeredBy::Api => "api",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobExecutionRecord {
    pub id: String,
    pub job_name: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub result_data: Option<String>,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub duration_seconds: Option<f64>,
}

impl JobExecutionRecord {
    pub fn status(&self) -> Result<JobExecutionStatus> {
        JobExecutionStatus::parse(&self.status)
    }

    pub fn result_data_json(&self) -> Option<JsonValue> {
        self.result_data.as_deref().and_then(|s| serde_json::from_str(s).ok())
    }
}

#[derive(Clone)]
pub struct JobExecutionsRepository {
    pool: Database,
}

impl JobExecutionsRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    const COLUMNS: &'static str = "id, job_name, started_at, completed_at, status, result_data, \
         error_message, triggered_by, duration_seconds";

    /// Atomically starts a run iff no `RUNNING` row exists for `job_name`
    /// (§4.H single-flight, §8 invariant 5): the unique partial index
    /// `idx_job_executions_running` makes the insert fail under a
    /// concurrent start, which this maps to `Ok(None)`.
    pub async fn try_start(&self, job_name: &str, triggered_by: TriggeredBy) -> Result<Option<JobExecutionRecord>> {
        let already_running: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM job_executions WHERE job_name = ? AND status = 'RUNNING'",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;
        if already_running.is_some() {
            return Ok(None);
        }

        let id = Uuid::new_v4().to_string();
        let now = now_iso8601();
        let result = sqlx::query(
            "INSERT INTO job_executions (id, job_name, started_at, status, triggered_by) \
             SELECT ?, ?, ?, 'RUNNING', ? \
             WHERE NOT EXISTS (SELECT 1 FROM job_executions WHERE job_name = ? AND status = 'RUNNING')",
        )
        .bind(&id)
        .bind(job_name)
        .bind(&now)
        .bind(triggered_by.as_str())
        .bind(job_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_id(&id).await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<JobExecutionRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM job_executions WHERE id = ?",
            Self::COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn finish(
        &self,
        id: &str,
        status: JobExecutionStatus,
        result_data: Option<JsonValue>,
        error_message: Option<String>,
    ) -> Result<Option<JobExecutionRecord>> {
        let now = now_iso8601();
        let started: (String,) = sqlx::query_as("SELECT started_at FROM job_executions WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        let duration = crate::db::sqlite_helpers::str_to_datetime(&started.0)
            .ok()
            .map(|start| (chrono::Utc::now() - start).num_milliseconds() as f64 / 1000.0);

        sqlx::query(
            "UPDATE job_executions SET status = ?, completed_at = ?, result_data = ?, \
             error_message = ?, duration_seconds = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(result_data.map(|v| v.to_string()))
        .bind(error_message)
        .bind(duration)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_by_id(id).await
    }

    pub async fn is_running(&self, job_name: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM job_executions WHERE job_name = ? AND status = 'RUNNING'",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn last_completed(&self, job_name: &str) -> Result<Option<JobExecutionRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM job_executions WHERE job_name = ? AND status != 'RUNNING' \
             ORDER BY started_at DESC LIMIT 1",
            Self::COLUMNS
        ))
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn history(&self, limit: i64, offset: i64) -> Result<Vec<JobExecutionRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM job_executions ORDER BY started_at DESC LIMIT ? OFFSET ?",
            Self::COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Operator-triggered truncation: keep only the most recent `keep_days`
    /// of history (§4.H "may be truncated by operator command").
    pub async fn truncate_older_than_days(&self, keep_days: i64) -> Result<u64> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(keep_days)).to_rfc3339();
        let result = sqlx::query("DELETE FROM job_executions WHERE started_at < ? AND status != 'RUNNING'")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Recovers from a crash mid-run: any `RUNNING` row whose job process no
    /// longer exists is finalized as cancelled so single-flight doesn't wedge
    /// forever (used at startup).
    pub async fn fail_stale_running(&self, job_name: &str) -> Result<()> {
        sqlx::query(
            "UPDATE job_executions SET status = 'FAILED', completed_at = ?, error_message = 'cancelled' \
             WHERE job_name = ? AND status = 'RUNNING'",
        )
        .bind(now_iso8601())
        .bind(job_name)
        .execute(&self.pool)
        .await?;
        Ok(())
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
    async fn single_flight_blocks_second_start() {
        let repo = JobExecutionsRepository::new(pool().await);
        let first = repo.try_start("library_sync", TriggeredBy::Manual).await.unwrap();
        assert!(first.is_some());
        let second = repo.try_start("library_sync", TriggeredBy::Manual).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn start_allowed_again_after_finish() {
        let repo = JobExecutionsRepository::new(pool().await);
        let first = repo.try_start("library_sync", TriggeredBy::Manual).await.unwrap().unwrap();
        repo.finish(&first.id, JobExecutionStatus::Success, None, None)
            .await
            .unwrap();
        let second = repo.try_start("library_sync", TriggeredBy::Manual).await.unwrap();
        assert!(second.is_some());
    }
}
