//! Job scheduler (§4.H): an explicit-lifecycle component — `init`/`start`/
//! `health`/`stop` — registered the way the teacher registers its database,
//! auth, and GraphQL services with its services manager, rather than a bare
//! global `tokio_cron_scheduler::JobScheduler` (§9).
//!
//! Single-flight is enforced by [`JobExecutionsRepository::try_start`]'s
//! unique partial index, not by in-process locking, so a manual trigger and
//! the scheduled tick can race safely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::settings_service::SettingsService;
use crate::db::job_executions::{JobExecutionRecord, JobExecutionStatus, JobExecutionsRepository, TriggeredBy};
use crate::db::settings::JobConfig;
use crate::errors::{AppError, AppResult};

/// One recurring job's default cadence and wall-clock budget (§4.H table).
#[derive(Debug, Clone, Copy)]
pub struct JobSpec {
    pub name: &'static str,
    pub default_interval: Duration,
    pub timeout: Duration,
}

pub const JOB_SPECS: &[JobSpec] = &[
    JobSpec { name: "library_sync", default_interval: Duration::from_secs(6 * 3600), timeout: Duration::from_secs(600) },
    JobSpec { name: "download_status_check", default_interval: Duration::from_secs(15 * 60), timeout: Duration::from_secs(300) },
    JobSpec { name: "request_submission", default_interval: Duration::from_secs(5 * 60), timeout: Duration::from_secs(120) },
    JobSpec { name: "request_cleanup", default_interval: Duration::from_secs(24 * 3600), timeout: Duration::from_secs(120) },
    JobSpec { name: "category_cache", default_interval: Duration::from_secs(4 * 3600), timeout: Duration::from_secs(300) },
];

/// The work a registered job performs. Implementors return a small
/// structured summary persisted as `JobExecution.result_data`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> AppResult<JsonValue>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerHealth {
    Healthy,
    ShuttingDown,
}

/// Outcome of a manual trigger (§6 `POST trigger-job`).
pub struct TriggerOutcome {
    pub execution: JobExecutionRecord,
}

struct RegisteredJob {
    spec: JobSpec,
    handler: Arc<dyn JobHandler>,
}

pub struct Scheduler {
    executions: JobExecutionsRepository,
    settings: SettingsService,
    jobs: HashMap<&'static str, RegisteredJob>,
    shutdown_tx: watch::Sender<bool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(executions: JobExecutionsRepository, settings: SettingsService) -> Self {
        let (shutdown_tx, _rx) = watch::channel(false);
        Self {
            executions,
            settings,
            jobs: HashMap::new(),
            shutdown_tx,
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Registers a handler for one of [`JOB_SPECS`]. Panics on an unknown
    /// name — a programmer error, not a runtime one.
    pub fn register(&mut self, name: &'static str, handler: Arc<dyn JobHandler>) {
        let spec = *JOB_SPECS.iter().find(|s| s.name == name).expect("unknown job name");
        self.jobs.insert(name, RegisteredJob { spec, handler });
    }

    async fn job_config(&self, job_name: &str, default_interval: Duration) -> (Duration, bool) {
        match self.settings.get().await {
            Ok(settings) => match settings.job_config_map().get(job_name) {
                Some(JobConfig { interval_seconds, enabled }) => {
                    (Duration::from_secs((*interval_seconds).max(1) as u64), *enabled)
                }
                None => (default_interval, true),
            },
            Err(_) => (default_interval, true),
        }
    }

    /// Starts the background loop for every registered job: clears any
    /// `RUNNING` row orphaned by a crash, runs a single coalesced catch-up
    /// pass for overdue jobs, then schedules the recurring loop.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        for (name, job) in &self.jobs {
            self.executions.fail_stale_running(name).await?;

            let (interval, enabled) = self.job_config(name, job.spec.default_interval).await;
            if enabled && self.is_overdue(name, interval).await? {
                info!(job = %name, "running coalesced catch-up on startup");
                let _ = self.run_once(job, TriggeredBy::Scheduler).await;
            }

            let scheduler = self.clone();
            let name = *name;
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let mut config_rx = self.settings.job_config_changes();
            let handle = tokio::spawn(async move {
                let job = scheduler.jobs.get(name).expect("job registered at spawn time");
                let mut interval_duration = interval;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(interval_duration) => {
                            let (next_interval, enabled) = scheduler.job_config(name, job.spec.default_interval).await;
                            interval_duration = next_interval;
                            if enabled {
                                let _ = scheduler.run_once(job, TriggeredBy::Scheduler).await;
                            }
                        }
                        _ = config_rx.changed() => {
                            let (next_interval, _) = scheduler.job_config(name, job.spec.default_interval).await;
                            interval_duration = next_interval;
                        }
                        _ = shutdown_rx.changed() => {
                            info!(job = %name, "scheduler shutdown observed, exiting loop");
                            break;
                        }
                    }
                }
            });
            self.tasks.lock().await.push(handle);
        }
        Ok(())
    }

    async fn is_overdue(&self, job_name: &str, interval: Duration) -> AppResult<bool> {
        match self.executions.last_completed(job_name).await? {
            None => Ok(true),
            Some(last) => {
                let Some(completed_at) = last.completed_at else { return Ok(true) };
                let Ok(completed) = crate::db::sqlite_helpers::str_to_datetime(&completed_at) else {
                    return Ok(true);
                };
                let due = completed + chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::zero());
                Ok(due < chrono::Utc::now())
            }
        }
    }

    async fn run_once(&self, job: &RegisteredJob, triggered_by: TriggeredBy) -> AppResult<JobExecutionRecord> {
        let Some(execution) = self.executions.try_start(job.spec.name, triggered_by).await? else {
            return Err(AppError::JobAlreadyRunning);
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let outcome = tokio::select! {
            result = tokio::time::timeout(job.spec.timeout, job.handler.run()) => result,
            _ = shutdown_rx.changed() => {
                self.executions
                    .finish(&execution.id, JobExecutionStatus::Failed, None, Some("cancelled".to_string()))
                    .await?;
                return Err(AppError::Internal(anyhow::anyhow!("job '{}' cancelled by shutdown", job.spec.name)));
            }
        };

        match outcome {
            Ok(Ok(result_data)) => {
                info!(job = job.spec.name, "job completed successfully");
                Ok(self
                    .executions
                    .finish(&execution.id, JobExecutionStatus::Success, Some(result_data), None)
                    .await?
                    .unwrap_or(execution))
            }
            Ok(Err(e)) => {
                warn!(job = job.spec.name, error = %e, "job failed");
                Ok(self
                    .executions
                    .finish(&execution.id, JobExecutionStatus::Failed, None, Some(e.to_string()))
                    .await?
                    .unwrap_or(execution))
            }
            Err(_) => {
                warn!(job = job.spec.name, "job timed out");
                Ok(self
                    .executions
                    .finish(&execution.id, JobExecutionStatus::Failed, None, Some("timed out".to_string()))
                    .await?
                    .unwrap_or(execution))
            }
        }
    }

    /// Manual trigger (§6 `POST trigger-job`). Runs concurrently with any
    /// scheduled tick; single-flight is still enforced by the DB.
    pub async fn trigger(&self, job_name: &str) -> AppResult<TriggerOutcome> {
        let job = self.jobs.get(job_name).ok_or_else(|| AppError::not_found("job"))?;
        let execution = self.run_once(job, TriggeredBy::Manual).await?;
        Ok(TriggerOutcome { execution })
    }

    pub async fn history(&self, limit: i64, offset: i64) -> AppResult<Vec<JobExecutionRecord>> {
        Ok(self.executions.history(limit, offset).await?)
    }

    pub fn health(&self) -> SchedulerHealth {
        if *self.shutdown_tx.borrow() {
            SchedulerHealth::ShuttingDown
        } else {
            SchedulerHealth::Healthy
        }
    }

    /// Signals every job loop to stop taking new ticks, then awaits
    /// in-flight runs up to `deadline` (§4.H "graceful shutdown").
    pub async fn stop(&self, deadline: Duration) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        let handles = std::mem::take(&mut *tasks);
        let _ = tokio::time::timeout(deadline, futures_join_all(handles)).await;
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::settings::SettingsRepository;
    use crate::db::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn run(&self) -> AppResult<JsonValue> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"ran": true}))
        }
    }

    fn settings_service(pool: Database) -> SettingsService {
        SettingsService::new(SettingsRepository::new(pool), crate::core::secrets::SecretsCipher::new(b"k"))
    }

    #[tokio::test]
    async fn manual_trigger_records_success() {
        let pool = pool().await;
        let mut scheduler = Scheduler::new(JobExecutionsRepository::new(pool.clone()), settings_service(pool.clone()));
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register("request_cleanup", Arc::new(CountingHandler(counter.clone())));

        let outcome = scheduler.trigger("request_cleanup").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let history = scheduler.history(10, 0).await.unwrap();
        assert_eq!(history[0].id, outcome.execution.id);
    }

    #[tokio::test]
    async fn second_concurrent_trigger_reports_already_running() {
        let pool = pool().await;
        let executions = JobExecutionsRepository::new(pool.clone());
        executions.try_start("request_cleanup", TriggeredBy::Manual).await.unwrap();

        let mut scheduler = Scheduler::new(executions, settings_service(pool.clone()));
        scheduler.register("request_cleanup", Arc::new(CountingHandler(Arc::new(AtomicUsize::new(0)))));

        let result = scheduler.trigger("request_cleanup").await;
        assert!(matches!(result, Err(AppError::JobAlreadyRunning)));
    }
}
