//! Concrete [`JobHandler`](crate::core::scheduler::JobHandler) wiring for
//! the five jobs in [`JOB_SPECS`](crate::core::scheduler::JOB_SPECS). Each
//! handler is a thin adapter over an already-built core service; the
//! scheduler owns single-flight, timeout, and history bookkeeping, so a
//! handler only does the one pass of work and reports a summary.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::warn;

use crate::core::category_cache::CategoryCacheService;
use crate::core::dispatcher::IntegrationDispatcher;
use crate::core::reconciler::StatusReconciler;
use crate::core::scheduler::JobHandler;
use crate::core::settings_service::SettingsService;
use crate::db::library_mirror::LibraryMirrorRepository;
use crate::db::media_requests::MediaType;
use crate::errors::AppResult;
use crate::integrations::catalog::TmdbCatalogClient;
use crate::integrations::library_server::LibraryServerClient;

/// The fixed set of catalog category pages this service keeps warm. The
/// catalog provider defines many more; these are the ones the discover
/// surface actually renders.
const MOVIE_CATEGORIES: &[&str] = &["popular", "top_rated", "now_playing", "upcoming"];
const TV_CATEGORIES: &[&str] = &["popular", "top_rated", "on_the_air"];

pub struct LibrarySyncJob {
    settings: SettingsService,
    library_server: LibraryServerClient,
    library_mirror: LibraryMirrorRepository,
    category_cache: Arc<CategoryCacheService<TmdbCatalogClient>>,
}

impl LibrarySyncJob {
    pub fn new(
        settings: SettingsService,
        library_server: LibraryServerClient,
        library_mirror: LibraryMirrorRepository,
        category_cache: Arc<CategoryCacheService<TmdbCatalogClient>>,
    ) -> Self {
        Self {
            settings,
            library_server,
            library_mirror,
            category_cache,
        }
    }
}

#[async_trait]
impl JobHandler for LibrarySyncJob {
    async fn run(&self) -> AppResult<JsonValue> {
        let settings = self.settings.get().await?;
        let allow_list = settings.library_sync_allow_list();

        let sections = self.library_server.sections().await?;
        let mut upserted = 0usize;
        let mut skipped_sections = 0usize;

        for section in sections {
            if !allow_list.is_empty() && !allow_list.contains(&section.title) {
                skipped_sections += 1;
                continue;
            }
            let media_type = match section.kind.as_str() {
                "movie" => MediaType::Movie,
                "show" => MediaType::Tv,
                _ => continue,
            };
            for item in section.items {
                let Some(tmdb_id) = item.tmdb_id() else { continue };
                self.library_mirror
                    .upsert(media_type, tmdb_id, item.season_number, item.episode_number, true)
                    .await?;
                upserted += 1;
            }
        }

        let mut refreshed = 0usize;
        for category in MOVIE_CATEGORIES {
            if self.category_cache.refresh(MediaType::Movie, category, 1).await.is_ok() {
                refreshed += 1;
            }
        }
        for category in TV_CATEGORIES {
            if self.category_cache.refresh(MediaType::Tv, category, 1).await.is_ok() {
                refreshed += 1;
            }
        }

        Ok(json!({
            "items_upserted": upserted,
            "sections_skipped": skipped_sections,
            "categories_refreshed": refreshed,
        }))
    }
}

pub struct DownloadStatusCheckJob {
    reconciler: StatusReconciler,
}

impl DownloadStatusCheckJob {
    pub fn new(reconciler: StatusReconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl JobHandler for DownloadStatusCheckJob {
    async fn run(&self) -> AppResult<JsonValue> {
        let summary = self.reconciler.run().await?;
        Ok(json!({
            "examined": summary.examined,
            "transitioned_downloading": summary.transitioned_downloading,
            "transitioned_available": summary.transitioned_available,
        }))
    }
}

pub struct RequestSubmissionJob {
    requests: crate::db::media_requests::MediaRequestsRepository,
    dispatcher: IntegrationDispatcher,
}

impl RequestSubmissionJob {
    pub fn new(
        requests: crate::db::media_requests::MediaRequestsRepository,
        dispatcher: IntegrationDispatcher,
    ) -> Self {
        Self { requests, dispatcher }
    }
}

#[async_trait]
impl JobHandler for RequestSubmissionJob {
    async fn run(&self) -> AppResult<JsonValue> {
        let pending = self.requests.list_undispatched_approved().await?;
        let mut dispatched = 0usize;
        let mut failed = 0usize;

        for request in &pending {
            match self.dispatcher.integrate(&request.id).await {
                Ok(Some(_)) => dispatched += 1,
                Ok(None) => {}
                Err(err) => {
                    failed += 1;
                    warn!(request_id = %request.id, error = %err, "request_submission could not dispatch request");
                }
            }
        }

        Ok(json!({
            "examined": pending.len(),
            "dispatched": dispatched,
            "failed": failed,
        }))
    }
}

pub struct RequestCleanupJob {
    requests: crate::db::media_requests::MediaRequestsRepository,
    settings: SettingsService,
}

impl RequestCleanupJob {
    pub fn new(
        requests: crate::db::media_requests::MediaRequestsRepository,
        settings: SettingsService,
    ) -> Self {
        Self { requests, settings }
    }
}

#[async_trait]
impl JobHandler for RequestCleanupJob {
    async fn run(&self) -> AppResult<JsonValue> {
        let settings = self.settings.get().await?;
        let retention_days = settings.request_retention_days.max(0);
        let cutoff = now_iso8601_minus_days(retention_days);
        let deleted = self.requests.delete_terminal_older_than(&cutoff).await?;
        Ok(json!({ "deleted": deleted, "retention_days": retention_days }))
    }
}

/// `now_iso8601() - days`, formatted the same way every other timestamp in
/// this codebase is (RFC3339/UTC via chrono).
fn now_iso8601_minus_days(days: i64) -> String {
    let now: chrono::DateTime<chrono::Utc> = chrono::Utc::now();
    (now - chrono::Duration::days(days)).to_rfc3339()
}

pub struct CategoryCacheJob {
    category_cache: Arc<CategoryCacheService<TmdbCatalogClient>>,
}

impl CategoryCacheJob {
    pub fn new(category_cache: Arc<CategoryCacheService<TmdbCatalogClient>>) -> Self {
        Self { category_cache }
    }
}

#[async_trait]
impl JobHandler for CategoryCacheJob {
    async fn run(&self) -> AppResult<JsonValue> {
        let mut refreshed = 0usize;
        let mut failed = 0usize;
        for category in MOVIE_CATEGORIES {
            match self.category_cache.refresh(MediaType::Movie, category, 1).await {
                Ok(_) => refreshed += 1,
                Err(err) => {
                    failed += 1;
                    warn!(category, error = %err, "category_cache could not refresh movie category");
                }
            }
        }
        for category in TV_CATEGORIES {
            match self.category_cache.refresh(MediaType::Tv, category, 1).await {
                Ok(_) => refreshed += 1,
                Err(err) => {
                    failed += 1;
                    warn!(category, error = %err, "category_cache could not refresh tv category");
                }
            }
        }
        let evicted = self.category_cache.evict_expired().await?;
        Ok(json!({ "refreshed": refreshed, "failed": failed, "evicted": evicted }))
    }
}
