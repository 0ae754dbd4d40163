//! Category cache orchestration (§4.I): refreshes a cached catalog page,
//! decorating each item with `in_plex` and a request `status`, then writes
//! through [`CategoryCacheRepository`].
//!
//! The catalog-metadata client itself is an external collaborator (§1 "Out
//! of scope"); this module only depends on the narrow [`CatalogClient`]
//! trait boundary so the core never couples to a specific provider.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::db::category_cache::CategoryCacheRepository;
use crate::db::library_mirror::LibraryMirrorRepository;
use crate::db::media_requests::{MediaRequestsRepository, MediaType, RequestStatus};
use crate::errors::AppResult;

/// The one operation the category cache needs from an external catalog
/// provider: a raw, unannotated page of results for a category.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn fetch_page(&self, media_type: MediaType, category: &str, page: i64) -> AppResult<JsonValue>;
}

#[derive(Clone)]
pub struct CategoryCacheService<C: CatalogClient> {
    cache: CategoryCacheRepository,
    library_mirror: LibraryMirrorRepository,
    requests: MediaRequestsRepository,
    catalog: std::sync::Arc<C>,
}

impl<C: CatalogClient> CategoryCacheService<C> {
    pub fn new(
        cache: CategoryCacheRepository,
        library_mirror: LibraryMirrorRepository,
        requests: MediaRequestsRepository,
        catalog: std::sync::Arc<C>,
    ) -> Self {
        Self { cache, library_mirror, requests, catalog }
    }

    /// Cache-first read; callers that want a refresh call [`Self::refresh`].
    pub async fn get(
        &self,
        media_type: MediaType,
        category: &str,
        page: i64,
    ) -> AppResult<Option<JsonValue>> {
        match self.cache.get(media_type, category, page).await? {
            Some(record) => Ok(Some(record.payload_json()?)),
            None => Ok(None),
        }
    }

    /// Fetches a fresh page from the catalog, annotates it, and writes
    /// through the cache (§4.I steps 1-3).
    pub async fn refresh(&self, media_type: MediaType, category: &str, page: i64) -> AppResult<JsonValue> {
        let mut raw = self.catalog.fetch_page(media_type, category, page).await?;

        let tmdb_ids = extract_result_ids(&raw);
        let has_file = self.library_mirror.batch_has_file(media_type, &tmdb_ids).await?;
        let statuses = self.requests.batch_status_lookup(&tmdb_ids, media_type).await?;

        annotate_results(&mut raw, &has_file, &statuses);

        self.cache.put(media_type, category, page, &raw).await?;
        Ok(raw)
    }

    /// Background-job entry point (§4.H `category_cache`, every 4h):
    /// deletes expired rows so stale pages don't linger after a refresh
    /// cadence change.
    pub async fn evict_expired(&self) -> AppResult<u64> {
        Ok(self.cache.delete_expired().await?)
    }
}

fn extract_result_ids(page: &JsonValue) -> Vec<i64> {
    page.get("results")
        .and_then(|r| r.as_array())
        .map(|items| items.iter().filter_map(|item| item.get("id").and_then(|v| v.as_i64())).collect())
        .unwrap_or_default()
}

fn annotate_results(
    page: &mut JsonValue,
    has_file: &std::collections::HashSet<i64>,
    statuses: &HashMap<i64, RequestStatus>,
) {
    let Some(results) = page.get_mut("results").and_then(|r| r.as_array_mut()) else {
        return;
    };
    for item in results {
        let Some(tmdb_id) = item.get("id").and_then(|v| v.as_i64()) else {
            continue;
        };
        let in_plex = has_file.contains(&tmdb_id);
        if let Some(obj) = item.as_object_mut() {
            obj.insert("in_plex".to_string(), JsonValue::Bool(in_plex));
            let status = resolve_status(in_plex, statuses.get(&tmdb_id).copied());
            match status {
                Some(s) => {
                    obj.insert("status".to_string(), JsonValue::String(s.to_string()));
                }
                None => {
                    obj.insert("status".to_string(), JsonValue::Null);
                }
            }
        }
    }
}

/// Library presence wins over request state; a rejected request carries no
/// status (the item reads as never requested).
fn resolve_status(in_plex: bool, request_status: Option<RequestStatus>) -> Option<&'static str> {
    if in_plex {
        return Some("in_plex");
    }
    match request_status {
        Some(RequestStatus::Pending) => Some("requested_pending"),
        Some(RequestStatus::Approved) => Some("requested_approved"),
        Some(RequestStatus::Downloading) => Some("requested_downloading"),
        Some(RequestStatus::Downloaded) => Some("requested_downloaded"),
        Some(RequestStatus::Available) => Some("available"),
        Some(RequestStatus::Rejected) | None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    struct FakeCatalog(JsonValue);

    #[async_trait]
    impl CatalogClient for FakeCatalog {
        async fn fetch_page(&self, _media_type: MediaType, _category: &str, _page: i64) -> AppResult<JsonValue> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn refresh_annotates_in_plex_items() {
        let pool = pool().await;
        let library_mirror = LibraryMirrorRepository::new(pool.clone());
        library_mirror.upsert(MediaType::Movie, 603, None, None, true).await.unwrap();

        let catalog = std::sync::Arc::new(FakeCatalog(json!({
            "results": [{"id": 603, "title": "The Matrix"}, {"id": 27205, "title": "Inception"}]
        })));
        let service = CategoryCacheService::new(
            CategoryCacheRepository::new(pool.clone()),
            library_mirror,
            MediaRequestsRepository::new(pool.clone()),
            catalog,
        );

        let page = service.refresh(MediaType::Movie, "popular", 1).await.unwrap();
        let results = page["results"].as_array().unwrap();
        assert_eq!(results[0]["in_plex"], true);
        assert_eq!(results[0]["status"], "in_plex");
        assert_eq!(results[1]["in_plex"], false);
        assert!(results[1]["status"].is_null());
    }

    #[test]
    fn resolve_status_prefers_library_presence() {
        assert_eq!(resolve_status(true, Some(RequestStatus::Pending)), Some("in_plex"));
        assert_eq!(resolve_status(false, Some(RequestStatus::Pending)), Some("requested_pending"));
        assert_eq!(resolve_status(false, Some(RequestStatus::Rejected)), None);
        assert_eq!(resolve_status(false, None), None);
    }
}
