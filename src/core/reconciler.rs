//! Status reconciler (§4.G): a pull-based loop polling downstream queues and
//! libraries to drive APPROVED→DOWNLOADING→DOWNLOADED→AVAILABLE transitions.
//! There is no reliance on webhooks.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::db::media_requests::{MediaRequestsRepository, MediaType, RequestStatus};
use crate::db::service_instances::{ServiceInstanceRecord, ServiceInstancesRepository};
use crate::errors::AppResult;
use crate::integrations::{MovieManagerClient, SeriesManagerClient};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileSummary {
    pub examined: usize,
    pub transitioned_downloading: usize,
    pub transitioned_available: usize,
}

/// The two tmdb-id sets a downstream instance contributes per pass: ids
/// currently in its download queue, and ids it already has a file for.
#[derive(Default, Clone)]
struct InstanceSets {
    in_progress: HashSet<i64>,
    has_file: HashSet<i64>,
}

#[derive(Clone)]
pub struct StatusReconciler {
    requests: MediaRequestsRepository,
    instances: ServiceInstancesRepository,
}

impl StatusReconciler {
    pub fn new(requests: MediaRequestsRepository, instances: ServiceInstancesRepository) -> Self {
        Self { requests, instances }
    }

    pub async fn run(&self) -> AppResult<ReconcileSummary> {
        let pending = self.requests.list_non_terminal_post_approval().await?;
        let mut summary = ReconcileSummary::default();
        let mut movie_cache: HashMap<String, InstanceSets> = HashMap::new();
        let mut series_cache: HashMap<String, InstanceSets> = HashMap::new();

        for request in pending {
            summary.examined += 1;
            let Some(instance_id) = request.service_instance_id.clone() else {
                continue;
            };
            let media_type = request.media_type()?;
            let sets = match media_type {
                MediaType::Movie => self.movie_sets(&instance_id, &mut movie_cache).await,
                MediaType::Tv => self.series_sets(&instance_id, &mut series_cache).await,
            };
            let Ok(sets) = sets else {
                warn!(instance_id, "reconciler could not reach downstream instance, skipping");
                continue;
            };

            if sets.has_file.contains(&request.tmdb_id) {
                if self
                    .requests
                    .transition_status(
                        &request.id,
                        &[RequestStatus::Approved, RequestStatus::Downloading, RequestStatus::Downloaded],
                        RequestStatus::Available,
                    )
                    .await?
                {
                    summary.transitioned_available += 1;
                    info!(request_id = %request.id, "reconciler marked request available");
                }
            } else if sets.in_progress.contains(&request.tmdb_id)
                && self
                    .requests
                    .transition_status(&request.id, &[RequestStatus::Approved], RequestStatus::Downloading)
                    .await?
            {
                summary.transitioned_downloading += 1;
                info!(request_id = %request.id, "reconciler marked request downloading");
            }
        }

        Ok(summary)
    }

    async fn load_enabled(&self, instance_id: &str) -> AppResult<Option<ServiceInstanceRecord>> {
        let instance = self.instances.get_by_id(instance_id).await?;
        Ok(instance.filter(|i| i.is_enabled))
    }

    async fn movie_sets(&self, instance_id: &str, cache: &mut HashMap<String, InstanceSets>) -> AppResult<InstanceSets> {
        if let Some(sets) = cache.get(instance_id) {
            return Ok(sets.clone());
        }
        let Some(instance) = self.load_enabled(instance_id).await? else {
            let empty = InstanceSets::default();
            cache.insert(instance_id.to_string(), empty.clone());
            return Ok(empty);
        };
        let client = MovieManagerClient::new(&instance);
        let library = client.list_movies().await?;
        let queue = client.queue().await?;

        let downstream_to_tmdb: HashMap<i64, i64> = library.iter().map(|m| (m.id, m.tmdb_id)).collect();
        let has_file = library.iter().filter(|m| m.has_file).map(|m| m.tmdb_id).collect();
        let in_progress = queue
            .iter()
            .filter_map(|q| downstream_to_tmdb.get(&q.movie_id).copied())
            .collect();

        let sets = InstanceSets { in_progress, has_file };
        cache.insert(instance_id.to_string(), sets.clone());
        Ok(sets)
    }

    async fn series_sets(&self, instance_id: &str, cache: &mut HashMap<String, InstanceSets>) -> AppResult<InstanceSets> {
        if let Some(sets) = cache.get(instance_id) {
            return Ok(sets.clone());
        }
        let Some(instance) = self.load_enabled(instance_id).await? else {
            let empty = InstanceSets::default();
            cache.insert(instance_id.to_string(), empty.clone());
            return Ok(empty);
        };
        let client = SeriesManagerClient::new(&instance);
        let library = client.list_series().await?;
        let queue = client.queue().await?;

        let downstream_to_tmdb: HashMap<i64, i64> = library.iter().map(|s| (s.id, s.tmdb_id)).collect();
        let has_file = library
            .iter()
            .filter(|s| s.episode_file_count > 0)
            .map(|s| s.tmdb_id)
            .collect();
        let in_progress = queue
            .iter()
            .filter_map(|q| downstream_to_tmdb.get(&q.series_id).copied())
            .collect();

        let sets = InstanceSets { in_progress, has_file };
        cache.insert(instance_id.to_string(), sets.clone());
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_sets_default_is_empty() {
        let sets = InstanceSets::default();
        assert!(sets.in_progress.is_empty());
        assert!(sets.has_file.is_empty());
    }
}
