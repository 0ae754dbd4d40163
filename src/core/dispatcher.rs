//! Integration dispatcher (§4.F): translates an approved request into a
//! downstream add-operation with a per-invocation timeout.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, warn};

use crate::db::media_requests::{MediaRequestRecord, MediaRequestsRepository, MediaType, RequestStatus};
use crate::db::service_instances::{ServiceInstanceRecord, ServiceInstancesRepository, ServiceType};
use crate::errors::{AppError, AppResult};
use crate::integrations::{MovieManagerClient, SeriesManagerClient};
use crate::integrations::series_manager::derive_monitor;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct IntegrationResult {
    pub service: &'static str,
    pub downstream_id: i64,
}

#[derive(Clone)]
pub struct IntegrationDispatcher {
    instances: ServiceInstancesRepository,
    requests: MediaRequestsRepository,
}

impl IntegrationDispatcher {
    pub fn new(instances: ServiceInstancesRepository, requests: MediaRequestsRepository) -> Self {
        Self { instances, requests }
    }

    async fn load_instance(&self, request: &MediaRequestRecord) -> AppResult<Option<ServiceInstanceRecord>> {
        let Some(instance_id) = &request.service_instance_id else {
            return Err(AppError::InstanceUnavailable);
        };
        let instance = self
            .instances
            .get_by_id(instance_id)
            .await?
            .ok_or(AppError::InstanceUnavailable)?;
        if !instance.is_enabled {
            return Err(AppError::InstanceUnavailable);
        }
        let expected = match request.media_type()? {
            MediaType::Movie => ServiceType::Movies,
            MediaType::Tv => ServiceType::Series,
        };
        if instance.service_type()? != expected {
            return Err(AppError::InstanceUnavailable);
        }
        if !instance.effective_settings().enable_integration {
            return Ok(None);
        }
        Ok(Some(instance))
    }

    /// Dispatches a single request (movie, whole-series, lone season, or
    /// lone episode). Returns `None` when integration is suppressed by
    /// instance configuration or the request was already dispatched.
    pub async fn integrate(&self, request_id: &str) -> AppResult<Option<IntegrationResult>> {
        let request = self
            .requests
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("media request"))?;

        if request.radarr_id.is_some() || request.sonarr_id.is_some() {
            return Ok(None);
        }

        let Some(instance) = self.load_instance(&request).await? else {
            return Ok(None);
        };

        let result = tokio::time::timeout(DISPATCH_TIMEOUT, self.send_single(&request, &instance)).await;
        let downstream_id = match result {
            Ok(inner) => inner?,
            Err(_) => {
                warn!(request_id, instance = %instance.name, "integration call timed out");
                return Err(AppError::IntegrationTimeout);
            }
        };

        self.finalize(&[request], &instance, downstream_id).await?;
        Ok(Some(IntegrationResult {
            service: service_label(instance.service_type()?),
            downstream_id,
        }))
    }

    async fn send_single(&self, request: &MediaRequestRecord, instance: &ServiceInstanceRecord) -> AppResult<i64> {
        let settings = instance.effective_settings();
        match request.media_type()? {
            MediaType::Movie => {
                let client = MovieManagerClient::new(instance);
                client
                    .add_movie(
                        request.tmdb_id,
                        settings.quality_profile_id.unwrap_or_default(),
                        settings.root_folder_path.as_deref().unwrap_or("/movies"),
                        settings.minimum_availability.as_deref().unwrap_or("released"),
                        true,
                        &settings.tags,
                    )
                    .await
            }
            MediaType::Tv => {
                let client = SeriesManagerClient::new(instance);
                let (monitor, seasons, episodes) = if request.is_episode_request {
                    let season = request.season_number.unwrap_or_default();
                    let mut episodes = HashMap::new();
                    episodes.insert(season, vec![request.episode_number.unwrap_or_default()]);
                    let (monitor, seasons) = derive_monitor(&[], &episodes);
                    (monitor, seasons, episodes)
                } else if request.is_season_request {
                    let seasons = vec![request.season_number.unwrap_or_default()];
                    let (monitor, seasons) = derive_monitor(&seasons, &HashMap::new());
                    (monitor, seasons, HashMap::new())
                } else {
                    let (monitor, seasons) = derive_monitor(&[], &HashMap::new());
                    (monitor, seasons, HashMap::new())
                };
                client
                    .add_series(
                        request.tmdb_id,
                        settings.quality_profile_id.unwrap_or_default(),
                        settings.language_profile_id.unwrap_or_default(),
                        settings.root_folder_path.as_deref().unwrap_or("/tv"),
                        monitor,
                        &seasons,
                        &episodes,
                        &settings.tags,
                    )
                    .await
            }
        }
    }

    /// Dispatches a granular batch as a single coordinated operation with
    /// the union of seasons/episodes (§4.E, §8 scenario 3).
    pub async fn integrate_batch(&self, request_ids: &[String]) -> AppResult<Option<IntegrationResult>> {
        let mut requests = Vec::with_capacity(request_ids.len());
        for id in request_ids {
            let request = self
                .requests
                .get_by_id(id)
                .await?
                .ok_or_else(|| AppError::not_found("media request"))?;
            requests.push(request);
        }
        let Some(first) = requests.first() else {
            return Ok(None);
        };
        if requests.iter().any(|r| r.sonarr_id.is_some()) {
            return Ok(None);
        }

        let Some(instance) = self.load_instance(first).await? else {
            return Ok(None);
        };

        let mut seasons = Vec::new();
        let mut episodes: HashMap<i64, Vec<i64>> = HashMap::new();
        for request in &requests {
            if request.is_episode_request {
                episodes
                    .entry(request.season_number.unwrap_or_default())
                    .or_default()
                    .push(request.episode_number.unwrap_or_default());
            } else if request.is_season_request {
                seasons.push(request.season_number.unwrap_or_default());
            }
        }
        let (monitor, union_seasons) = derive_monitor(&seasons, &episodes);

        let settings = instance.effective_settings();
        let client = SeriesManagerClient::new(&instance);
        let call = client.add_series(
            first.tmdb_id,
            settings.quality_profile_id.unwrap_or_default(),
            settings.language_profile_id.unwrap_or_default(),
            settings.root_folder_path.as_deref().unwrap_or("/tv"),
            monitor,
            &union_seasons,
            &episodes,
            &settings.tags,
        );
        let downstream_id = match tokio::time::timeout(DISPATCH_TIMEOUT, call).await {
            Ok(inner) => inner?,
            Err(_) => {
                warn!(instance = %instance.name, "granular integration call timed out");
                return Err(AppError::IntegrationTimeout);
            }
        };

        self.finalize(requests, &instance, downstream_id).await?;
        Ok(Some(IntegrationResult {
            service: "series_manager",
            downstream_id,
        }))
    }

    async fn finalize(
        &self,
        requests: Vec<MediaRequestRecord>,
        instance: &ServiceInstanceRecord,
        downstream_id: i64,
    ) -> AppResult<()> {
        for request in requests {
            let (radarr_id, sonarr_id) = match instance.service_type()? {
                ServiceType::Movies => (Some(downstream_id), None),
                ServiceType::Series => (None, Some(downstream_id)),
            };
            self.requests.set_downstream_id(&request.id, radarr_id, sonarr_id).await?;
            self.requests
                .transition_status(&request.id, &[RequestStatus::Approved], RequestStatus::Downloading)
                .await?;
            info!(request_id = %request.id, downstream_id, "request dispatched to downstream instance");
        }
        Ok(())
    }
}

fn service_label(service_type: ServiceType) -> &'static str {
    match service_type {
        ServiceType::Movies => "movie_manager",
        ServiceType::Series => "series_manager",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::media_requests::CreateMediaRequest;
    use crate::db::service_instances::{CreateServiceInstance, InstanceSettings, ServiceType as ST};
    use crate::db::Database;

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn suppressed_when_integration_disabled() {
        let pool = pool().await;
        let instances = ServiceInstancesRepository::new(pool.clone());
        let mut settings = InstanceSettings::default();
        settings.enable_integration = false;
        let instance = instances
            .create(CreateServiceInstance {
                name: "m1".into(),
                service_type: ST::Movies,
                url: "http://localhost:7878".into(),
                api_key: "key".into(),
                is_default_movie: true,
                is_default_tv: false,
                is_4k_default: false,
                instance_category: None,
                quality_tier: "standard".into(),
                settings,
                created_by: None,
            })
            .await
            .unwrap();

        let requests_repo = MediaRequestsRepository::new(pool.clone());
        let request = requests_repo
            .create(CreateMediaRequest {
                user_id: "u1".into(),
                tmdb_id: 603,
                media_type: MediaType::Movie,
                title: "The Matrix".into(),
                overview: None,
                poster_path: None,
                release_date: None,
                status: RequestStatus::Approved,
                service_instance_id: Some(instance.id.clone()),
                requested_quality_tier: "standard".into(),
                season_number: None,
                episode_number: None,
                is_season_request: false,
                is_episode_request: false,
                approved_by: Some("admin".into()),
                approved_at: None,
            })
            .await
            .unwrap();

        let dispatcher = IntegrationDispatcher::new(instances, requests_repo);
        let result = dispatcher.integrate(&request.id).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn already_dispatched_request_is_idempotent() {
        let pool = pool().await;
        let instances = ServiceInstancesRepository::new(pool.clone());
        let instance = instances
            .create(CreateServiceInstance {
                name: "m1".into(),
                service_type: ST::Movies,
                url: "http://localhost:7878".into(),
                api_key: "key".into(),
                is_default_movie: true,
                is_default_tv: false,
                is_4k_default: false,
                instance_category: None,
                quality_tier: "standard".into(),
                settings: InstanceSettings::default(),
                created_by: None,
            })
            .await
            .unwrap();

        let requests_repo = MediaRequestsRepository::new(pool.clone());
        let request = requests_repo
            .create(CreateMediaRequest {
                user_id: "u1".into(),
                tmdb_id: 603,
                media_type: MediaType::Movie,
                title: "The Matrix".into(),
                overview: None,
                poster_path: None,
                release_date: None,
                status: RequestStatus::Approved,
                service_instance_id: Some(instance.id.clone()),
                requested_quality_tier: "standard".into(),
                season_number: None,
                episode_number: None,
                is_season_request: false,
                is_episode_request: false,
                approved_by: Some("admin".into()),
                approved_at: None,
            })
            .await
            .unwrap();
        requests_repo.set_downstream_id(&request.id, Some(42), None).await.unwrap();

        let dispatcher = IntegrationDispatcher::new(instances, requests_repo);
        let result = dispatcher.integrate(&request.id).await.unwrap();
        assert!(result.is_none());
    }
}
