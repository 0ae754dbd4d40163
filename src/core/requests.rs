//! Request state machine (§4.E): create/approve/reject/mark-available/delete,
//! conflict detection, and quota bookkeeping.

use std::collections::HashMap;

use tracing::warn;

use crate::core::dispatcher::IntegrationDispatcher;
use crate::core::permissions::{
    PermissionsEngine, ADMIN_APPROVE_REQUESTS, ADMIN_DELETE_REQUESTS, REQUEST_4K, REQUEST_MANAGE_ALL,
};
use crate::core::selector::InstanceSelector;
use crate::db::media_requests::{
    CreateMediaRequest, MediaRequestRecord, MediaRequestsRepository, MediaType, RequestStatus,
};
use crate::db::sqlite_helpers::now_iso8601;
use crate::errors::{AppError, AppResult, ConflictReason};

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub user_id: String,
    pub tmdb_id: i64,
    pub media_type: MediaType,
    pub title: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub requested_quality_tier: String,
    pub preferred_instance_id: Option<String>,
    pub season_number: Option<i64>,
    pub episode_number: Option<i64>,
    pub is_season_request: bool,
    pub is_episode_request: bool,
}

#[derive(Debug, Clone)]
pub struct GranularRequest {
    pub user_id: String,
    pub tmdb_id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    pub requested_quality_tier: String,
    pub preferred_instance_id: Option<String>,
    pub seasons: Vec<i64>,
    pub episodes: HashMap<i64, Vec<i64>>,
}

#[derive(Clone)]
pub struct RequestService {
    requests: MediaRequestsRepository,
    permissions: PermissionsEngine,
    selector: InstanceSelector,
    dispatcher: IntegrationDispatcher,
}

impl RequestService {
    pub fn new(
        requests: MediaRequestsRepository,
        permissions: PermissionsEngine,
        selector: InstanceSelector,
        dispatcher: IntegrationDispatcher,
    ) -> Self {
        Self {
            requests,
            permissions,
            selector,
            dispatcher,
        }
    }

    async fn check_eligibility(&self, user_id: &str, media_type: MediaType, quality_tier: &str) -> AppResult<()> {
        if !self.permissions.can_request_media_type(user_id, media_type).await? {
            return Err(AppError::MediaTypeForbidden(media_type.as_str().to_string()));
        }
        if quality_tier == "4k" && !self.permissions.has_permission(user_id, REQUEST_4K).await? {
            return Err(AppError::Forbidden("user is not permitted to request 4k media".into()));
        }
        let (allowed, _) = self.permissions.can_make_request(user_id).await?;
        if !allowed {
            let overlay = self.permissions.ensure_default_user_permissions(user_id).await?;
            let limit = self
                .permissions
                .request_limit(user_id)
                .await?
                .unwrap_or(overlay.current_request_count);
            return Err(AppError::QuotaExceeded {
                current: overlay.current_request_count,
                limit,
            });
        }
        Ok(())
    }

    /// Conflict check for a single (whole-series/season/episode/movie) create
    /// (§3, §4.E).
    async fn check_conflict(&self, spec: &NewRequest) -> AppResult<()> {
        match spec.media_type {
            MediaType::Movie => {
                if self
                    .requests
                    .find_movie_request(&spec.user_id, spec.tmdb_id)
                    .await?
                    .is_some()
                {
                    return Err(AppError::conflict(ConflictReason::AlreadyRequestedMovie));
                }
            }
            MediaType::Tv => {
                let whole_series = self
                    .requests
                    .find_whole_series_request(&spec.user_id, spec.tmdb_id)
                    .await?;
                if spec.is_season_request || spec.is_episode_request {
                    if whole_series.is_some() {
                        return Err(AppError::conflict(ConflictReason::WholeSeriesExists));
                    }
                    if spec.is_season_request {
                        let season = spec.season_number.unwrap_or_default();
                        if self
                            .requests
                            .find_season_request(&spec.user_id, spec.tmdb_id, season)
                            .await?
                            .is_some()
                        {
                            return Err(AppError::conflict(ConflictReason::SeasonExists));
                        }
                    } else {
                        let season = spec.season_number.unwrap_or_default();
                        let episode = spec.episode_number.unwrap_or_default();
                        if self
                            .requests
                            .find_episode_request(&spec.user_id, spec.tmdb_id, season, episode)
                            .await?
                            .is_some()
                        {
                            return Err(AppError::conflict(ConflictReason::EpisodeExists));
                        }
                    }
                } else if whole_series.is_some() {
                    // Duplicate whole-series request; partials are left untouched.
                    return Err(AppError::conflict(ConflictReason::WholeSeriesExists));
                }
            }
        }
        Ok(())
    }

    /// Creates a single request (movie, whole series, lone season, or lone
    /// episode), applying eligibility, conflict, and instance-access checks.
    pub async fn create(&self, spec: NewRequest) -> AppResult<MediaRequestRecord> {
        self.check_eligibility(&spec.user_id, spec.media_type, &spec.requested_quality_tier)
            .await?;
        self.check_conflict(&spec).await?;

        let (_, chosen) = self
            .selector
            .select(
                &spec.user_id,
                spec.media_type,
                &spec.requested_quality_tier,
                spec.preferred_instance_id.as_deref(),
            )
            .await?;
        let instance = chosen.ok_or(AppError::InstanceUnavailable)?;

        let auto_approve = self
            .permissions
            .should_auto_approve(&spec.user_id, spec.media_type)
            .await?;
        let now = now_iso8601();
        let (status, approved_by, approved_at) = if auto_approve {
            (RequestStatus::Approved, Some(spec.user_id.clone()), Some(now))
        } else {
            (RequestStatus::Pending, None, None)
        };

        let created = self
            .requests
            .create(CreateMediaRequest {
                user_id: spec.user_id.clone(),
                tmdb_id: spec.tmdb_id,
                media_type: spec.media_type,
                title: spec.title,
                overview: spec.overview,
                poster_path: spec.poster_path,
                release_date: spec.release_date,
                status,
                service_instance_id: Some(instance.id.clone()),
                requested_quality_tier: spec.requested_quality_tier,
                season_number: spec.season_number,
                episode_number: spec.episode_number,
                is_season_request: spec.is_season_request,
                is_episode_request: spec.is_episode_request,
                approved_by,
                approved_at,
            })
            .await?;

        if status == RequestStatus::Pending {
            self.permissions.increment_request_count(&spec.user_id).await?;
        } else if let Err(err) = self.dispatcher.integrate(&created.id).await {
            warn!(request_id = %created.id, error = %err, "auto-approve dispatch failed");
        }

        Ok(created)
    }

    /// Creates a batch of season/episode rows, rejecting the whole batch up
    /// front if a whole-series row already exists (§4.E, §9).
    pub async fn create_granular(&self, spec: GranularRequest) -> AppResult<Vec<MediaRequestRecord>> {
        self.check_eligibility(&spec.user_id, MediaType::Tv, &spec.requested_quality_tier)
            .await?;

        if self
            .requests
            .find_whole_series_request(&spec.user_id, spec.tmdb_id)
            .await?
            .is_some()
        {
            return Err(AppError::conflict(ConflictReason::WholeSeriesExists));
        }

        let (_, chosen) = self
            .selector
            .select(
                &spec.user_id,
                MediaType::Tv,
                &spec.requested_quality_tier,
                spec.preferred_instance_id.as_deref(),
            )
            .await?;
        let instance = chosen.ok_or(AppError::InstanceUnavailable)?;

        let auto_approve = self
            .permissions
            .should_auto_approve(&spec.user_id, MediaType::Tv)
            .await?;

        let mut created = Vec::new();
        for season in &spec.seasons {
            if self
                .requests
                .find_season_request(&spec.user_id, spec.tmdb_id, *season)
                .await?
                .is_some()
            {
                continue;
            }
            created.push(self.insert_partial(&spec, &instance, Some(*season), None, true, false, auto_approve).await?);
        }
        for (season, episodes) in &spec.episodes {
            for episode in episodes {
                if self
                    .requests
                    .find_episode_request(&spec.user_id, spec.tmdb_id, *season, *episode)
                    .await?
                    .is_some()
                {
                    continue;
                }
                created.push(
                    self.insert_partial(&spec, &instance, Some(*season), Some(*episode), false, true, auto_approve)
                        .await?,
                );
            }
        }

        let pending_count = created.iter().filter(|r| r.status == RequestStatus::Pending.as_str()).count();
        for _ in 0..pending_count {
            self.permissions.increment_request_count(&spec.user_id).await?;
        }

        if auto_approve && !created.is_empty() {
            let ids: Vec<String> = created.iter().map(|r| r.id.clone()).collect();
            if let Err(err) = self.dispatcher.integrate_batch(&ids).await {
                warn!(tmdb_id = spec.tmdb_id, error = %err, "granular auto-approve dispatch failed");
            }
        }

        Ok(created)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_partial(
        &self,
        spec: &GranularRequest,
        instance: &crate::db::service_instances::ServiceInstanceRecord,
        season_number: Option<i64>,
        episode_number: Option<i64>,
        is_season_request: bool,
        is_episode_request: bool,
        auto_approve: bool,
    ) -> AppResult<MediaRequestRecord> {
        let now = now_iso8601();
        let (status, approved_by, approved_at) = if auto_approve {
            (RequestStatus::Approved, Some(spec.user_id.clone()), Some(now))
        } else {
            (RequestStatus::Pending, None, None)
        };
        Ok(self
            .requests
            .create(CreateMediaRequest {
                user_id: spec.user_id.clone(),
                tmdb_id: spec.tmdb_id,
                media_type: MediaType::Tv,
                title: spec.title.clone(),
                overview: spec.overview.clone(),
                poster_path: spec.poster_path.clone(),
                release_date: spec.release_date.clone(),
                status,
                service_instance_id: Some(instance.id.clone()),
                requested_quality_tier: spec.requested_quality_tier.clone(),
                season_number,
                episode_number,
                is_season_request,
                is_episode_request,
                approved_by,
                approved_at,
            })
            .await?)
    }

    pub async fn approve(
        &self,
        request_id: &str,
        acting_user: &str,
        override_instance_id: Option<&str>,
    ) -> AppResult<MediaRequestRecord> {
        if !self.permissions.has_permission(acting_user, ADMIN_APPROVE_REQUESTS).await? {
            return Err(AppError::Forbidden("admin.approve_requests required".into()));
        }
        let existing = self
            .requests
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("media request"))?;
        let was_pending = existing.status()? == RequestStatus::Pending;

        if let Some(instance_id) = override_instance_id {
            self.selector
                .validate_instance_access(
                    &existing.user_id,
                    instance_id,
                    existing.media_type()?,
                    &existing.requested_quality_tier,
                )
                .await?;
        }

        self.requests.approve(request_id, acting_user, override_instance_id).await?;

        if was_pending {
            self.permissions.decrement_request_count(&existing.user_id).await?;
        }

        if let Err(err) = self.dispatcher.integrate(request_id).await {
            warn!(request_id, error = %err, "integration dispatch failed after approval");
        }

        self.requests
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("media request"))
    }

    pub async fn reject(&self, request_id: &str, acting_user: &str) -> AppResult<MediaRequestRecord> {
        if !self.permissions.has_permission(acting_user, ADMIN_APPROVE_REQUESTS).await? {
            return Err(AppError::Forbidden("admin.approve_requests required".into()));
        }
        let existing = self
            .requests
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("media request"))?;
        let was_pending = existing.status()? == RequestStatus::Pending;

        self.requests.reject(request_id, acting_user).await?;

        if was_pending {
            self.permissions.decrement_request_count(&existing.user_id).await?;
        }

        self.requests
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("media request"))
    }

    pub async fn mark_available(&self, request_id: &str, acting_user: &str) -> AppResult<MediaRequestRecord> {
        if !self.permissions.has_permission(acting_user, ADMIN_APPROVE_REQUESTS).await? {
            return Err(AppError::Forbidden("admin.approve_requests required".into()));
        }
        self.requests.mark_available(request_id, acting_user).await?;
        self.requests
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("media request"))
    }

    pub async fn delete(&self, request_id: &str, acting_user: &str) -> AppResult<()> {
        let existing = self
            .requests
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::not_found("media request"))?;

        let is_owner = existing.user_id == acting_user;
        let can_delete_any = self.permissions.has_permission(acting_user, ADMIN_DELETE_REQUESTS).await?
            || self.permissions.has_permission(acting_user, REQUEST_MANAGE_ALL).await?;
        if !is_owner && !can_delete_any {
            return Err(AppError::Forbidden("cannot delete another user's request".into()));
        }

        let was_pending = existing.status()? == RequestStatus::Pending;
        self.requests.delete(request_id).await?;
        if was_pending {
            self.permissions.decrement_request_count(&existing.user_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::roles::RolesRepository;
    use crate::db::service_instances::{CreateServiceInstance, InstanceSettings, ServiceType};
    use crate::db::settings::SettingsRepository;
    use crate::db::user_permissions::UserPermissionsRepository;
    use crate::db::users::{CreateUser, UsersRepository};
    use crate::db::Database;

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    async fn service(pool: Database) -> RequestService {
        let permissions = PermissionsEngine::new(
            UsersRepository::new(pool.clone()),
            RolesRepository::new(pool.clone()),
            UserPermissionsRepository::new(pool.clone()),
            SettingsRepository::new(pool.clone()),
        );
        let instances = crate::db::service_instances::ServiceInstancesRepository::new(pool.clone());
        let selector = InstanceSelector::new(instances.clone(), permissions.clone());
        let requests = MediaRequestsRepository::new(pool.clone());
        let dispatcher = IntegrationDispatcher::new(instances, requests.clone());
        RequestService::new(requests, permissions, selector, dispatcher)
    }

    async fn movie_instance(pool: &Database) -> crate::db::service_instances::ServiceInstanceRecord {
        crate::db::service_instances::ServiceInstancesRepository::new(pool.clone())
            .create(CreateServiceInstance {
                name: "m1".into(),
                service_type: ServiceType::Movies,
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
            .unwrap()
    }

    fn movie_spec(user_id: &str) -> NewRequest {
        NewRequest {
            user_id: user_id.into(),
            tmdb_id: 603,
            media_type: MediaType::Movie,
            title: "The Matrix".into(),
            overview: None,
            poster_path: None,
            release_date: None,
            requested_quality_tier: "standard".into(),
            preferred_instance_id: None,
            season_number: None,
            episode_number: None,
            is_season_request: false,
            is_episode_request: false,
        }
    }

    #[tokio::test]
    async fn duplicate_movie_request_conflicts() {
        let pool = pool().await;
        movie_instance(&pool).await;
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "u1".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let svc = service(pool).await;
        svc.create(movie_spec(&user.id)).await.unwrap();
        let err = svc.create(movie_spec(&user.id)).await.unwrap_err();
        assert!(matches!(err, AppError::RequestConflict { reason: ConflictReason::AlreadyRequestedMovie }));
    }

    #[tokio::test]
    async fn partial_rejected_when_whole_series_exists() {
        let pool = pool().await;
        let instances = crate::db::service_instances::ServiceInstancesRepository::new(pool.clone());
        instances
            .create(CreateServiceInstance {
                name: "s1".into(),
                service_type: ServiceType::Series,
                url: "http://localhost:8989".into(),
                api_key: "key".into(),
                is_default_movie: false,
                is_default_tv: true,
                is_4k_default: false,
                instance_category: None,
                quality_tier: "standard".into(),
                settings: InstanceSettings::default(),
                created_by: None,
            })
            .await
            .unwrap();
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "u1".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let svc = service(pool).await;
        let whole = NewRequest {
            user_id: user.id.clone(),
            tmdb_id: 1399,
            media_type: MediaType::Tv,
            title: "Game of Thrones".into(),
            overview: None,
            poster_path: None,
            release_date: None,
            requested_quality_tier: "standard".into(),
            preferred_instance_id: None,
            season_number: None,
            episode_number: None,
            is_season_request: false,
            is_episode_request: false,
        };
        svc.create(whole).await.unwrap();

        let season = NewRequest {
            user_id: user.id.clone(),
            tmdb_id: 1399,
            media_type: MediaType::Tv,
            title: "Game of Thrones".into(),
            overview: None,
            poster_path: None,
            release_date: None,
            requested_quality_tier: "standard".into(),
            preferred_instance_id: None,
            season_number: Some(1),
            episode_number: None,
            is_season_request: true,
            is_episode_request: false,
        };
        let err = svc.create(season).await.unwrap_err();
        assert!(matches!(err, AppError::RequestConflict { reason: ConflictReason::WholeSeriesExists }));
    }

    #[tokio::test]
    async fn pending_request_increments_then_reject_decrements() {
        let pool = pool().await;
        movie_instance(&pool).await;
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "u1".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let user_permissions = UserPermissionsRepository::new(pool.clone());
        user_permissions.ensure(&user.id, None).await.unwrap();

        let svc = service(pool.clone()).await;
        let created = svc.create(movie_spec(&user.id)).await.unwrap();
        assert_eq!(created.status, RequestStatus::Pending.as_str());
        let record = user_permissions.get(&user.id).await.unwrap().unwrap();
        assert_eq!(record.current_request_count, 1);

        let admin = users
            .create(CreateUser {
                username: "owner".into(),
                is_server_owner: true,
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let rejected = svc.reject(&created.id, &admin.id).await.unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected.as_str());
        let record = user_permissions.get(&user.id).await.unwrap().unwrap();
        assert_eq!(record.current_request_count, 0);
    }
}
