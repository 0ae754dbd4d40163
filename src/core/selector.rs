//! Instance registry and selector (§4.C, §4.D).

use crate::core::permissions::PermissionsEngine;
use crate::db::media_requests::MediaType;
use crate::db::service_instances::{ServiceInstanceRecord, ServiceInstancesRepository, ServiceType};
use crate::errors::{AppError, AppResult};

fn service_type_for(media_type: MediaType) -> ServiceType {
    match media_type {
        MediaType::Movie => ServiceType::Movies,
        MediaType::Tv => ServiceType::Series,
    }
}

/// Convenience lookup for the admin surface: which instance answers each
/// default role, without re-running the full selector (§4.C, ADDED).
#[derive(Debug, Default)]
pub struct DefaultInstances {
    pub movie: Option<ServiceInstanceRecord>,
    pub tv: Option<ServiceInstanceRecord>,
    pub movie_4k: Option<ServiceInstanceRecord>,
    pub tv_4k: Option<ServiceInstanceRecord>,
}

#[derive(Clone)]
pub struct InstanceSelector {
    instances: ServiceInstancesRepository,
    permissions: PermissionsEngine,
}

impl InstanceSelector {
    pub fn new(instances: ServiceInstancesRepository, permissions: PermissionsEngine) -> Self {
        Self {
            instances,
            permissions,
        }
    }

    pub async fn default_instances(&self) -> AppResult<DefaultInstances> {
        let movies = self.instances.list_by_type(ServiceType::Movies, true, false).await?;
        let series = self.instances.list_by_type(ServiceType::Series, true, false).await?;
        Ok(DefaultInstances {
            movie: movies.iter().find(|i| i.is_default_movie).cloned(),
            movie_4k: movies.iter().find(|i| i.is_4k_default).cloned(),
            tv: series.iter().find(|i| i.is_default_tv).cloned(),
            tv_4k: series.iter().find(|i| i.is_4k_default).cloned(),
        })
    }

    /// Steps 1-3: the sorted, access-filtered candidate set for a user.
    async fn accessible_candidates(
        &self,
        user_id: &str,
        media_type: MediaType,
        quality_tier: &str,
    ) -> AppResult<Vec<ServiceInstanceRecord>> {
        let service_type = service_type_for(media_type);
        let quality_tier_4k = quality_tier == "4k";
        let sorted = self
            .instances
            .list_by_type(service_type, true, quality_tier_4k)
            .await?;
        let sole_instance_of_type = sorted.len() == 1;

        let mut accessible = Vec::with_capacity(sorted.len());
        for instance in sorted {
            if self
                .permissions
                .instance_access(user_id, &instance, media_type, sole_instance_of_type)
                .await?
            {
                accessible.push(instance);
            }
        }
        Ok(accessible)
    }

    /// Full selection: `(ordered candidates, chosen instance)`.
    pub async fn select(
        &self,
        user_id: &str,
        media_type: MediaType,
        quality_tier: &str,
        preferred_id: Option<&str>,
    ) -> AppResult<(Vec<ServiceInstanceRecord>, Option<ServiceInstanceRecord>)> {
        let candidates = self.accessible_candidates(user_id, media_type, quality_tier).await?;
        if candidates.is_empty() {
            return Ok((candidates, None));
        }

        if let Some(preferred_id) = preferred_id {
            if let Some(chosen) = candidates.iter().find(|i| i.id == preferred_id) {
                return Ok((candidates.clone(), Some(chosen.clone())));
            }
        }

        let service_type = service_type_for(media_type);
        let quality_tier_4k = quality_tier == "4k";

        let chosen = candidates
            .iter()
            .find(|i| i.is_default_for(service_type) && matches_quality_tier(i, quality_tier_4k))
            .or_else(|| candidates.iter().find(|i| i.is_default_for(service_type)))
            .or_else(|| {
                if quality_tier_4k {
                    candidates.iter().find(|i| i.is_4k_default)
                } else {
                    None
                }
            })
            .or_else(|| candidates.first())
            .cloned();

        Ok((candidates, chosen))
    }

    /// `validateInstanceAccess` (§4.D step 6): re-applies the instance-access
    /// rule to one named instance rather than the full sorted candidate set.
    pub async fn validate_instance_access(
        &self,
        user_id: &str,
        instance_id: &str,
        media_type: MediaType,
        _quality_tier: &str,
    ) -> AppResult<ServiceInstanceRecord> {
        let instance = self
            .instances
            .get_by_id(instance_id)
            .await?
            .ok_or_else(|| AppError::not_found("service instance"))?;
        if !instance.is_enabled {
            return Err(AppError::InstanceUnavailable);
        }
        if instance.service_type()? != service_type_for(media_type) {
            return Err(AppError::InstanceUnavailable);
        }
        let siblings = self
            .instances
            .list_by_type(instance.service_type()?, true, false)
            .await?;
        let sole_instance_of_type = siblings.len() == 1;
        if !self
            .permissions
            .instance_access(user_id, &instance, media_type, sole_instance_of_type)
            .await?
        {
            return Err(AppError::InstanceUnavailable);
        }
        Ok(instance)
    }
}

fn matches_quality_tier(instance: &ServiceInstanceRecord, quality_tier_4k: bool) -> bool {
    instance.is_4k_default == quality_tier_4k
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::roles::RolesRepository;
    use crate::db::service_instances::{CreateServiceInstance, InstanceSettings};
    use crate::db::settings::SettingsRepository;
    use crate::db::user_permissions::UserPermissionsRepository;
    use crate::db::users::{CreateUser, UsersRepository};
    use crate::db::Database;

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    fn selector(pool: Database) -> InstanceSelector {
        let permissions = PermissionsEngine::new(
            UsersRepository::new(pool.clone()),
            RolesRepository::new(pool.clone()),
            UserPermissionsRepository::new(pool.clone()),
            SettingsRepository::new(pool.clone()),
        );
        InstanceSelector::new(ServiceInstancesRepository::new(pool), permissions)
    }

    fn movie_instance(name: &str, is_default_movie: bool) -> CreateServiceInstance {
        CreateServiceInstance {
            name: name.into(),
            service_type: ServiceType::Movies,
            url: "http://localhost:7878".into(),
            api_key: "key".into(),
            is_default_movie,
            is_default_tv: false,
            is_4k_default: false,
            instance_category: None,
            quality_tier: "standard".into(),
            settings: InstanceSettings::default(),
            created_by: None,
        }
    }

    #[tokio::test]
    async fn sole_instance_fallback_for_unpermissioned_user() {
        let pool = pool().await;
        let instances = ServiceInstancesRepository::new(pool.clone());
        let instance = instances.create(movie_instance("only", false)).await.unwrap();
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "u1".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let selector = selector(pool);
        let (candidates, chosen) = selector
            .select(&user.id, MediaType::Movie, "standard", None)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(chosen.unwrap().id, instance.id);
    }

    #[tokio::test]
    async fn no_default_and_multiple_instances_fails_selection() {
        let pool = pool().await;
        let instances = ServiceInstancesRepository::new(pool.clone());
        instances.create(movie_instance("a", false)).await.unwrap();
        instances.create(movie_instance("b", false)).await.unwrap();
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "u1".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let selector = selector(pool);
        let (candidates, chosen) = selector
            .select(&user.id, MediaType::Movie, "standard", None)
            .await
            .unwrap();
        assert!(candidates.is_empty());
        assert!(chosen.is_none());
    }

    #[tokio::test]
    async fn preferred_id_wins_when_accessible() {
        let pool = pool().await;
        let instances = ServiceInstancesRepository::new(pool.clone());
        let default = instances.create(movie_instance("default", true)).await.unwrap();
        let other = instances.create(movie_instance("other", false)).await.unwrap();
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "owner".into(),
                is_server_owner: true,
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let selector = selector(pool);
        let (_, chosen) = selector
            .select(&user.id, MediaType::Movie, "standard", Some(&other.id))
            .await
            .unwrap();
        assert_eq!(chosen.unwrap().id, other.id);
        let _ = default.id;
    }
}
