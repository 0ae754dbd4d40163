//! Permission engine (§4.B): resolves a user's effective capabilities from
//! role defaults, per-user overrides, and instance/category grants.

use std::collections::HashMap;

use crate::db::media_requests::MediaType;
use crate::db::roles::RolesRepository;
use crate::db::service_instances::{ServiceInstanceRecord, ServiceType};
use crate::db::settings::SettingsRepository;
use crate::db::user_permissions::{UserPermissionsRecord, UserPermissionsRepository};
use crate::db::users::UsersRepository;
use crate::errors::{AppError, AppResult};

pub const ADMIN_APPROVE_REQUESTS: &str = "admin.approve_requests";
pub const ADMIN_DELETE_REQUESTS: &str = "admin.delete_requests";
pub const ADMIN_MANAGE_USERS: &str = "admin.manage_users";
pub const ADMIN_MANAGE_INSTANCES: &str = "admin.manage_instances";
pub const ADMIN_MANAGE_SETTINGS: &str = "admin.manage_settings";
pub const ADMIN_TRIGGER_JOBS: &str = "admin.trigger_jobs";
pub const REQUEST_MANAGE_ALL: &str = "request.manage_all";
pub const REQUEST_MOVIES: &str = "request.movies";
pub const REQUEST_TV: &str = "request.tv";
pub const REQUEST_4K: &str = "request.4k";
pub const REQUEST_UNLIMITED: &str = "request.unlimited";
pub const REQUEST_AUTO_APPROVE_MOVIES: &str = "request.auto_approve_movies";
pub const REQUEST_AUTO_APPROVE_TV: &str = "request.auto_approve_tv";
pub const REQUEST_AUTO_APPROVE_4K: &str = "request.auto_approve_4k";
pub const DISCOVER_BROWSE: &str = "discover.browse";
pub const ACCOUNT_EDIT_PROFILE: &str = "account.edit_profile";
pub const ACCOUNT_VIEW_ACTIVITY: &str = "account.view_activity";

#[derive(Clone)]
pub struct PermissionsEngine {
    users: UsersRepository,
    roles: RolesRepository,
    user_permissions: UserPermissionsRepository,
    settings: SettingsRepository,
}

impl PermissionsEngine {
    pub fn new(
        users: UsersRepository,
        roles: RolesRepository,
        user_permissions: UserPermissionsRepository,
        settings: SettingsRepository,
    ) -> Self {
        Self {
            users,
            roles,
            user_permissions,
            settings,
        }
    }

    /// Lazily materializes a `UserPermissions` row pointed at the system
    /// default role the first time any permission check runs for a user.
    pub async fn ensure_default_user_permissions(
        &self,
        user_id: &str,
    ) -> AppResult<UserPermissionsRecord> {
        let default_role = self.roles.get_default().await?;
        Ok(self
            .user_permissions
            .ensure(user_id, default_role.as_ref().map(|r| r.id.as_str()))
            .await?)
    }

    async fn is_privileged(&self, user_id: &str) -> AppResult<bool> {
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user"))?;
        Ok(user.is_effectively_admin())
    }

    /// Resolution order (§4.B): server owner/legacy admin grants everything;
    /// then dedicated tri-state columns; then `custom_permissions`; then the
    /// assigned role; otherwise deny.
    pub async fn has_permission(&self, user_id: &str, flag: &str) -> AppResult<bool> {
        if self.is_privileged(user_id).await? {
            return Ok(true);
        }
        let overlay = self.ensure_default_user_permissions(user_id).await?;

        if let Some(dedicated) = dedicated_flag_override(&overlay, flag) {
            return Ok(dedicated);
        }
        let custom = overlay.custom_permissions_map();
        if let Some(v) = custom.get(flag) {
            return Ok(*v);
        }
        if let Some(role_id) = &overlay.role_id {
            if let Some(role) = self.roles.get_by_id(role_id).await? {
                return Ok(role.has_permission(flag));
            }
        }
        Ok(false)
    }

    pub async fn can_request_media_type(&self, user_id: &str, media_type: MediaType) -> AppResult<bool> {
        let flag = match media_type {
            MediaType::Movie => REQUEST_MOVIES,
            MediaType::Tv => REQUEST_TV,
        };
        self.has_permission(user_id, flag).await
    }

    pub async fn can_request_4k(&self, user_id: &str) -> AppResult<bool> {
        self.has_permission(user_id, REQUEST_4K).await
    }

    pub async fn should_auto_approve(&self, user_id: &str, media_type: MediaType) -> AppResult<bool> {
        let flag = match media_type {
            MediaType::Movie => REQUEST_AUTO_APPROVE_MOVIES,
            MediaType::Tv => REQUEST_AUTO_APPROVE_TV,
        };
        self.has_permission(user_id, flag).await
    }

    /// `None` means unlimited (either an explicit override or
    /// `REQUEST_UNLIMITED`); `Some(n)` is the effective cap.
    pub async fn request_limit(&self, user_id: &str) -> AppResult<Option<i64>> {
        if self.has_permission(user_id, REQUEST_UNLIMITED).await? {
            return Ok(None);
        }
        let overlay = self.ensure_default_user_permissions(user_id).await?;
        if let Some(max) = overlay.max_requests {
            return Ok(Some(max));
        }
        let settings = self.settings.get().await?;
        Ok(Some(settings.default_request_limit))
    }

    /// `(allowed, reason_if_not)`.
    pub async fn can_make_request(&self, user_id: &str) -> AppResult<(bool, Option<String>)> {
        let limit = match self.request_limit(user_id).await? {
            None => return Ok((true, None)),
            Some(limit) => limit,
        };
        let overlay = self.ensure_default_user_permissions(user_id).await?;
        if overlay.current_request_count >= limit {
            return Ok((
                false,
                Some(format!(
                    "Request limit reached ({}/{})",
                    overlay.current_request_count, limit
                )),
            ));
        }
        Ok((true, None))
    }

    pub async fn increment_request_count(&self, user_id: &str) -> AppResult<()> {
        Ok(self.user_permissions.increment_request_count(user_id).await?)
    }

    pub async fn decrement_request_count(&self, user_id: &str) -> AppResult<()> {
        Ok(self.user_permissions.decrement_request_count(user_id).await?)
    }

    /// Recompute every user's `current_request_count` from pending rows
    /// directly (§8 invariant 3); heals drift after a restart or a bug.
    pub async fn sync_request_counts(&self) -> AppResult<u64> {
        Ok(self.user_permissions.sync_request_counts().await?)
    }

    /// The fully resolved flag→bool map for a user, used by the admin
    /// surface to render what a user can actually do.
    pub async fn effective_permissions(&self, user_id: &str) -> AppResult<HashMap<String, bool>> {
        const ALL_FLAGS: &[&str] = &[
            ADMIN_APPROVE_REQUESTS,
            ADMIN_DELETE_REQUESTS,
            ADMIN_MANAGE_USERS,
            ADMIN_MANAGE_INSTANCES,
            ADMIN_MANAGE_SETTINGS,
            ADMIN_TRIGGER_JOBS,
            REQUEST_MANAGE_ALL,
            REQUEST_MOVIES,
            REQUEST_TV,
            REQUEST_4K,
            REQUEST_UNLIMITED,
            REQUEST_AUTO_APPROVE_MOVIES,
            REQUEST_AUTO_APPROVE_TV,
            REQUEST_AUTO_APPROVE_4K,
            DISCOVER_BROWSE,
            ACCOUNT_EDIT_PROFILE,
            ACCOUNT_VIEW_ACTIVITY,
        ];
        let mut map = HashMap::with_capacity(ALL_FLAGS.len());
        for flag in ALL_FLAGS {
            map.insert(flag.to_string(), self.has_permission(user_id, flag).await?);
        }
        Ok(map)
    }

    /// Instance-access rule (§4.B), shared by the selector. A user without
    /// any `UserPermissions` row and no explicit grants still gets access to
    /// an instance marked default for the media type, or — as a last
    /// resort — the sole enabled instance of that type.
    pub async fn instance_access(
        &self,
        user_id: &str,
        instance: &ServiceInstanceRecord,
        media_type: MediaType,
        sole_instance_of_type: bool,
    ) -> AppResult<bool> {
        if self.is_privileged(user_id).await? {
            return Ok(true);
        }
        let overlay = self.ensure_default_user_permissions(user_id).await?;
        let category = instance.instance_category.as_deref();
        if let Some(explicit) = overlay.instance_access(&instance.id, category) {
            return Ok(explicit);
        }
        let has_any_grant = !overlay.instance_permissions_map().is_empty();
        if has_any_grant {
            return Ok(false);
        }
        let service_type = match media_type {
            MediaType::Movie => ServiceType::Movies,
            MediaType::Tv => ServiceType::Series,
        };
        if instance.is_default_for(service_type) {
            return Ok(true);
        }
        Ok(sole_instance_of_type)
    }
}

/// Dedicated tri-state columns outrank `custom_permissions` (§3, §4.B
/// resolution order) for their matching flag only.
fn dedicated_flag_override(overlay: &UserPermissionsRecord, flag: &str) -> Option<bool> {
    match flag {
        REQUEST_MOVIES => overlay.can_request_movies,
        REQUEST_TV => overlay.can_request_tv,
        REQUEST_4K => overlay.can_request_4k,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::roles::CreateRole;
    use crate::db::users::CreateUser;
    use crate::db::Database;

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    async fn engine(pool: Database) -> PermissionsEngine {
        PermissionsEngine::new(
            UsersRepository::new(pool.clone()),
            RolesRepository::new(pool.clone()),
            UserPermissionsRepository::new(pool.clone()),
            SettingsRepository::new(pool),
        )
    }

    #[tokio::test]
    async fn basic_user_gets_role_defaults() {
        let pool = pool().await;
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "basic".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let engine = engine(pool).await;
        assert!(engine.has_permission(&user.id, REQUEST_MOVIES).await.unwrap());
        assert!(!engine.has_permission(&user.id, ADMIN_APPROVE_REQUESTS).await.unwrap());
    }

    #[tokio::test]
    async fn server_owner_bypasses_everything() {
        let pool = pool().await;
        let users = UsersRepository::new(pool.clone());
        let owner = users
            .create(CreateUser {
                username: "owner".into(),
                is_server_owner: true,
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let engine = engine(pool).await;
        assert!(engine.has_permission(&owner.id, ADMIN_MANAGE_SETTINGS).await.unwrap());
    }

    #[tokio::test]
    async fn dedicated_column_overrides_role() {
        let pool = pool().await;
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "restricted".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let user_permissions = UserPermissionsRepository::new(pool.clone());
        user_permissions.ensure(&user.id, None).await.unwrap();
        user_permissions
            .set_tri_state_flags(&user.id, Some(Some(false)), None, None)
            .await
            .unwrap();
        let engine = engine(pool).await;
        assert!(!engine.has_permission(&user.id, REQUEST_MOVIES).await.unwrap());
    }

    #[tokio::test]
    async fn quota_blocks_at_limit() {
        let pool = pool().await;
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "limited".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let user_permissions = UserPermissionsRepository::new(pool.clone());
        user_permissions.ensure(&user.id, None).await.unwrap();
        user_permissions.set_max_requests(&user.id, Some(1)).await.unwrap();
        let engine = engine(pool).await;
        let (allowed, _) = engine.can_make_request(&user.id).await.unwrap();
        assert!(allowed);
        engine.increment_request_count(&user.id).await.unwrap();
        let (allowed, reason) = engine.can_make_request(&user.id).await.unwrap();
        assert!(!allowed);
        assert!(reason.unwrap().contains("1/1"));
    }

    #[tokio::test]
    async fn unlimited_flag_bypasses_quota() {
        let pool = pool().await;
        let users = UsersRepository::new(pool.clone());
        let user = users
            .create(CreateUser {
                username: "vip".into(),
                password_hash: Some("hash".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let roles = RolesRepository::new(pool.clone());
        let mut perms = HashMap::new();
        perms.insert(REQUEST_UNLIMITED.to_string(), true);
        let role = roles
            .create(CreateRole {
                name: "vip_role".into(),
                display_name: "VIP".into(),
                permissions: perms,
                ..Default::default()
            })
            .await
            .unwrap();
        let user_permissions = UserPermissionsRepository::new(pool.clone());
        user_permissions.ensure(&user.id, Some(&role.id)).await.unwrap();
        user_permissions.set_max_requests(&user.id, Some(0)).await.unwrap();
        let engine = engine(pool).await;
        let (allowed, _) = engine.can_make_request(&user.id).await.unwrap();
        assert!(allowed);
    }
}
