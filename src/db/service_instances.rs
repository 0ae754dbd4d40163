//! Downstream service instance repository (§3 "ServiceInstance", §4.C).

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::sqlite_helpers::{from_json, now_iso8601, to_json};
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceType {
    Movies,
    Series,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Movies => "MOVIES",
            ServiceType::Series => "SERIES",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "MOVIES" => Ok(ServiceType::Movies),
            "SERIES" => Ok(ServiceType::Series),
            other => Err(anyhow!("unknown service_type '{other}' in service_instances row")),
        }
    }
}

/// Effective per-instance configuration derived from the `settings` JSON
/// blob (§4.C), with documented defaults for anything absent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstanceSettings {
    #[serde(default)]
    pub quality_profile_id: Option<i64>,
    #[serde(default)]
    pub root_folder_path: Option<String>,
    #[serde(default)]
    pub language_profile_id: Option<i64>,
    #[serde(default)]
    pub minimum_availability: Option<String>,
    #[serde(default = "default_monitor")]
    pub monitor: String,
    #[serde(default)]
    pub tags: Vec<i64>,
    #[serde(default = "default_true")]
    pub enable_integration: bool,
}

fn default_monitor() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, FromRow)]
pub struct ServiceInstanceRecord {
    pub id: String,
    pub name: String,
    pub service_type: String,
    pub url: String,
    pub api_key: String,
    pub is_enabled: bool,
    pub is_default_movie: bool,
    pub is_default_tv: bool,
    pub is_4k_default: bool,
    pub instance_category: Option<String>,
    pub quality_tier: String,
    pub settings: String,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl ServiceInstanceRecord {
    pub fn service_type(&self) -> Result<ServiceType> {
        ServiceType::parse(&self.service_type)
    }

    pub fn effective_settings(&self) -> InstanceSettings {
        from_json(&self.settings).unwrap_or_default()
    }

    pub fn is_default_for(&self, service_type: ServiceType) -> bool {
        match service_type {
            ServiceType::Movies => self.is_default_movie,
            ServiceType::Series => self.is_default_tv,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateServiceInstance {
    pub name: String,
    pub service_type: ServiceType,
    pub url: String,
    pub api_key: String,
    pub is_default_movie: bool,
    pub is_default_tv: bool,
    pub is_4k_default: bool,
    pub instance_category: Option<String>,
    pub quality_tier: String,
    pub settings: InstanceSettings,
    pub created_by: Option<String>,
}

#[derive(Clone)]
pub struct ServiceInstancesRepository {
    pool: Database,
}

impl ServiceInstancesRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    const COLUMNS: &'static str = "id, name, service_type, url, api_key, is_enabled, \
         is_default_movie, is_default_tv, is_4k_default, instance_category, quality_tier, \
         settings, created_by, created_at, updated_at";

    pub async fn create(&self, instance: CreateServiceInstance) -> Result<ServiceInstanceRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_iso8601();
        sqlx::query(
            "INSERT INTO service_instances (id, name, service_type, url, api_key, is_enabled, \
             is_default_movie, is_default_tv, is_4k_default, instance_category, quality_tier, \
             settings, created_by, created_at) \
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&instance.name)
        .bind(instance.service_type.as_str())
        .bind(&instance.url)
        .bind(&instance.api_key)
        .bind(instance.is_default_movie as i32)
        .bind(instance.is_default_tv as i32)
        .bind(instance.is_4k_default as i32)
        .bind(&instance.instance_category)
        .bind(&instance.quality_tier)
        .bind(to_json(&instance.settings))
        .bind(&instance.created_by)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow!("failed to create service instance"))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<ServiceInstanceRecord>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM service_instances WHERE id = ?",
            Self::COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Enumerate instances by [`ServiceType`], ordered per the selector's
    /// sort (§4.D step 2): default-for-media-type desc, 4K-default desc
    /// when `quality_tier_4k` is requested, then name asc.
    pub async fn list_by_type(
        &self,
        service_type: ServiceType,
        enabled_only: bool,
        quality_tier_4k: bool,
    ) -> Result<Vec<ServiceInstanceRecord>> {
        let media_default_col = match service_type {
            ServiceType::Movies => "is_default_movie",
            ServiceType::Series => "is_default_tv",
        };
        let quality_order = if quality_tier_4k { "DESC" } else { "ASC" };
        let where_enabled = if enabled_only { "AND is_enabled = 1" } else { "" };
        let sql = format!(
            "SELECT {cols} FROM service_instances \
             WHERE service_type = ? {enabled} \
             ORDER BY {media_default_col} DESC, is_4k_default {quality_order}, name ASC",
            cols = Self::COLUMNS,
            enabled = where_enabled,
            media_default_col = media_default_col,
            quality_order = quality_order,
        );
        Ok(sqlx::query_as(&sql)
            .bind(service_type.as_str())
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Option<ServiceInstanceRecord>> {
        sqlx::query("UPDATE service_instances SET is_enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled as i32)
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_by_id(id).await
    }

    pub async fn update_settings(&self, id: &str, settings: InstanceSettings) -> Result<Option<ServiceInstanceRecord>> {
        sqlx::query("UPDATE service_instances SET settings = ?, updated_at = ? WHERE id = ?")
            .bind(to_json(&settings))
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_by_id(id).await
    }

    pub async fn has_requests_referencing(&self, id: &str) -> Result<bool> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM media_requests WHERE service_instance_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 > 0)
    }

    /// Blocked at the caller level while requests reference it (§3
    /// "Ownership"); this performs the raw delete.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM service_instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
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

    fn sample(name: &str, is_default_movie: bool) -> CreateServiceInstance {
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
    async fn list_orders_default_first_then_name() {
        let repo = ServiceInstancesRepository::new(pool().await);
        repo.create(sample("zeta", false)).await.unwrap();
        repo.create(sample("alpha-default", true)).await.unwrap();
        repo.create(sample("beta", false)).await.unwrap();

        let list = repo
            .list_by_type(ServiceType::Movies, true, false)
            .await
            .unwrap();
        assert_eq!(list[0].name, "alpha-default");
        assert_eq!(list[1].name, "beta");
        assert_eq!(list[2].name, "zeta");
    }

    #[tokio::test]
    async fn disabled_excluded_when_enabled_only() {
        let repo = ServiceInstancesRepository::new(pool().await);
        let created = repo.create(sample("inst", false)).await.unwrap();
        repo.set_enabled(&created.id, false).await.unwrap();
        let list = repo
            .list_by_type(ServiceType::Movies, true, false)
            .await
            .unwrap();
        assert!(list.is_empty());
    }
}
