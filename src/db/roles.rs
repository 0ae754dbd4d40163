//! Role repository (§3 "Role").

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::sqlite_helpers::{from_json, now_iso8601, to_json};
use crate::db::Database;

#[derive(Debug, Clone, FromRow)]
pub struct RoleRecord {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub permissions: String,
    pub is_default: bool,
    pub is_system: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl RoleRecord {
    pub fn permissions_map(&self) -> HashMap<String, bool> {
        from_json(&self.permissions).unwrap_or_default()
    }

    pub fn has_permission(&self, flag: &str) -> bool {
        self.permissions_map().get(flag).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateRole {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub permissions: HashMap<String, bool>,
    pub is_default: bool,
}

#[derive(Clone)]
pub struct RolesRepository {
    pool: Database,
}

impl RolesRepository {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    pub async fn create(&self, role: CreateRole) -> Result<RoleRecord> {
        let id = Uuid::new_v4().to_string();
        let now = now_iso8601();

        if role.is_default {
            self.clear_default().await?;
        }

        sqlx::query(
            "INSERT INTO roles (id, name, display_name, description, permissions, is_default, is_system, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(&role.name)
        .bind(&role.display_name)
        .bind(&role.description)
        .bind(to_json(&role.permissions))
        .bind(role.is_default as i32)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow!("failed to create role"))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<RoleRecord>> {
        Ok(sqlx::query_as(
            "SELECT id, name, display_name, description, permissions, is_default, is_system, \
             created_at, updated_at FROM roles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<RoleRecord>> {
        Ok(sqlx::query_as(
            "SELECT id, name, display_name, description, permissions, is_default, is_system, \
             created_at, updated_at FROM roles WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get_default(&self) -> Result<Option<RoleRecord>> {
        Ok(sqlx::query_as(
            "SELECT id, name, display_name, description, permissions, is_default, is_system, \
             created_at, updated_at FROM roles WHERE is_default = 1 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_all(&self) -> Result<Vec<RoleRecord>> {
        Ok(sqlx::query_as(
            "SELECT id, name, display_name, description, permissions, is_default, is_system, \
             created_at, updated_at FROM roles ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn clear_default(&self) -> Result<()> {
        sqlx::query("UPDATE roles SET is_default = 0 WHERE is_default = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_permissions(
        &self,
        id: &str,
        permissions: HashMap<String, bool>,
    ) -> Result<Option<RoleRecord>> {
        sqlx::query("UPDATE roles SET permissions = ?, updated_at = ? WHERE id = ?")
            .bind(to_json(&permissions))
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_by_id(id).await
    }

    pub async fn set_default(&self, id: &str) -> Result<Option<RoleRecord>> {
        self.clear_default().await?;
        sqlx::query("UPDATE roles SET is_default = 1, updated_at = ? WHERE id = ?")
            .bind(now_iso8601())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_by_id(id).await
    }

    /// System roles (§3: "System roles cannot be deleted") are rejected by
    /// the caller before this runs; this performs the raw delete.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM roles WHERE id = ? AND is_system = 0")
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

    #[tokio::test]
    async fn seeded_default_role_is_basic_user() {
        let repo = RolesRepository::new(pool().await);
        let default_role = repo.get_default().await.unwrap().unwrap();
        assert_eq!(default_role.name, "basic_user");
        assert!(default_role.is_system);
    }

    #[tokio::test]
    async fn setting_new_default_clears_old_one() {
        let repo = RolesRepository::new(pool().await);
        let custom = repo
            .create(CreateRole {
                name: "custom".into(),
                display_name: "Custom".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        repo.set_default(&custom.id).await.unwrap();

        let basic = repo.get_by_name("basic_user").await.unwrap().unwrap();
        assert!(!basic.is_default);
        let refreshed = repo.get_by_id(&custom.id).await.unwrap().unwrap();
        assert!(refreshed.is_default);
    }

    #[tokio::test]
    async fn system_role_delete_is_rejected() {
        let repo = RolesRepository::new(pool().await);
        let admin = repo.get_by_name("admin").await.unwrap().unwrap();
        assert!(!repo.delete(&admin.id).await.unwrap());
    }
}
