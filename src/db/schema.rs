//! Hand-written schema migration and seed data.
//!
//! The teacher project's entity layer leans on a `#[derive(GraphQLEntity)]`
//! macro that auto-generates table DDL from struct field metadata; no such
//! macro is actually implemented anywhere in that project, so this module
//! instead follows the plain, working idiom used by its `db::users` module:
//! explicit `CREATE TABLE IF NOT EXISTS` statements run once at startup.

use anyhow::Result;
use sqlx::query;
use tracing::info;

use crate::db::Database;

/// Create every table this service needs if it does not already exist, and
/// seed the system default roles. Safe to call on every startup.
pub async fn sync_schema(pool: &Database) -> Result<()> {
    query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            external_identity_id TEXT UNIQUE,
            username TEXT NOT NULL UNIQUE,
            email TEXT,
            display_name TEXT,
            avatar_url TEXT,
            is_admin INTEGER NOT NULL DEFAULT 0,
            is_server_owner INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_local INTEGER NOT NULL DEFAULT 0,
            password_hash TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_tokens (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            token_hash TEXT NOT NULL UNIQUE,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            revoked_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    query("CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id)")
        .execute(pool)
        .await?;

    query(
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            permissions TEXT NOT NULL DEFAULT '{}',
            is_default INTEGER NOT NULL DEFAULT 0,
            is_system INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    query(
        r#"
        CREATE TABLE IF NOT EXISTS user_permissions (
            user_id TEXT PRIMARY KEY REFERENCES users(id),
            role_id TEXT REFERENCES roles(id),
            custom_permissions TEXT NOT NULL DEFAULT '{}',
            max_requests INTEGER,
            can_request_movies INTEGER,
            can_request_tv INTEGER,
            can_request_4k INTEGER,
            instance_permissions TEXT NOT NULL DEFAULT '{}',
            current_request_count INTEGER NOT NULL DEFAULT 0,
            total_requests_made INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    query(
        r#"
        CREATE TABLE IF NOT EXISTS service_instances (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            service_type TEXT NOT NULL,
            url TEXT NOT NULL,
            api_key TEXT NOT NULL,
            is_enabled INTEGER NOT NULL DEFAULT 1,
            is_default_movie INTEGER NOT NULL DEFAULT 0,
            is_default_tv INTEGER NOT NULL DEFAULT 0,
            is_4k_default INTEGER NOT NULL DEFAULT 0,
            instance_category TEXT,
            quality_tier TEXT NOT NULL DEFAULT 'standard',
            settings TEXT NOT NULL DEFAULT '{}',
            created_by TEXT REFERENCES users(id),
            created_at TEXT NOT NULL,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    query("CREATE INDEX IF NOT EXISTS idx_service_instances_type ON service_instances(service_type)")
        .execute(pool)
        .await?;

    query(
        r#"
        CREATE TABLE IF NOT EXISTS media_requests (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id),
            tmdb_id INTEGER NOT NULL,
            media_type TEXT NOT NULL,
            title TEXT NOT NULL,
            overview TEXT,
            poster_path TEXT,
            release_date TEXT,
            status TEXT NOT NULL,
            service_instance_id TEXT REFERENCES service_instances(id),
            requested_quality_tier TEXT NOT NULL,
            radarr_id INTEGER,
            sonarr_id INTEGER,
            season_number INTEGER,
            episode_number INTEGER,
            is_season_request INTEGER NOT NULL DEFAULT 0,
            is_episode_request INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            approved_by TEXT REFERENCES users(id),
            approved_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    query("CREATE INDEX IF NOT EXISTS idx_media_requests_user_status ON media_requests(user_id, status)")
        .execute(pool)
        .await?;
    query("CREATE INDEX IF NOT EXISTS idx_media_requests_tmdb ON media_requests(tmdb_id, media_type)")
        .execute(pool)
        .await?;
    query("CREATE INDEX IF NOT EXISTS idx_media_requests_status_created ON media_requests(status, created_at)")
        .execute(pool)
        .await?;

    query(
        r#"
        CREATE TABLE IF NOT EXISTS library_items (
            id TEXT PRIMARY KEY,
            media_type TEXT NOT NULL,
            tmdb_id INTEGER NOT NULL,
            season_number INTEGER,
            episode_number INTEGER,
            has_file INTEGER NOT NULL DEFAULT 1,
            synced_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_library_items_key \
         ON library_items(media_type, tmdb_id, season_number, episode_number)",
    )
    .execute(pool)
    .await?;

    query(
        r#"
        CREATE TABLE IF NOT EXISTS job_executions (
            id TEXT PRIMARY KEY,
            job_name TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            status TEXT NOT NULL,
            result_data TEXT,
            error_message TEXT,
            triggered_by TEXT NOT NULL,
            duration_seconds REAL
        )
        "#,
    )
    .execute(pool)
    .await?;
    query("CREATE INDEX IF NOT EXISTS idx_job_executions_job_name ON job_executions(job_name)")
        .execute(pool)
        .await?;
    query("CREATE INDEX IF NOT EXISTS idx_job_executions_started_at ON job_executions(started_at DESC)")
        .execute(pool)
        .await?;
    // Enforces single-flight at the storage layer (§4.H, §8 invariant 5):
    // at most one RUNNING row per job_name, even under concurrent writers.
    query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_job_executions_running \
         ON job_executions(job_name) WHERE status = 'RUNNING'",
    )
    .execute(pool)
    .await?;

    query(
        r#"
        CREATE TABLE IF NOT EXISTS category_cache (
            media_type TEXT NOT NULL,
            category TEXT NOT NULL,
            page INTEGER NOT NULL,
            payload TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (media_type, category, page)
        )
        "#,
    )
    .execute(pool)
    .await?;

    query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            base_url TEXT NOT NULL DEFAULT '',
            theme TEXT NOT NULL DEFAULT 'default',
            request_approval_policy TEXT NOT NULL DEFAULT 'manual',
            library_sync_allow_list TEXT NOT NULL DEFAULT '[]',
            job_config TEXT NOT NULL DEFAULT '{}',
            default_request_limit INTEGER NOT NULL DEFAULT 10,
            request_retention_days INTEGER NOT NULL DEFAULT 30,
            connection_secrets TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    seed_default_roles(pool).await?;
    seed_settings_singleton(pool).await?;

    info!("schema sync complete");
    Ok(())
}

/// Seed the five system roles described in §3 if the `roles` table is empty
/// of them. Mirrors `ensure_default_roles` from the permission service this
/// was grounded on: idempotent, keyed by unique role name.
async fn seed_default_roles(pool: &Database) -> Result<()> {
    use crate::db::sqlite_helpers::now_iso8601;
    use uuid::Uuid;

    struct SeedRole {
        name: &'static str,
        display_name: &'static str,
        description: &'static str,
        permissions: &'static [&'static str],
        is_default: bool,
    }

    const ADMIN_PERMS: &[&str] = &[
        "admin.approve_requests",
        "admin.delete_requests",
        "admin.manage_users",
        "admin.manage_instances",
        "admin.manage_settings",
        "admin.trigger_jobs",
        "request.manage_all",
        "request.movies",
        "request.tv",
        "request.4k",
        "request.unlimited",
        "request.auto_approve_movies",
        "request.auto_approve_tv",
        "request.auto_approve_4k",
        "discover.browse",
        "account.edit_profile",
        "account.view_activity",
    ];
    const MODERATOR_PERMS: &[&str] = &[
        "admin.approve_requests",
        "request.manage_all",
        "request.movies",
        "request.tv",
        "discover.browse",
        "account.edit_profile",
        "account.view_activity",
    ];
    const POWER_USER_PERMS: &[&str] = &[
        "request.movies",
        "request.tv",
        "request.4k",
        "request.auto_approve_movies",
        "request.auto_approve_tv",
        "discover.browse",
        "account.edit_profile",
        "account.view_activity",
    ];
    const BASIC_USER_PERMS: &[&str] = &[
        "request.movies",
        "request.tv",
        "discover.browse",
        "account.edit_profile",
        "account.view_activity",
    ];
    const LIMITED_PERMS: &[&str] = &[
        "account.edit_profile",
        "account.view_activity",
        "discover.browse",
    ];

    let seeds = [
        SeedRole {
            name: "admin",
            display_name: "Administrator",
            description: "Full administrative access to all features",
            permissions: ADMIN_PERMS,
            is_default: false,
        },
        SeedRole {
            name: "moderator",
            display_name: "Moderator",
            description: "Can manage requests and moderate content with limited admin access",
            permissions: MODERATOR_PERMS,
            is_default: false,
        },
        SeedRole {
            name: "power_user",
            display_name: "Power User",
            description: "Advanced user with auto-approval and 4K access",
            permissions: POWER_USER_PERMS,
            is_default: false,
        },
        SeedRole {
            name: "basic_user",
            display_name: "Basic User",
            description: "Standard user with basic request privileges",
            permissions: BASIC_USER_PERMS,
            is_default: true,
        },
        SeedRole {
            name: "limited",
            display_name: "Limited User",
            description: "Restricted user with minimal permissions",
            permissions: LIMITED_PERMS,
            is_default: false,
        },
    ];

    for seed in seeds {
        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM roles WHERE name = ?")
            .bind(seed.name)
            .fetch_optional(pool)
            .await?;
        if existing.is_some() {
            continue;
        }
        let permissions: std::collections::HashMap<&str, bool> =
            seed.permissions.iter().map(|p| (*p, true)).collect();
        let now = now_iso8601();
        query(
            "INSERT INTO roles (id, name, display_name, description, permissions, is_default, is_system, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(seed.name)
        .bind(seed.display_name)
        .bind(seed.description)
        .bind(serde_json::to_string(&permissions)?)
        .bind(seed.is_default as i32)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    Ok(())
}

async fn seed_settings_singleton(pool: &Database) -> Result<()> {
    use crate::db::sqlite_helpers::now_iso8601;

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM settings WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Ok(());
    }
    query("INSERT INTO settings (id, updated_at) VALUES (1, ?)")
        .bind(now_iso8601())
        .execute(pool)
        .await?;
    Ok(())
}
