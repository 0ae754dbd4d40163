//! Database connection and entity repositories.
//!
//! SQLite doesn't natively support UUIDs, arrays, or JSONB; see
//! [`sqlite_helpers`] for the conversions used throughout the repositories
//! below. Every repository follows the same shape: a `Create*`/`Update*`
//! input struct, a `*Record` row struct, and a `*Repository { pool }` wrapper
//! with hand-written `sqlx` queries (no derive-based ORM).

pub mod category_cache;
pub mod job_executions;
pub mod library_mirror;
pub mod media_requests;
pub mod refresh_tokens;
pub mod roles;
pub mod schema;
pub mod service_instances;
pub mod settings;
pub mod sqlite_helpers;
pub mod user_permissions;
pub mod users;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub use category_cache::CategoryCacheRepository;
pub use job_executions::JobExecutionsRepository;
pub use library_mirror::LibraryMirrorRepository;
pub use media_requests::MediaRequestsRepository;
pub use refresh_tokens::RefreshTokensRepository;
pub use roles::RolesRepository;
pub use service_instances::ServiceInstancesRepository;
pub use settings::SettingsRepository;
pub use user_permissions::UserPermissionsRepository;
pub use users::UsersRepository;

/// The connection pool type used throughout the repositories.
pub type Database = SqlitePool;

/// Connect to the SQLite database, creating the file if it doesn't exist,
/// retrying briefly to ride out a not-yet-ready volume mount.
pub async fn connect_with_retry(url: &str, timeout: Duration) -> Result<Database> {
    let options: SqliteConnectOptions = url
        .parse::<SqliteConnectOptions>()
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_err = None;
    loop {
        match SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.clone())
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                last_err = Some(e);
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
    }
    Err(anyhow::anyhow!(
        "failed to connect to database at {url}: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    ))
}
