//! mediarr — media request orchestration service.
//!
//! Wires the request lifecycle, permission engine, instance selector,
//! integration dispatcher, status reconciler, job scheduler, category
//! cache, and settings service together behind a REST API.

mod api;
mod app;
mod config;
mod core;
mod db;
mod errors;
mod integrations;
mod jobs;
mod services;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use crate::app::AppState;

use crate::config::Config;
use crate::core::category_cache::CategoryCacheService;
use crate::core::dispatcher::IntegrationDispatcher;
use crate::core::permissions::PermissionsEngine;
use crate::core::reconciler::StatusReconciler;
use crate::core::requests::RequestService;
use crate::core::scheduler::Scheduler;
use crate::core::secrets::SecretsCipher;
use crate::core::selector::InstanceSelector;
use crate::core::settings_service::SettingsService;
use crate::db::category_cache::CategoryCacheRepository;
use crate::db::job_executions::JobExecutionsRepository;
use crate::db::library_mirror::LibraryMirrorRepository;
use crate::db::media_requests::MediaRequestsRepository;
use crate::db::refresh_tokens::RefreshTokensRepository;
use crate::db::roles::RolesRepository;
use crate::db::service_instances::ServiceInstancesRepository;
use crate::db::settings::SettingsRepository;
use crate::db::user_permissions::UserPermissionsRepository;
use crate::db::users::UsersRepository;
use crate::db::Database;
use crate::integrations::catalog::TmdbCatalogClient;
use crate::integrations::library_server::LibraryServerClient;
use crate::jobs::{CategoryCacheJob, DownloadStatusCheckJob, LibrarySyncJob, RequestCleanupJob, RequestSubmissionJob};
use crate::services::auth::{AuthConfig, AuthService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let config = Arc::new(config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediarr=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(environment = %config.environment, "starting mediarr");

    let db: Database = crate::db::connect_with_retry(&config.database_url, Duration::from_secs(30)).await?;
    crate::db::schema::sync_schema(&db).await?;
    tracing::info!("database connected and schema synced");

    let users = UsersRepository::new(db.clone());
    let roles = RolesRepository::new(db.clone());
    let user_permissions = UserPermissionsRepository::new(db.clone());
    let settings_repo = SettingsRepository::new(db.clone());
    let refresh_tokens = RefreshTokensRepository::new(db.clone());
    let service_instances = ServiceInstancesRepository::new(db.clone());
    let media_requests = MediaRequestsRepository::new(db.clone());
    let library_mirror = LibraryMirrorRepository::new(db.clone());
    let category_cache_repo = CategoryCacheRepository::new(db.clone());
    let job_executions = JobExecutionsRepository::new(db.clone());

    let cipher = SecretsCipher::new(&config.secrets_encryption_key);
    let settings = SettingsService::new(settings_repo.clone(), cipher);

    let permissions = PermissionsEngine::new(users.clone(), roles, user_permissions, settings_repo);
    let selector = InstanceSelector::new(service_instances.clone(), permissions.clone());
    let dispatcher = IntegrationDispatcher::new(service_instances.clone(), media_requests.clone());
    let requests = RequestService::new(media_requests.clone(), permissions.clone(), selector.clone(), dispatcher.clone());
    let reconciler = StatusReconciler::new(media_requests.clone(), service_instances.clone());

    let auth = AuthService::new(users, refresh_tokens, AuthConfig::from_config(&config));

    let catalog = Arc::new(TmdbCatalogClient::new(settings.clone()));
    let category_cache = Arc::new(CategoryCacheService::new(
        category_cache_repo,
        library_mirror.clone(),
        media_requests.clone(),
        catalog,
    ));

    let library_server_client = build_library_server_client(&settings).await;

    let mut scheduler = Scheduler::new(job_executions, settings.clone());
    scheduler.register(
        "library_sync",
        Arc::new(LibrarySyncJob::new(
            settings.clone(),
            library_server_client,
            library_mirror,
            category_cache.clone(),
        )),
    );
    scheduler.register("download_status_check", Arc::new(DownloadStatusCheckJob::new(reconciler)));
    scheduler.register(
        "request_submission",
        Arc::new(RequestSubmissionJob::new(media_requests.clone(), dispatcher.clone())),
    );
    scheduler.register(
        "request_cleanup",
        Arc::new(RequestCleanupJob::new(media_requests.clone(), settings.clone())),
    );
    scheduler.register("category_cache", Arc::new(CategoryCacheJob::new(category_cache.clone())));

    let scheduler = Arc::new(scheduler);
    scheduler.start().await?;
    tracing::info!("job scheduler started");

    let state = AppState {
        config: config.clone(),
        db,
        auth,
        permissions,
        selector,
        requests,
        dispatcher,
        settings,
        scheduler: scheduler.clone(),
        category_cache,
        instances: service_instances,
        media_requests,
    };

    let app = app::build_app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    scheduler.stop(Duration::from_secs(30)).await;
    tracing::info!("shutdown complete");

    Ok(())
}

/// Builds the library server client from stored connection secrets. Unlike
/// job schedules (hot-reloaded via `SettingsService::job_config_changes`),
/// a change to these two secrets takes effect on next restart only — see
/// DESIGN.md.
async fn build_library_server_client(settings: &SettingsService) -> LibraryServerClient {
    let record = match settings.get().await {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(error = %err, "could not read settings for library server client, using empty credentials");
            return LibraryServerClient::new("", "");
        }
    };
    let secrets = settings.decrypt_connection_secrets(&record).unwrap_or_default();
    let base_url = secrets.get("library_server:url").cloned().unwrap_or_default();
    let token = secrets.get("library_server:token").cloned().unwrap_or_default();
    if base_url.is_empty() {
        tracing::warn!("library_server:url is not configured; library_sync will run as a no-op");
    }
    LibraryServerClient::new(&base_url, &token)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
