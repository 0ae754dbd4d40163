//! Application state and HTTP router construction.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::core::category_cache::CategoryCacheService;
use crate::core::dispatcher::IntegrationDispatcher;
use crate::core::permissions::PermissionsEngine;
use crate::core::requests::RequestService;
use crate::core::scheduler::Scheduler;
use crate::core::selector::InstanceSelector;
use crate::core::settings_service::SettingsService;
use crate::db::media_requests::MediaRequestsRepository;
use crate::db::service_instances::ServiceInstancesRepository;
use crate::db::Database;
use crate::integrations::catalog::TmdbCatalogClient;
use crate::services::AuthService;

/// Shared state for every HTTP handler. Each field is an already-assembled
/// core/service component (built once in `main`); handlers talk to the
/// domain layer, never to `sqlx` directly, except for the narrow read-only
/// request listing query.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub auth: AuthService,
    pub permissions: PermissionsEngine,
    pub selector: InstanceSelector,
    pub requests: RequestService,
    pub dispatcher: IntegrationDispatcher,
    pub settings: SettingsService,
    pub scheduler: Arc<Scheduler>,
    pub category_cache: Arc<CategoryCacheService<TmdbCatalogClient>>,
    pub instances: ServiceInstancesRepository,
    pub media_requests: MediaRequestsRepository,
}

/// Build the full Axum router: `/healthz`, `/readyz`, and `/api/*`.
pub fn build_app(state: AppState) -> Router<()> {
    let api = Router::new()
        .nest("/auth", crate::api::auth::router())
        .nest("/requests", crate::api::requests::router())
        .nest("/jobs", crate::api::jobs::router())
        .nest("/categories", crate::api::categories::router());

    Router::new()
        .merge(crate::api::health::router())
        .nest("/api", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
