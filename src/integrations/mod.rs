//! Downstream HTTP clients consumed by the dispatcher (§4.F) and
//! reconciler (§4.G). Each wraps a [`crate::services::RateLimitedClient`]
//! scoped to one configured [`crate::db::service_instances::ServiceInstanceRecord`].

pub mod catalog;
pub mod library_server;
pub mod movie_manager;
pub mod series_manager;

pub use catalog::TmdbCatalogClient;
pub use movie_manager::MovieManagerClient;
pub use series_manager::SeriesManagerClient;
