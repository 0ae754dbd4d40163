//! Catalog metadata client (§1 "Out of scope" names the provider itself as
//! an external collaborator; this wires a concrete implementation so the
//! category cache job has something to run against). Credentials live in
//! `Settings.connection_secrets` like every other downstream, not in env
//! vars, since they can be rotated without a restart (§4.J).

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::core::category_cache::CatalogClient;
use crate::core::settings_service::SettingsService;
use crate::db::media_requests::MediaType;
use crate::errors::{AppError, AppResult};
use crate::services::rate_limiter::{RateLimitConfig, RateLimitedClient};

const BASE_URL: &str = "https://api.themoviedb.org/3";

/// `fetch_page` against the catalog provider, decrypting the stored api key
/// on every call so a key rotation takes effect without restarting the
/// service.
pub struct TmdbCatalogClient {
    settings: SettingsService,
    http: RateLimitedClient,
}

impl TmdbCatalogClient {
    pub fn new(settings: SettingsService) -> Self {
        Self {
            settings,
            http: RateLimitedClient::new(
                "catalog",
                RateLimitConfig {
                    requests_per_second: 4,
                    burst_size: 10,
                },
            ),
        }
    }

    async fn api_key(&self) -> AppResult<String> {
        let settings = self.settings.get().await?;
        let secrets = self.settings.decrypt_connection_secrets(&settings)?;
        secrets
            .get("catalog:api_key")
            .cloned()
            .ok_or_else(|| AppError::Validation("catalog provider api key is not configured".into()))
    }
}

#[async_trait]
impl CatalogClient for TmdbCatalogClient {
    async fn fetch_page(&self, media_type: MediaType, category: &str, page: i64) -> AppResult<JsonValue> {
        let api_key = self.api_key().await?;
        let kind = match media_type {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        };
        let url = format!("{BASE_URL}/{kind}/{category}");
        let response = self
            .http
            .get_with_query(&url, &[("api_key", api_key.as_str()), ("page", &page.to_string())])
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }
}
