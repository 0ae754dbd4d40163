//! Library server client (§6 "Library server contract"): bearer-token REST,
//! library sections typed `movie`/`show`, items carry `tmdb://<id>` GUIDs.

use serde::Deserialize;

use crate::errors::AppResult;
use crate::services::RateLimitedClient;

#[derive(Debug, Clone, Deserialize)]
pub struct LibrarySection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    pub items: Vec<LibraryItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryItem {
    #[serde(default)]
    pub guids: Vec<String>,
    #[serde(default)]
    pub season_number: Option<i64>,
    #[serde(default)]
    pub episode_number: Option<i64>,
}

impl LibraryItem {
    /// Extracts the tmdb id from a `tmdb://<int>` guid, if present.
    pub fn tmdb_id(&self) -> Option<i64> {
        self.guids.iter().find_map(|guid| {
            guid.strip_prefix("tmdb://").and_then(|rest| rest.parse().ok())
        })
    }
}

pub struct LibraryServerClient {
    http: RateLimitedClient,
    base_url: String,
    token: String,
}

impl LibraryServerClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: RateLimitedClient::new(
                "library_server",
                crate::services::RateLimitConfig {
                    requests_per_second: 4,
                    burst_size: 8,
                },
            ),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    pub async fn sections(&self) -> AppResult<Vec<LibrarySection>> {
        let url = format!("{}/library/sections", self.base_url);
        let auth = format!("Bearer {}", self.token);
        let response = self
            .http
            .get_with_headers(&url, &[("Authorization", auth.as_str())])
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tmdb_id_from_guid() {
        let item = LibraryItem {
            guids: vec!["imdb://tt0133093".into(), "tmdb://603".into()],
            season_number: None,
            episode_number: None,
        };
        assert_eq!(item.tmdb_id(), Some(603));
    }

    #[test]
    fn missing_tmdb_guid_is_none() {
        let item = LibraryItem {
            guids: vec!["imdb://tt0133093".into()],
            season_number: None,
            episode_number: None,
        };
        assert_eq!(item.tmdb_id(), None);
    }
}
