//! Series manager REST client (§6, §4.F monitor-type derivation).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;

use crate::db::service_instances::ServiceInstanceRecord;
use crate::errors::AppResult;
use crate::services::RateLimitedClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesMonitorType {
    All,
    SpecificSeasons,
    SpecificEpisodes,
}

impl SeriesMonitorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesMonitorType::All => "all",
            SeriesMonitorType::SpecificSeasons => "specificSeasons",
            SeriesMonitorType::SpecificEpisodes => "specificEpisodes",
        }
    }
}

/// Derives the monitor type and the season/episode payload for an add-series
/// call from the union of selected seasons and episodes (§4.F step 3):
/// only episodes → `specificEpisodes`; only seasons → `specificSeasons`;
/// both → `specificEpisodes` over the union of seasons; neither → `all`.
pub fn derive_monitor(seasons: &[i64], episodes: &HashMap<i64, Vec<i64>>) -> (SeriesMonitorType, Vec<i64>) {
    if !episodes.is_empty() {
        let mut union: Vec<i64> = seasons.iter().copied().chain(episodes.keys().copied()).collect();
        union.sort_unstable();
        union.dedup();
        (SeriesMonitorType::SpecificEpisodes, union)
    } else if !seasons.is_empty() {
        let mut sorted = seasons.to_vec();
        sorted.sort_unstable();
        (SeriesMonitorType::SpecificSeasons, sorted)
    } else {
        (SeriesMonitorType::All, Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesQueueItem {
    #[serde(rename = "seriesId")]
    pub series_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesLibraryItem {
    pub id: i64,
    #[serde(rename = "tmdbId")]
    pub tmdb_id: i64,
    #[serde(rename = "episodeFileCount", default)]
    pub episode_file_count: i64,
}

pub struct SeriesManagerClient {
    http: RateLimitedClient,
    base_url: String,
    api_key: String,
}

impl SeriesManagerClient {
    pub fn new(instance: &ServiceInstanceRecord) -> Self {
        Self {
            http: RateLimitedClient::for_series_manager(&instance.id),
            base_url: instance.url.trim_end_matches('/').to_string(),
            api_key: instance.api_key.clone(),
        }
    }

    fn headers(&self) -> [(&str, &str); 1] {
        [("X-Api-Key", self.api_key.as_str())]
    }

    pub async fn lookup(&self, tmdb_id: i64) -> AppResult<serde_json::Value> {
        let url = format!("{}/api/v3/series/lookup", self.base_url);
        let response = self
            .http
            .get_with_headers_and_query(&url, &self.headers(), &[("term", format!("tmdb:{tmdb_id}"))])
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_series(
        &self,
        tmdb_id: i64,
        quality_profile_id: i64,
        language_profile_id: i64,
        root_folder_path: &str,
        monitor: SeriesMonitorType,
        seasons: &[i64],
        episodes: &HashMap<i64, Vec<i64>>,
        tags: &[i64],
    ) -> AppResult<i64> {
        let url = format!("{}/api/v3/series", self.base_url);
        let body = json!({
            "tmdbId": tmdb_id,
            "qualityProfileId": quality_profile_id,
            "languageProfileId": language_profile_id,
            "rootFolderPath": root_folder_path,
            "monitored": true,
            "seasonFolder": true,
            "tags": tags,
            "addOptions": {
                "monitor": monitor.as_str(),
                "seasons": seasons,
                "episodes": episodes,
                "searchForMissingEpisodes": true,
            },
        });
        let response = self
            .http
            .post_json_with_headers(&url, &self.headers(), &body)
            .await?;
        let created: AddedSeries = response.error_for_status()?.json().await?;
        Ok(created.id)
    }

    pub async fn queue(&self) -> AppResult<Vec<SeriesQueueItem>> {
        let url = format!("{}/api/v3/queue", self.base_url);
        let response = self.http.get_with_headers(&url, &self.headers()).await?;
        let body: QueueResponse<SeriesQueueItem> = response.error_for_status()?.json().await?;
        Ok(body.records)
    }

    pub async fn list_series(&self) -> AppResult<Vec<SeriesLibraryItem>> {
        let url = format!("{}/api/v3/series", self.base_url);
        let response = self.http.get_with_headers(&url, &self.headers()).await?;
        Ok(response.error_for_status()?.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct AddedSeries {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct QueueResponse<T> {
    records: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_episodes_selects_specific_episodes() {
        let mut episodes = HashMap::new();
        episodes.insert(4, vec![1, 2]);
        let (monitor, seasons) = derive_monitor(&[], &episodes);
        assert_eq!(monitor, SeriesMonitorType::SpecificEpisodes);
        assert_eq!(seasons, vec![4]);
    }

    #[test]
    fn only_seasons_selects_specific_seasons() {
        let (monitor, seasons) = derive_monitor(&[2, 3], &HashMap::new());
        assert_eq!(monitor, SeriesMonitorType::SpecificSeasons);
        assert_eq!(seasons, vec![2, 3]);
    }

    #[test]
    fn mixed_selects_specific_episodes_over_union() {
        let mut episodes = HashMap::new();
        episodes.insert(4, vec![1, 2]);
        let (monitor, seasons) = derive_monitor(&[3], &episodes);
        assert_eq!(monitor, SeriesMonitorType::SpecificEpisodes);
        assert_eq!(seasons, vec![3, 4]);
    }

    #[test]
    fn neither_selects_all() {
        let (monitor, seasons) = derive_monitor(&[], &HashMap::new());
        assert_eq!(monitor, SeriesMonitorType::All);
        assert!(seasons.is_empty());
    }
}
