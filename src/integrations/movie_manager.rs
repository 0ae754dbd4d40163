//! Movie manager REST client (§6 "Downstream API contracts").

use serde::Deserialize;
use serde_json::json;

use crate::db::service_instances::ServiceInstanceRecord;
use crate::errors::AppResult;
use crate::services::RateLimitedClient;

#[derive(Debug, Clone, Deserialize)]
pub struct MovieQueueItem {
    #[serde(rename = "movieId")]
    pub movie_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MovieLibraryItem {
    pub id: i64,
    #[serde(rename = "tmdbId")]
    pub tmdb_id: i64,
    #[serde(rename = "hasFile", default)]
    pub has_file: bool,
}

pub struct MovieManagerClient {
    http: RateLimitedClient,
    base_url: String,
    api_key: String,
}

impl MovieManagerClient {
    pub fn new(instance: &ServiceInstanceRecord) -> Self {
        Self {
            http: RateLimitedClient::for_movie_manager(&instance.id),
            base_url: instance.url.trim_end_matches('/').to_string(),
            api_key: instance.api_key.clone(),
        }
    }

    fn headers(&self) -> [(&str, &str); 1] {
        [("X-Api-Key", self.api_key.as_str())]
    }

    pub async fn lookup(&self, tmdb_id: i64) -> AppResult<serde_json::Value> {
        let url = format!("{}/api/v3/movie/lookup", self.base_url);
        let response = self
            .http
            .get_with_headers_and_query(&url, &self.headers(), &[("term", format!("tmdb:{tmdb_id}"))])
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }

    /// Posts an add-movie operation; returns the downstream numeric id.
    pub async fn add_movie(
        &self,
        tmdb_id: i64,
        quality_profile_id: i64,
        root_folder_path: &str,
        minimum_availability: &str,
        monitored: bool,
        tags: &[i64],
    ) -> AppResult<i64> {
        let url = format!("{}/api/v3/movie", self.base_url);
        let body = json!({
            "tmdbId": tmdb_id,
            "qualityProfileId": quality_profile_id,
            "rootFolderPath": root_folder_path,
            "minimumAvailability": minimum_availability,
            "monitored": monitored,
            "tags": tags,
            "addOptions": { "searchForMovie": monitored },
        });
        let response = self
            .http
            .post_json_with_headers(&url, &self.headers(), &body)
            .await?;
        let created: AddedMovie = response.error_for_status()?.json().await?;
        Ok(created.id)
    }

    pub async fn queue(&self) -> AppResult<Vec<MovieQueueItem>> {
        let url = format!("{}/api/v3/queue", self.base_url);
        let response = self.http.get_with_headers(&url, &self.headers()).await?;
        let body: QueueResponse<MovieQueueItem> = response.error_for_status()?.json().await?;
        Ok(body.records)
    }

    pub async fn list_movies(&self) -> AppResult<Vec<MovieLibraryItem>> {
        let url = format!("{}/api/v3/movie", self.base_url);
        let response = self.http.get_with_headers(&url, &self.headers()).await?;
        Ok(response.error_for_status()?.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct AddedMovie {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct QueueResponse<T> {
    records: Vec<T>,
}
