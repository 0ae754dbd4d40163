//! Request lifecycle endpoints (§6): create, granular create, approve,
//! reject, mark-available, delete, list.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::api::auth_user::AuthUser;
use crate::core::requests::{GranularRequest, NewRequest};
use crate::db::media_requests::{MediaRequestRecord, MediaType, RequestFilter, RequestStatus};
use crate::errors::{AppError, AppResult};
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateRequestBody {
    pub tmdb_id: i64,
    pub media_type: String,
    pub title: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    #[serde(default = "default_quality_tier")]
    pub requested_quality_tier: String,
    pub preferred_instance_id: Option<String>,
    pub season_number: Option<i64>,
    pub episode_number: Option<i64>,
    #[serde(default)]
    pub is_season_request: bool,
    #[serde(default)]
    pub is_episode_request: bool,
}

fn default_quality_tier() -> String {
    "standard".to_string()
}

async fn create_request(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateRequestBody>,
) -> AppResult<Json<MediaRequestRecord>> {
    let media_type =
        MediaType::parse(&body.media_type.to_uppercase()).map_err(|e| AppError::Validation(e.to_string()))?;
    let request = state
        .requests
        .create(NewRequest {
            user_id: user.user_id,
            tmdb_id: body.tmdb_id,
            media_type,
            title: body.title,
            overview: body.overview,
            poster_path: body.poster_path,
            release_date: body.release_date,
            requested_quality_tier: body.requested_quality_tier,
            preferred_instance_id: body.preferred_instance_id,
            season_number: body.season_number,
            episode_number: body.episode_number,
            is_season_request: body.is_season_request,
            is_episode_request: body.is_episode_request,
        })
        .await?;
    Ok(Json(request))
}

#[derive(Deserialize)]
pub struct CreateGranularRequestBody {
    pub tmdb_id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub release_date: Option<String>,
    #[serde(default = "default_quality_tier")]
    pub requested_quality_tier: String,
    pub preferred_instance_id: Option<String>,
    #[serde(default)]
    pub seasons: Vec<i64>,
    #[serde(default)]
    pub episodes: HashMap<i64, Vec<i64>>,
}

async fn create_granular_request(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateGranularRequestBody>,
) -> AppResult<Json<Vec<MediaRequestRecord>>> {
    let created = state
        .requests
        .create_granular(GranularRequest {
            user_id: user.user_id,
            tmdb_id: body.tmdb_id,
            title: body.title,
            overview: body.overview,
            poster_path: body.poster_path,
            release_date: body.release_date,
            requested_quality_tier: body.requested_quality_tier,
            preferred_instance_id: body.preferred_instance_id,
            seasons: body.seasons,
            episodes: body.episodes,
        })
        .await?;
    Ok(Json(created))
}

#[derive(Deserialize)]
pub struct ApproveRequestBody {
    pub instance_id: Option<String>,
}

async fn approve_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<ApproveRequestBody>,
) -> AppResult<Json<MediaRequestRecord>> {
    let request = state
        .requests
        .approve(&id, &user.user_id, body.instance_id.as_deref())
        .await?;
    Ok(Json(request))
}

async fn reject_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<MediaRequestRecord>> {
    Ok(Json(state.requests.reject(&id, &user.user_id).await?))
}

async fn mark_request_available(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<MediaRequestRecord>> {
    Ok(Json(state.requests.mark_available(&id, &user.user_id).await?))
}

async fn delete_request(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> AppResult<()> {
    state.requests.delete(&id, &user.user_id).await
}

#[derive(Deserialize)]
pub struct ListRequestsQuery {
    pub user_id: Option<String>,
    pub media_type: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_requests(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListRequestsQuery>,
) -> AppResult<Json<Vec<MediaRequestRecord>>> {
    let media_type = query
        .media_type
        .as_deref()
        .map(|m| MediaType::parse(&m.to_uppercase()))
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let status_in = query
        .status
        .as_deref()
        .map(|s| RequestStatus::parse(&s.to_uppercase()))
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))?
        .map(|s| vec![s]);

    // Non-admins only ever see their own requests, regardless of what's
    // passed in `user_id` (§4.B: request visibility is not a bypassable
    // query parameter).
    let user_id = if user.is_admin { query.user_id } else { Some(user.user_id) };

    let requests = state
        .media_requests
        .find_requests(
            RequestFilter {
                user_id,
                media_type,
                status_in,
                tmdb_id: None,
            },
            query.limit.clamp(1, 200),
            query.offset.max(0),
        )
        .await?;
    Ok(Json(requests))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_request).get(list_requests))
        .route("/granular", post(create_granular_request))
        .route("/{id}/approve", post(approve_request))
        .route("/{id}/reject", post(reject_request))
        .route("/{id}/available", post(mark_request_available))
        .route("/{id}", delete(delete_request))
}
