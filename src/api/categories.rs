//! Catalog category browsing (§4.I): cache-first reads of annotated
//! catalog pages. A miss serves a synchronous refresh rather than a 404 --
//! the cache is a performance layer, not a gate on availability.

use axum::extract::{Path, Query, State};
use axum::Json;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::api::auth_user::AuthUser;
use crate::core::permissions::DISCOVER_BROWSE;
use crate::db::media_requests::MediaType;
use crate::errors::{AppError, AppResult};
use crate::AppState;

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: i64,
}

fn default_page() -> i64 {
    1
}

async fn get_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path((media_type, category)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<JsonValue>> {
    if !state.permissions.has_permission(&user.user_id, DISCOVER_BROWSE).await? {
        return Err(AppError::Forbidden("discover.browse required".into()));
    }
    let media_type = MediaType::parse(&media_type.to_uppercase()).map_err(|e| AppError::Validation(e.to_string()))?;
    let page = query.page.max(1);

    if let Some(cached) = state.category_cache.get(media_type, &category, page).await? {
        return Ok(Json(cached));
    }
    Ok(Json(state.category_cache.refresh(media_type, &category, page).await?))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{media_type}/{category}", get(get_category))
}
