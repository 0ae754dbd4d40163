//! Local-account auth endpoints: register, login, refresh, logout.
//!
//! The streaming-server OAuth handshake is out of scope (§1); this surface
//! only covers the local-account path `AuthService` already implements.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::auth_user::AuthUser;
use crate::errors::AppResult;
use crate::services::AuthTokens;
use crate::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user: UserSummary,
    #[serde(flatten)]
    pub tokens: AuthTokens,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<Json<LoginResponse>> {
    let user = state.auth.register_local_user(&body.username, &body.password).await?;
    let tokens = state.auth.issue_tokens(&user).await?;
    Ok(Json(LoginResponse {
        user: UserSummary {
            id: user.id,
            username: user.username,
            is_admin: user.is_effectively_admin(),
        },
        tokens,
    }))
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> AppResult<Json<LoginResponse>> {
    let (user, tokens) = state.auth.login(&body.username, &body.password).await?;
    Ok(Json(LoginResponse {
        user: UserSummary {
            id: user.id,
            username: user.username,
            is_admin: user.is_effectively_admin(),
        },
        tokens,
    }))
}

async fn refresh(State(state): State<AppState>, Json(body): Json<RefreshRequest>) -> AppResult<Json<AuthTokens>> {
    Ok(Json(state.auth.refresh(&body.refresh_token).await?))
}

async fn logout(State(state): State<AppState>, Json(body): Json<RefreshRequest>) -> AppResult<()> {
    state.auth.logout(&body.refresh_token).await?;
    Ok(())
}

async fn logout_all(State(state): State<AppState>, user: AuthUser) -> AppResult<()> {
    state.auth.logout_all(&user.user_id).await?;
    Ok(())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
}
