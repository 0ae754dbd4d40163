//! Bearer-token extractor for REST handlers (§2.1). Grounded on the typed
//! `FromRequestParts` pattern shown by the teacher pack's other REST-facing
//! examples; verification itself delegates to [`crate::services::AuthService`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use crate::errors::AppError;
use crate::AppState;

/// The authenticated caller's identity, as resolved from the access token.
/// Authorization itself (what this user may do) is the permission engine's
/// job, not this extractor's (§4.B).
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub is_admin: bool,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::AuthRequired)?;
        let (user_id, is_admin) = state.auth.verify_access_token(bearer.token())?;
        Ok(AuthUser { user_id, is_admin })
    }
}
