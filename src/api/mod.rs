//! HTTP API surface (§6). Every handler module builds a `Router<AppState>`
//! nested under its own prefix in [`crate::app::build_app`].

pub mod auth;
pub mod auth_user;
pub mod categories;
pub mod health;
pub mod jobs;
pub mod requests;
