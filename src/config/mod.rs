//! Application configuration management.
//!
//! Only the minimal set of env vars named in the external-interfaces contract
//! is read here. Everything else (downstream URLs/keys, job schedules, theme,
//! base URL prefix) lives in the `Settings` row and is mutated through
//! [`crate::core::settings_service`].

use std::env;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind host.
    pub host: String,

    /// Server bind port.
    pub port: u16,

    /// SQLite database URL, e.g. `sqlite://./data/mediarr.db`.
    pub database_url: String,

    /// Token-signing secret key.
    pub jwt_secret: String,

    /// Token signing algorithm name (currently only HS256 is implemented).
    pub jwt_algorithm: String,

    /// Access-token expiry, in minutes.
    pub access_token_expiry_minutes: i64,

    /// Deployment environment label ("development", "production", ...).
    pub environment: String,

    /// Key material for [`crate::core::secrets::SecretsCipher`], encrypting
    /// `Settings.connection_secrets` at rest. Not part of the named minimal
    /// env var set; falls back to a key derived from `jwt_secret` so a
    /// fresh checkout still boots (operators should set it explicitly in
    /// production — see DESIGN.md).
    pub secrets_encryption_key: Vec<u8>,
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/mediarr.db".to_string());

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is required")?;

        let secrets_encryption_key = match env::var("SECRETS_ENCRYPTION_KEY") {
            Ok(key) => key.into_bytes(),
            Err(_) => {
                use sha2::{Digest, Sha256};
                Sha256::digest(jwt_secret.as_bytes()).to_vec()
            }
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid PORT")?,
            database_url,
            jwt_secret,
            jwt_algorithm: env::var("JWT_ALGORITHM").unwrap_or_else(|_| "HS256".to_string()),
            access_token_expiry_minutes: env::var("ACCESS_TOKEN_EXPIRY_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("Invalid ACCESS_TOKEN_EXPIRY_MINUTES")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            secrets_encryption_key,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
