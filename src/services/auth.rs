//! Bearer-token authentication (§2.1 "Authentication"). The OAuth handshake
//! to the streaming-server identity provider and the local-login UI are out
//! of scope (§1); this module only issues and verifies tokens for local
//! accounts, narrowed to what the core needs: `(user_id, is_admin)`.
//!
//! Grounded on the teacher's `services/auth.rs`, with registration, role
//! strings, and library-access grants dropped — this crate derives
//! privilege from [`UserRecord::is_effectively_admin`] and the permission
//! engine, not a `role` claim.

use bcrypt::{hash, verify, DEFAULT_COST};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db::refresh_tokens::RefreshTokensRepository;
use crate::db::users::{CreateUser, UserRecord, UsersRepository};
use crate::errors::{AppError, AppResult};

const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    is_admin: bool,
    token_type: String,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefreshTokenClaims {
    sub: String,
    token_type: String,
    jti: String,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_expiry_minutes: i64,
    pub bcrypt_cost: u32,
}

impl AuthConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            bcrypt_cost: DEFAULT_COST,
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: UsersRepository,
    refresh_tokens: RefreshTokensRepository,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(users: UsersRepository, refresh_tokens: RefreshTokensRepository, config: AuthConfig) -> Self {
        Self { users, refresh_tokens, config }
    }

    fn hash_password(&self, password: &str) -> AppResult<String> {
        hash(password, self.config.bcrypt_cost)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))
    }

    fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        verify(password, hash).map_err(|e| AppError::Internal(anyhow::anyhow!("password verification failed: {e}")))
    }

    fn hash_token(&self, token: &str) -> String {
        format!("{:x}", Sha256::digest(token.as_bytes()))
    }

    /// Creates a local account with a password (§3 "User", `is_local`).
    pub async fn register_local_user(&self, username: &str, password: &str) -> AppResult<UserRecord> {
        if self.users.get_by_username(username).await?.is_some() {
            return Err(AppError::Validation("username already in use".to_string()));
        }
        let password_hash = self.hash_password(password)?;
        let is_server_owner = !self.users.has_server_owner().await?;
        Ok(self
            .users
            .create(CreateUser {
                username: username.to_string(),
                password_hash: Some(password_hash),
                is_server_owner,
                ..Default::default()
            })
            .await?)
    }

    /// Verifies username/password and issues a fresh token pair.
    pub async fn login(&self, username: &str, password: &str) -> AppResult<(UserRecord, AuthTokens)> {
        let user = self
            .users
            .get_by_username(username)
            .await?
            .ok_or(AppError::AuthRequired)?;
        if !user.is_active {
            return Err(AppError::Forbidden("account disabled".to_string()));
        }
        let Some(password_hash) = &user.password_hash else {
            return Err(AppError::AuthRequired);
        };
        if !self.verify_password(password, password_hash)? {
            return Err(AppError::AuthRequired);
        }

        let tokens = self.issue_tokens(&user).await?;
        Ok((user, tokens))
    }

    /// Mints an access/refresh pair for an already-authenticated user,
    /// persisting the refresh token's hash so it can be revoked.
    pub async fn issue_tokens(&self, user: &UserRecord) -> AppResult<AuthTokens> {
        let now = chrono::Utc::now();
        let access_exp = now + chrono::Duration::minutes(self.config.access_token_expiry_minutes);
        let access_claims = AccessTokenClaims {
            sub: user.id.clone(),
            is_admin: user.is_effectively_admin(),
            token_type: "access".to_string(),
            exp: access_exp.timestamp(),
            iat: now.timestamp(),
        };
        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &access_claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("access token signing failed: {e}")))?;

        let refresh_exp = now + chrono::Duration::days(REFRESH_TOKEN_LIFETIME_DAYS);
        let jti = Uuid::new_v4().to_string();
        let refresh_claims = RefreshTokenClaims {
            sub: user.id.clone(),
            token_type: "refresh".to_string(),
            jti,
            exp: refresh_exp.timestamp(),
            iat: now.timestamp(),
        };
        let refresh_token = encode(
            &Header::new(Algorithm::HS256),
            &refresh_claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("refresh token signing failed: {e}")))?;

        self.refresh_tokens
            .create(&user.id, &self.hash_token(&refresh_token), &refresh_exp.to_rfc3339())
            .await?;

        Ok(AuthTokens {
            access_token,
            refresh_token,
            expires_in: self.config.access_token_expiry_minutes * 60,
            token_type: "Bearer",
        })
    }

    fn validation(&self) -> Validation {
        Validation::new(Algorithm::HS256)
    }

    /// Decodes and validates an access token, returning `(user_id, is_admin)`
    /// — the narrow contract the rest of the core needs (§2.1).
    pub fn verify_access_token(&self, token: &str) -> AppResult<(String, bool)> {
        let data = decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &self.validation(),
        )
        .map_err(|_| AppError::AuthRequired)?;
        if data.claims.token_type != "access" {
            return Err(AppError::AuthRequired);
        }
        Ok((data.claims.sub, data.claims.is_admin))
    }

    /// Rotates a refresh token: the old one is revoked, a new pair is issued.
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<AuthTokens> {
        let claims = decode::<RefreshTokenClaims>(
            refresh_token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &self.validation(),
        )
        .map_err(|_| AppError::AuthRequired)?
        .claims;
        if claims.token_type != "refresh" {
            return Err(AppError::AuthRequired);
        }

        let token_hash = self.hash_token(refresh_token);
        let stored = self
            .refresh_tokens
            .get_by_hash(&token_hash)
            .await?
            .ok_or(AppError::AuthRequired)?;
        if !stored.is_active() {
            return Err(AppError::AuthRequired);
        }

        let user = self
            .users
            .get_by_id(&claims.sub)
            .await?
            .ok_or(AppError::AuthRequired)?;
        if !user.is_active {
            return Err(AppError::Forbidden("account disabled".to_string()));
        }

        self.refresh_tokens.revoke(&stored.id).await?;
        self.issue_tokens(&user).await
    }

    pub async fn logout(&self, refresh_token: &str) -> AppResult<()> {
        let token_hash = self.hash_token(refresh_token);
        if let Some(stored) = self.refresh_tokens.get_by_hash(&token_hash).await? {
            self.refresh_tokens.revoke(&stored.id).await?;
        }
        Ok(())
    }

    pub async fn logout_all(&self, user_id: &str) -> AppResult<u64> {
        Ok(self.refresh_tokens.revoke_all_for_user(user_id).await?)
    }

    pub async fn change_password(&self, user_id: &str, current: &str, new_password: &str) -> AppResult<()> {
        let user = self.users.get_by_id(user_id).await?.ok_or_else(|| AppError::not_found("user"))?;
        let Some(current_hash) = &user.password_hash else {
            return Err(AppError::Validation("account has no local password".to_string()));
        };
        if !self.verify_password(current, current_hash)? {
            return Err(AppError::Validation("current password is incorrect".to_string()));
        }
        let new_hash = self.hash_password(new_password)?;
        self.users
            .update(user_id, crate::db::users::UpdateUser { password_hash: Some(Some(new_hash)), ..Default::default() })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn pool() -> Database {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::sync_schema(&pool).await.unwrap();
        pool
    }

    fn service(pool: Database) -> AuthService {
        AuthService::new(
            UsersRepository::new(pool.clone()),
            RefreshTokensRepository::new(pool),
            AuthConfig { jwt_secret: "test-secret".into(), access_token_expiry_minutes: 15, bcrypt_cost: 4 },
        )
    }

    #[tokio::test]
    async fn register_then_login_round_trips() {
        let service = service(pool().await);
        let user = service.register_local_user("alice", "hunter22").await.unwrap();
        assert!(user.is_server_owner);

        let (logged_in, tokens) = service.login("alice", "hunter22").await.unwrap();
        assert_eq!(logged_in.id, user.id);

        let (user_id, is_admin) = service.verify_access_token(&tokens.access_token).unwrap();
        assert_eq!(user_id, user.id);
        assert!(is_admin);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let service = service(pool().await);
        service.register_local_user("bob", "correct-password").await.unwrap();
        let result = service.login("bob", "wrong-password").await;
        assert!(matches!(result, Err(AppError::AuthRequired)));
    }

    #[tokio::test]
    async fn refresh_rotates_token_and_revokes_the_old_one() {
        let service = service(pool().await);
        service.register_local_user("carol", "password123").await.unwrap();
        let (_, tokens) = service.login("carol", "password123").await.unwrap();

        let rotated = service.refresh(&tokens.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, tokens.refresh_token);

        let reuse = service.refresh(&tokens.refresh_token).await;
        assert!(matches!(reuse, Err(AppError::AuthRequired)));
    }

    #[tokio::test]
    async fn logout_all_revokes_every_session() {
        let service = service(pool().await);
        let user = service.register_local_user("dave", "password123").await.unwrap();
        let (_, tokens) = service.login("dave", "password123").await.unwrap();

        service.logout_all(&user.id).await.unwrap();
        let result = service.refresh(&tokens.refresh_token).await;
        assert!(matches!(result, Err(AppError::AuthRequired)));
    }
}
