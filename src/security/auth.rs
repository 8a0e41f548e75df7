//! Token validation and session issuing.
//!
//! # Responsibilities
//! - Validate bearer tokens into an [`AuthContext`]
//! - Issue opaque access/refresh tokens on login, revoke them on logout
//! - Look up accounts and verify passwords in constant time
//!
//! # Design Decisions
//! - Tokens are random UUIDs held in memory; a restart logs everyone out
//! - Inactive accounts fail validation even with a live token

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::{AuthConfig, UserConfig};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("authorization header must be `Bearer <token>`")]
    MalformedHeader,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("user is inactive")]
    InactiveUser,
    #[error("invalid username or password")]
    InvalidCredentials,
}

/// Identity attached to authenticated requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub username: String,
    pub roles: Vec<String>,
}

impl AuthContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Resolves a bearer token into an identity.
#[async_trait]
pub trait TokenValidator: Send + Sync + std::fmt::Debug {
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError>;
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    password: String,
    pub roles: Vec<String>,
    pub active: bool,
}

impl User {
    pub fn verify_password(&self, candidate: &str) -> bool {
        self.password.as_bytes().ct_eq(candidate.as_bytes()).into()
    }

    fn context(&self) -> AuthContext {
        AuthContext {
            user_id: self.id.clone(),
            username: self.username.clone(),
            roles: self.roles.clone(),
        }
    }
}

impl From<&UserConfig> for User {
    fn from(config: &UserConfig) -> Self {
        Self {
            id: config.id.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            roles: config.roles.clone(),
            active: config.active,
        }
    }
}

pub trait UserDirectory: Send + Sync + std::fmt::Debug {
    fn find_by_username(&self, username: &str) -> Option<User>;
    fn find_by_id(&self, id: &str) -> Option<User>;
}

/// Accounts loaded from configuration.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    by_id: HashMap<String, User>,
}

impl StaticUserDirectory {
    pub fn from_config(users: &[UserConfig]) -> Self {
        Self {
            by_id: users.iter().map(|u| (u.id.clone(), User::from(u))).collect(),
        }
    }
}

impl UserDirectory for StaticUserDirectory {
    fn find_by_username(&self, username: &str) -> Option<User> {
        self.by_id.values().find(|u| u.username == username).cloned()
    }

    fn find_by_id(&self, id: &str) -> Option<User> {
        self.by_id.get(id).cloned()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    pub user: AuthContext,
}

#[derive(Debug, Clone)]
struct Session {
    user_id: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    fn new(user_id: &str, ttl: Duration) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        Self {
            user_id: user_id.to_string(),
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// In-memory session store issuing opaque tokens.
#[derive(Debug)]
pub struct SessionTokenService {
    users: Arc<dyn UserDirectory>,
    access: DashMap<String, Session>,
    refresh: DashMap<String, Session>,
    token_ttl: Duration,
    refresh_ttl: Duration,
    issuer: String,
}

impl SessionTokenService {
    pub fn new(users: Arc<dyn UserDirectory>, config: &AuthConfig) -> Self {
        Self {
            users,
            access: DashMap::new(),
            refresh: DashMap::new(),
            token_ttl: Duration::from_secs(config.token_expiry_secs),
            refresh_ttl: Duration::from_secs(config.refresh_expiry_secs),
            issuer: config.issuer.clone(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn new_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn issue_access(&self, user: &User) -> String {
        let token = Self::new_token();
        self.access.insert(token.clone(), Session::new(&user.id, self.token_ttl));
        token
    }

    pub fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        let user = self
            .users
            .find_by_username(username)
            .filter(|u| u.verify_password(password))
            .ok_or(AuthError::InvalidCredentials)?;
        if !user.active {
            return Err(AuthError::InactiveUser);
        }

        let access_token = self.issue_access(&user);
        let refresh_token = Self::new_token();
        self.refresh
            .insert(refresh_token.clone(), Session::new(&user.id, self.refresh_ttl));

        tracing::info!(user_id = %user.id, username = %user.username, "User logged in");
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.token_ttl.as_secs(),
            user: user.context(),
        })
    }

    /// Mint a new access token from a live refresh token.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let session = self
            .refresh
            .get(refresh_token)
            .map(|s| s.clone())
            .ok_or(AuthError::InvalidToken)?;
        if session.is_expired() {
            self.refresh.remove(refresh_token);
            return Err(AuthError::TokenExpired);
        }
        let user = self
            .users
            .find_by_id(&session.user_id)
            .ok_or(AuthError::InvalidToken)?;
        if !user.active {
            return Err(AuthError::InactiveUser);
        }

        Ok(TokenPair {
            access_token: self.issue_access(&user),
            refresh_token: refresh_token.to_string(),
            token_type: "Bearer",
            expires_in: self.token_ttl.as_secs(),
            user: user.context(),
        })
    }

    /// Revoke an access token. Returns false if it was not live.
    pub fn logout(&self, access_token: &str) -> bool {
        self.access.remove(access_token).is_some()
    }

    /// Drop expired sessions of both kinds.
    pub fn purge_expired(&self) {
        self.access.retain(|_, s| !s.is_expired());
        self.refresh.retain(|_, s| !s.is_expired());
    }
}

#[async_trait]
impl TokenValidator for SessionTokenService {
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let session = self
            .access
            .get(token)
            .map(|s| s.clone())
            .ok_or(AuthError::InvalidToken)?;
        if session.is_expired() {
            self.access.remove(token);
            return Err(AuthError::TokenExpired);
        }
        let user = self
            .users
            .find_by_id(&session.user_id)
            .ok_or(AuthError::InvalidToken)?;
        if !user.active {
            return Err(AuthError::InactiveUser);
        }
        Ok(user.context())
    }
}

/// Extract the token from an `Authorization` header value.
pub fn parse_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingHeader)?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme == "Bearer" && !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::MalformedHeader),
    }
}
