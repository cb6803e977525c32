use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::SignedCookieJar;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, info};

use super::gate::AuthError;
use super::principal::UserId;
use super::provider::{verify_password, DirectoryError, UserDirectory};
use crate::config::CookieSettings;
use crate::session_store::{SessionRecord, SessionStore, StoreError};
use crate::tprintln;

pub type SessionToken = String;

/// Decoded view of the incoming session cookie: the token plus the user the
/// client claims it is bound to. Only ever produced from a cookie whose signature
/// verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub token: SessionToken,
    pub user_id: UserId,
}

impl SessionHandle {
    /// Cookie payload: `<token>.<user_id>`.
    pub fn encode(&self) -> String {
        format!("{}.{}", self.token, self.user_id)
    }

    pub fn decode(raw: &str) -> Result<Self, AuthError> {
        let (token, uid) = raw.split_once('.').ok_or(AuthError::MalformedSession)?;
        if !is_token_shaped(token) {
            return Err(AuthError::MalformedSession);
        }
        let user_id = uid.parse::<UserId>().map_err(|_| AuthError::MalformedSession)?;
        Ok(Self { token: token.to_string(), user_id })
    }
}

fn is_token_shaped(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[derive(Debug, Error)]
#[error("random source unavailable: {0}")]
pub struct TokenError(pub String);

/// Source of fresh session tokens.
pub type TokenSource = fn() -> Result<SessionToken, TokenError>;

pub fn gen_token() -> Result<SessionToken, TokenError> {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| TokenError(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Pull the session handle out of a signed jar. A missing cookie and one whose
/// signature failed both surface as `MalformedSession`.
pub fn session_from_jar(jar: &SignedCookieJar, cookie_name: &str) -> Result<SessionHandle, AuthError> {
    let cookie = jar.get(cookie_name).ok_or(AuthError::MalformedSession)?;
    SessionHandle::decode(cookie.value())
}

pub fn session_cookie(settings: &CookieSettings, handle: &SessionHandle) -> Cookie<'static> {
    let max_age = time::Duration::seconds(i64::try_from(settings.max_age.as_secs()).unwrap_or(i64::MAX));
    Cookie::build((settings.name.clone(), handle.encode()))
        .path("/")
        .http_only(settings.http_only)
        .secure(settings.secure)
        .same_site(SameSite::None)
        .max_age(max_age)
        .build()
}

pub fn removal_cookie(settings: &CookieSettings) -> Cookie<'static> {
    Cookie::build(settings.name.clone()).path("/").build()
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Session lifecycle on the write side: login mints a record, logout removes it.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    directory: Arc<dyn UserDirectory>,
    mint: TokenSource,
    pub max_age: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, directory: Arc<dyn UserDirectory>, max_age: Duration) -> Self {
        Self { store, directory, mint: gen_token, max_age }
    }

    pub fn with_token_source(mut self, mint: TokenSource) -> Self {
        self.mint = mint;
        self
    }

    /// Every call mints a fresh token; earlier sessions of the same user stay valid.
    pub async fn issue(&self, user_id: UserId) -> Result<SessionHandle, LoginError> {
        let handle = SessionHandle { token: (self.mint)()?, user_id };
        let record = SessionRecord::new(user_id, self.max_age);
        self.store.set(&handle.token, &record, self.max_age).await?;
        tprintln!("session.issue user={} ttl_secs={}", user_id, self.max_age.as_secs());
        Ok(handle)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<SessionHandle, LoginError> {
        let Some(user) = self.directory.user_by_username(username).await? else {
            debug!(target: "auth", username, "login for unknown user");
            return Err(LoginError::InvalidCredentials);
        };
        let hash = user.password_hash.clone();
        let candidate = password.to_string();
        let ok = tokio::task::spawn_blocking(move || verify_password(&hash, &candidate))
            .await
            .unwrap_or(false);
        if !ok {
            debug!(target: "auth", username, "login with wrong password");
            return Err(LoginError::InvalidCredentials);
        }
        let handle = self.issue(user.id).await?;
        info!(target: "auth", user = %user.id, "login");
        Ok(handle)
    }

    pub async fn logout(&self, handle: &SessionHandle) -> Result<bool, StoreError> {
        let removed = self.store.delete(&handle.token).await?;
        info!(target: "auth", user = %handle.user_id, removed, "logout");
        Ok(removed)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
