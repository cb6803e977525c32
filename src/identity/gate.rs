//! Authentication gate.
//!
//! A request passes only when its signed cookie decodes, the store still holds a
//! record for the token, and the record's user equals the user carried in the
//! cookie. The last check is what catches sessions that were reassigned or
//! revoked server-side while the client kept a well-formed cookie.
//! Every failure is fail-closed and collapses into one 401 response.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::SignedCookieJar;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::principal::UserId;
use super::request_context::RequestContext;
use super::session::{session_from_jar, SessionHandle};
use crate::error::AppError;
use crate::server::AppState;
use crate::session_store::{SessionStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("session cookie missing, unparsable or failed its integrity check")]
    MalformedSession,
    #[error("no session record for token")]
    SessionNotFound,
    #[error("cookie claims user {local} but the store binds the token to user {stored}")]
    IdentityMismatch { local: UserId, stored: UserId },
    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MalformedSession => "malformed_session",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::IdentityMismatch { .. } => "identity_mismatch",
            AuthError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    fn log(&self) {
        match self {
            AuthError::MalformedSession | AuthError::SessionNotFound => {
                debug!(target: "auth", kind = self.kind(), "session rejected");
            }
            AuthError::IdentityMismatch { local, stored } => {
                warn!(target: "auth", kind = self.kind(), %local, %stored, "session identity does not match store; possible tampering or stale cookie");
            }
            AuthError::StoreUnavailable(reason) => {
                error!(target: "auth", kind = self.kind(), %reason, "session store unavailable; rejecting request");
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::StoreUnavailable(e.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(_: AuthError) -> Self {
        AppError::session_rejected()
    }
}

/// Validates sessions against the store handed in at construction.
#[derive(Clone)]
pub struct AuthGate {
    store: Arc<dyn SessionStore>,
}

impl AuthGate {
    pub fn new(store: Arc<dyn SessionStore>) -> Self { Self { store } }

    /// Resolve the identity for a decoded session, or say why it cannot be trusted.
    /// Read-only against the store.
    pub async fn authenticate(&self, session: Option<&SessionHandle>) -> Result<UserId, AuthError> {
        let handle = session.ok_or(AuthError::MalformedSession)?;
        let bound = self.store.lookup_timeout();
        let record = tokio::time::timeout(bound, self.store.get(&handle.token))
            .await
            .map_err(|_| AuthError::StoreUnavailable(format!("lookup exceeded {:?}", bound)))??
            .ok_or(AuthError::SessionNotFound)?;
        if record.user_id != handle.user_id {
            return Err(AuthError::IdentityMismatch { local: handle.user_id, stored: record.user_id });
        }
        Ok(record.user_id)
    }

    /// Authenticate and publish the identity into `ctx`. Nothing is written on failure.
    pub async fn admit(&self, session: Option<&SessionHandle>, ctx: &mut RequestContext) -> Result<UserId, AuthError> {
        let outcome = self.authenticate(session).await;
        let user = match outcome {
            Ok(user) => user,
            Err(e) => {
                e.log();
                return Err(e);
            }
        };
        if ctx.bind_identity(user).is_err() {
            let e = AuthError::IdentityMismatch { local: ctx.identity().unwrap_or(user), stored: user };
            e.log();
            return Err(e);
        }
        Ok(user)
    }
}

/// Middleware guarding every route layered beneath it.
pub async fn require_session(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let decoded = session_from_jar(&jar, &state.cookie.name);
    let mut ctx = req.extensions_mut().remove::<RequestContext>().unwrap_or_default();
    state.gate.admit(decoded.as_ref().ok(), &mut ctx).await?;
    req.extensions_mut().insert(ctx);
    if let Ok(handle) = decoded {
        req.extensions_mut().insert(handle);
    }
    Ok(next.run(req).await)
}

/// Extractor for the identity the gate published. Only valid on gated routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<RequestContext>().and_then(RequestContext::identity) {
            Some(user) => Ok(AuthUser(user)),
            None => {
                error!(target: "auth", path = %parts.uri.path(), "identity requested on a route the gate did not run on");
                Err(AppError::internal("identity_missing", "request identity unavailable"))
            }
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod gate_tests;
