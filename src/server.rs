//!
//! sessiongate HTTP server
//! -----------------------
//! Axum router and handlers. Public routes: `/health`, `/login`. Everything
//! mounted under the gated router runs behind `require_session`, which resolves
//! the caller's identity into the request context before any handler executes.

use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use axum_extra::extract::cookie::Key;
use axum_extra::extract::SignedCookieJar;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::config::{CookieSettings, MIN_SECRET_LEN};
use crate::error::{AppError, AppResult};
use crate::identity::{
    removal_cookie, require_session, session_cookie, AuthGate, AuthUser, LoginError, SessionHandle, SessionManager,
    UserDirectory,
};
use crate::session_store::SessionStore;

/// Shared server state injected into all handlers.
/// Built once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct AppState {
    pub gate: AuthGate,
    pub sessions: SessionManager,
    pub cookie: Arc<CookieSettings>,
    key: Key,
}

impl AppState {
    /// `secret` signs session cookies and must be at least 32 bytes.
    pub fn new(
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn UserDirectory>,
        cookie: CookieSettings,
        secret: &[u8],
    ) -> AppResult<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AppError::internal("weak_secret", "session secret is shorter than 32 bytes"));
        }
        Ok(Self {
            gate: AuthGate::new(store.clone()),
            sessions: SessionManager::new(store, directory, cookie.max_age),
            cookie: Arc::new(cookie),
            key: Key::derive_from(secret),
        })
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.key.clone()
    }
}

/// Full router with the built-in gated routes only.
pub fn router(state: AppState) -> Router {
    router_with(state, Router::new())
}

/// Full router; `protected` routes are mounted behind the session gate.
pub fn router_with(state: AppState, protected: Router<AppState>) -> Router {
    let gated = protected
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/login", post(login))
        .merge(gated)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LoginPayload { username: String, password: String }

async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(payload): Json<LoginPayload>,
) -> AppResult<(SignedCookieJar, Json<serde_json::Value>)> {
    match state.sessions.login(&payload.username, &payload.password).await {
        Ok(handle) => {
            let jar = jar.add(session_cookie(&state.cookie, &handle));
            Ok((jar, Json(json!({ "status": "ok", "userID": handle.user_id }))))
        }
        Err(LoginError::InvalidCredentials) => Err(AppError::auth("invalid_credentials", "Invalid username or password")),
        Err(e) => {
            error!(target: "auth", "login error: {e}");
            Err(AppError::io("login_unavailable", "Unable to create session"))
        }
    }
}

async fn logout(
    State(state): State<AppState>,
    Extension(handle): Extension<SessionHandle>,
    jar: SignedCookieJar,
) -> AppResult<(SignedCookieJar, Json<serde_json::Value>)> {
    state.sessions.logout(&handle).await.map_err(|e| {
        error!(target: "auth", "logout error: {e}");
        AppError::io("logout_unavailable", "Unable to end session")
    })?;
    Ok((jar.remove(removal_cookie(&state.cookie)), Json(json!({ "status": "ok" }))))
}

async fn me(AuthUser(user): AuthUser) -> Json<serde_json::Value> {
    Json(json!({ "userID": user }))
}

/// Serve `app` on an already-bound listener until the process stops.
pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(target: "startup", %addr, "listening");
    }
    axum::serve(listener, app).await
}
