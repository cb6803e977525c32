//! End-to-end tests for the session gate: the full router is driven in-process
//! with `tower::ServiceExt::oneshot`, backed by the in-memory session store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::Key;
use axum_extra::extract::SignedCookieJar;
use http_body_util::BodyExt;
use tower::ServiceExt;

use sessiongate::config::CookieSettings;
use sessiongate::identity::{session_cookie, AuthUser, MemoryUserDirectory, SessionHandle, UserId};
use sessiongate::server::{router_with, AppState};
use sessiongate::session_store::{MemorySessionStore, SessionRecord, SessionStore, StoreError};

const SECRET: &[u8] = b"an-integration-test-secret-of-sufficient-length";
const DAY: Duration = Duration::from_secs(86_400);

/// Counts lookups so tests can prove handlers never touch the store.
#[derive(Clone)]
struct CountingStore {
    inner: MemorySessionStore,
    gets: Arc<AtomicUsize>,
    stall: bool,
}

#[async_trait]
impl SessionStore for CountingStore {
    async fn get(&self, token: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.get(token).await
    }
    async fn set(&self, token: &str, record: &SessionRecord, max_age: Duration) -> Result<(), StoreError> {
        self.inner.set(token, record, max_age).await
    }
    async fn delete(&self, token: &str) -> Result<bool, StoreError> {
        self.inner.delete(token).await
    }
    fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(100)
    }
}

struct Harness {
    app: Router,
    store: CountingStore,
    hits: Arc<AtomicUsize>,
}

fn harness(stall: bool) -> Harness {
    let store = CountingStore { inner: MemorySessionStore::default(), gets: Arc::new(AtomicUsize::new(0)), stall };
    let dir = MemoryUserDirectory::new();
    dir.add_user(UserId(42), "ada", "correct horse").unwrap();
    dir.add_user(UserId(7), "bob", "battery staple").unwrap();
    let state = AppState::new(Arc::new(store.clone()), Arc::new(dir), CookieSettings::default(), SECRET).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let protected = Router::<AppState>::new().route(
        "/skills",
        get(move |AuthUser(user): AuthUser| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                format!("skills of {}", user)
            }
        }),
    );
    Harness { app: router_with(state, protected), store, hits }
}

/// `name=value` for a cookie signed with the server's key.
fn signed_cookie(handle: &SessionHandle) -> String {
    let jar = SignedCookieJar::new(Key::derive_from(SECRET)).add(session_cookie(&CookieSettings::default(), handle));
    let res: Response = jar.into_response();
    let set_cookie = res.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
    set_cookie.split(';').next().unwrap().to_string()
}

fn get_with_cookie(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().uri(uri);
    if let Some(c) = cookie {
        b = b.header(header::COOKIE, c);
    }
    b.body(Body::empty()).unwrap()
}

async fn body_json(res: Response) -> serde_json::Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn login(app: &Router, username: &str, password: &str) -> Response {
    let body = serde_json::json!({ "username": username, "password": password }).to_string();
    let req = Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(req).await.unwrap()
}

fn cookie_pair(res: &Response) -> String {
    let raw = res.headers().get(header::SET_COOKIE).expect("set-cookie").to_str().unwrap();
    raw.split(';').next().unwrap().to_string()
}

async fn seed(h: &Harness, token: &str, user: u64) {
    h.store.inner.set(token, &SessionRecord::new(UserId(user), DAY), DAY).await.unwrap();
}

#[tokio::test]
async fn login_sets_hardened_cookie() {
    let h = harness(false);
    let res = login(&h.app, "ada", "correct horse").await;
    assert_eq!(res.status(), StatusCode::OK);
    let raw = res.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(raw.starts_with("session="));
    assert!(raw.contains("Secure"));
    assert!(raw.contains("HttpOnly"));
    assert!(raw.contains("SameSite=None"));
    assert!(raw.contains("Max-Age=86400"));
    assert_eq!(body_json(res).await["userID"], 42);
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let h = harness(false);
    let res = login(&h.app, "ada", "nope").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(res.headers().get(header::SET_COOKIE).is_none());
    assert!(h.store.inner.is_empty());
}

#[tokio::test]
async fn valid_session_reaches_handler_with_identity() {
    let h = harness(false);
    let cookie = cookie_pair(&login(&h.app, "ada", "correct horse").await);

    let res = h.app.clone().oneshot(get_with_cookie("/me", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["userID"], 42);

    let res = h.app.clone().oneshot(get_with_cookie("/skills", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"skills of 42");
    assert_eq!(h.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_reads_identity_without_a_second_lookup() {
    let h = harness(false);
    seed(&h, "abc123", 42).await;
    let cookie = signed_cookie(&SessionHandle { token: "abc123".into(), user_id: UserId(42) });
    let res = h.app.clone().oneshot(get_with_cookie("/skills", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(h.store.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_cookie_is_rejected_before_handler() {
    let h = harness(false);
    let res = h.app.clone().oneshot(get_with_cookie("/skills", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(res).await["error"], "Unable to retrieve session");
    assert_eq!(h.hits.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.gets.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsigned_cookie_is_rejected() {
    let h = harness(false);
    seed(&h, "abc123", 42).await;
    let res = h.app.clone().oneshot(get_with_cookie("/skills", Some("session=abc123.42"))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cookie_signed_with_other_secret_is_rejected() {
    let h = harness(false);
    seed(&h, "abc123", 42).await;
    let foreign = SignedCookieJar::new(Key::derive_from(b"some-other-secret-that-is-also-long-enough"))
        .add(session_cookie(&CookieSettings::default(), &SessionHandle { token: "abc123".into(), user_id: UserId(42) }))
        .into_response();
    let pair = foreign.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().split(';').next().unwrap().to_string();
    let res = h.app.clone().oneshot(get_with_cookie("/skills", Some(&pair))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn identity_mismatch_is_rejected() {
    let h = harness(false);
    seed(&h, "abc123", 42).await;
    let cookie = signed_cookie(&SessionHandle { token: "abc123".into(), user_id: UserId(7) });
    let res = h.app.clone().oneshot(get_with_cookie("/skills", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(res).await["error"], "Unable to retrieve session");
    assert_eq!(h.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let h = harness(false);
    let cookie = signed_cookie(&SessionHandle { token: "expired".into(), user_id: UserId(42) });
    let res = h.app.clone().oneshot(get_with_cookie("/me", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stalled_store_rejects_within_bound() {
    let h = harness(true);
    let cookie = signed_cookie(&SessionHandle { token: "abc123".into(), user_id: UserId(42) });
    let started = std::time::Instant::now();
    let res = h.app.clone().oneshot(get_with_cookie("/skills", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn logout_invalidates_cookie() {
    let h = harness(false);
    let cookie = cookie_pair(&login(&h.app, "ada", "correct horse").await);
    let req = Request::builder()
        .method("POST")
        .uri("/logout")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let res = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(h.store.inner.is_empty());

    let res = h.app.clone().oneshot(get_with_cookie("/me", Some(&cookie))).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn concurrent_requests_keep_their_own_identity() {
    let h = harness(false);
    let ada = cookie_pair(&login(&h.app, "ada", "correct horse").await);
    let bob = cookie_pair(&login(&h.app, "bob", "battery staple").await);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let app = h.app.clone();
        let (cookie, expect) = if i % 2 == 0 { (ada.clone(), 42) } else { (bob.clone(), 7) };
        tasks.push(tokio::spawn(async move {
            let res = app.oneshot(get_with_cookie("/me", Some(&cookie))).await.unwrap();
            (body_json(res).await["userID"].as_u64(), expect)
        }));
    }
    for t in tasks {
        let (got, expect) = t.await.unwrap();
        assert_eq!(got, Some(expect));
    }
}

#[tokio::test]
async fn health_is_public() {
    let h = harness(false);
    let res = h.app.clone().oneshot(get_with_cookie("/health", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
