// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests of the request pipeline against an in-process API.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use pantry_session::api::{AuthApi, Credentials, HttpAuthApi};
use pantry_session::clock::{epoch_secs, SystemClock};
use pantry_session::navigation::{MemoryNavigator, Navigator};
use pantry_session::storage::MemoryStorage;
use pantry_session::test_support::{jwt_expiring_in, make_jwt_with_claims};
use pantry_session::{
    ApiClient, ApiRequest, AuthError, AuthEvent, AuthSession, LogoutReason, SessionConfig,
};

// -- In-process API -----------------------------------------------------------

/// Issues tokens and accepts only the most recently issued one.
struct Backend {
    valid: Mutex<String>,
    issued: AtomicU32,
    refresh_ok: AtomicBool,
    refresh_calls: AtomicU32,
    refresh_bodies: Mutex<Vec<Value>>,
    seen_auth: Mutex<Vec<Option<String>>>,
    /// Runs once inside the next recipes request, before it is authorized.
    on_recipes: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Backend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            valid: Mutex::new(String::new()),
            issued: AtomicU32::new(0),
            refresh_ok: AtomicBool::new(true),
            refresh_calls: AtomicU32::new(0),
            refresh_bodies: Mutex::new(Vec::new()),
            seen_auth: Mutex::new(Vec::new()),
            on_recipes: Mutex::new(None),
        })
    }

    /// Mint a new token; every earlier token stops being accepted.
    fn issue(&self) -> String {
        let jti = self.issued.fetch_add(1, Ordering::SeqCst);
        let token = make_jwt_with_claims(&json!({
            "sub": "cook@example.com",
            "exp": epoch_secs() + 3600,
            "jti": jti,
        }));
        *self.valid.lock() = token.clone();
        token
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let valid = self.valid.lock();
        !valid.is_empty() && bearer(headers).as_deref() == Some(format!("Bearer {valid}").as_str())
    }

    fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_owned)
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

async fn login(State(b): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    if body["password"] != "hunter2" {
        return reject(StatusCode::UNAUTHORIZED, "Invalid email or password");
    }
    Json(json!({
        "token": b.issue(),
        "refreshToken": "refresh-1",
        "user": { "id": 7, "email": body["email"], "name": "Ada" },
    }))
    .into_response()
}

async fn refresh(State(b): State<Arc<Backend>>, body: Bytes) -> Response {
    b.refresh_calls.fetch_add(1, Ordering::SeqCst);
    b.refresh_bodies.lock().push(serde_json::from_slice(&body).unwrap_or(Value::Null));
    // Hold the refresh open long enough for concurrent 401s to pile up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    if !b.refresh_ok.load(Ordering::SeqCst) {
        return reject(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }
    Json(json!({ "token": b.issue() })).into_response()
}

async fn me(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !b.authorized(&headers) {
        return reject(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    Json(json!({ "user": { "id": 7, "email": "cook@example.com", "name": "Ada" } })).into_response()
}

async fn recipes(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    b.seen_auth.lock().push(bearer(&headers));
    let hook = b.on_recipes.lock().take();
    if let Some(hook) = hook {
        hook();
    }
    if !b.authorized(&headers) {
        return reject(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    Json(json!([{ "id": 1, "title": "Shakshuka" }])).into_response()
}

async fn update_recipe(
    State(b): State<Arc<Backend>>,
    Path(id): Path<u32>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !b.authorized(&headers) {
        return reject(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    Json(json!({ "id": id, "title": body["title"] })).into_response()
}

async fn delete_recipe(
    State(b): State<Arc<Backend>>,
    Path(id): Path<u32>,
    headers: HeaderMap,
) -> Response {
    if !b.authorized(&headers) {
        return reject(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    Json(json!({ "deleted": id })).into_response()
}

/// Rejects every token, fresh or not.
async fn locked() -> Response {
    reject(StatusCode::UNAUTHORIZED, "Unauthorized")
}

async fn admin() -> Response {
    reject(StatusCode::FORBIDDEN, "Forbidden")
}

async fn public(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    b.seen_auth.lock().push(bearer(&headers));
    Json(json!({ "ok": true })).into_response()
}

async fn spawn_backend() -> anyhow::Result<(Arc<Backend>, String)> {
    let backend = Backend::new();
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh-token", post(refresh))
        .route("/api/auth/me", get(me))
        .route("/api/recipes", get(recipes))
        .route("/api/recipes/{id}", put(update_recipe).delete(delete_recipe))
        .route("/api/locked", get(locked))
        .route("/api/admin", get(admin))
        .route("/api/public", get(public))
        .with_state(Arc::clone(&backend));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok((backend, format!("http://{addr}")))
}

// -- Harness ------------------------------------------------------------------

struct Harness {
    backend: Arc<Backend>,
    client: ApiClient,
    session: Arc<AuthSession>,
    nav: Arc<MemoryNavigator>,
}

async fn harness() -> anyhow::Result<Harness> {
    let (backend, url) = spawn_backend().await?;
    let mut config = SessionConfig::for_api(url);
    config.settle_ms = 0;
    let api: Arc<dyn AuthApi> = Arc::new(HttpAuthApi::new(&config));
    let nav = Arc::new(MemoryNavigator::new("/recipes"));
    let session = AuthSession::new(
        config,
        Arc::new(MemoryStorage::new()),
        api,
        Arc::clone(&nav) as Arc<dyn Navigator>,
        Arc::new(SystemClock),
    );
    let client = ApiClient::new(Arc::clone(&session));
    Ok(Harness { backend, client, session, nav })
}

async fn logged_in() -> anyhow::Result<Harness> {
    let h = harness().await?;
    h.session.login(&credentials("hunter2")).await?;
    Ok(h)
}

fn credentials(password: &str) -> Credentials {
    Credentials { email: "cook@example.com".into(), password: password.into() }
}

async fn concurrent_gets(client: &ApiClient, n: usize) -> Vec<Result<Value, AuthError>> {
    join_all((0..n).map(|_| client.get_json::<Value>("/api/recipes"))).await
}

// -- Login and verification ---------------------------------------------------

#[tokio::test]
async fn login_over_http_establishes_session() -> anyhow::Result<()> {
    let h = harness().await?;
    let user = h.session.login(&credentials("hunter2")).await?;

    assert_eq!(user.and_then(|u| u.name).as_deref(), Some("Ada"));
    assert!(h.session.is_authenticated());
    assert_eq!(h.session.store().get_refresh_token().as_deref(), Some("refresh-1"));
    assert!(h.session.check_auth().await);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected_with_server_message() -> anyhow::Result<()> {
    let h = harness().await?;
    let err = h.session.login(&credentials("wrong")).await.err();

    assert_eq!(err, Some(AuthError::InvalidCredentials("Invalid email or password".into())));
    assert!(!h.session.is_authenticated());
    assert!(!h.session.store().has_access_token());
    Ok(())
}

#[tokio::test]
async fn check_auth_renews_expired_access_token() -> anyhow::Result<()> {
    let h = logged_in().await?;
    h.session.store().set_access_token(&jwt_expiring_in(-10));

    assert!(h.session.check_auth().await);
    assert_eq!(h.backend.refresh_calls(), 1);
    assert!(!h.session.oracle().is_access_token_expired());
    Ok(())
}

// -- Bearer attachment --------------------------------------------------------

#[tokio::test]
async fn bearer_attached_only_for_valid_token() -> anyhow::Result<()> {
    let h = logged_in().await?;
    let token = h.session.store().get_access_token().unwrap_or_default();

    h.client.get_json::<Value>("/api/public").await?;
    h.session.store().set_access_token(&jwt_expiring_in(-10));
    let resp = h.client.get("/api/public").await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let seen = h.backend.seen_auth.lock().clone();
    assert_eq!(seen, vec![Some(format!("Bearer {token}")), None]);
    Ok(())
}

// -- 401 recovery -------------------------------------------------------------

#[tokio::test]
async fn concurrent_401s_share_one_refresh() -> anyhow::Result<()> {
    let h = logged_in().await?;
    let mut events = h.session.subscribe();
    // Server-side rotation: the stored token is unexpired but no longer accepted.
    h.backend.issue();

    let results = concurrent_gets(&h.client, 3).await;

    for result in &results {
        assert_eq!(result.as_ref().ok(), Some(&json!([{ "id": 1, "title": "Shakshuka" }])));
    }
    assert_eq!(h.backend.refresh_calls(), 1);
    assert_eq!(h.backend.refresh_bodies.lock().clone(), vec![json!({ "refreshToken": "refresh-1" })]);

    let current = h.session.store().get_access_token().unwrap_or_default();
    assert_eq!(current, h.backend.valid.lock().clone());
    assert_eq!(h.session.store().get_refresh_token().as_deref(), Some("refresh-1"));
    assert!(h.session.is_authenticated());
    assert!(h.nav.redirects().is_empty());
    assert_eq!(events.recv().await?, AuthEvent::Refreshed);
    Ok(())
}

#[tokio::test]
async fn token_rotated_in_flight_retries_without_refresh() -> anyhow::Result<()> {
    let h = logged_in().await?;
    let stale = h.session.store().get_access_token().unwrap_or_default();
    let fresh = h.backend.issue();
    // Another caller stores the new token while this request is on the wire.
    let store = h.session.store().clone();
    let written = fresh.clone();
    *h.backend.on_recipes.lock() = Some(Box::new(move || store.set_access_token(&written)));

    let body = h.client.get_json::<Value>("/api/recipes").await?;

    assert_eq!(body, json!([{ "id": 1, "title": "Shakshuka" }]));
    assert_eq!(h.backend.refresh_calls(), 0);
    let seen = h.backend.seen_auth.lock().clone();
    assert_eq!(seen, vec![Some(format!("Bearer {stale}")), Some(format!("Bearer {fresh}"))]);
    assert!(h.session.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn retry_still_unauthorized_ends_session() -> anyhow::Result<()> {
    let h = logged_in().await?;
    let mut events = h.session.subscribe();

    let result = h.client.get_json::<Value>("/api/locked").await;

    assert_eq!(result.err(), Some(AuthError::Unauthorized));
    assert_eq!(h.backend.refresh_calls(), 1);
    assert!(!h.session.is_authenticated());
    assert!(!h.session.store().has_access_token());
    assert_eq!(h.nav.redirects(), vec!["/login".to_owned()]);
    assert_eq!(events.recv().await?, AuthEvent::Refreshed);
    assert_eq!(
        events.recv().await?,
        AuthEvent::TokenExpired { reason: LogoutReason::TokenExpired }
    );
    Ok(())
}

#[tokio::test]
async fn failed_refresh_rejects_all_and_redirects_once() -> anyhow::Result<()> {
    let h = logged_in().await?;
    let mut events = h.session.subscribe();
    h.backend.issue();
    h.backend.refresh_ok.store(false, Ordering::SeqCst);

    let results = concurrent_gets(&h.client, 3).await;

    for result in &results {
        assert!(matches!(result, Err(AuthError::RefreshFailed(_))), "got {result:?}");
    }
    assert_eq!(h.backend.refresh_calls(), 1);
    assert!(!h.session.store().has_access_token());
    assert!(!h.session.store().has_refresh_token());
    assert!(!h.session.is_authenticated());
    assert_eq!(h.nav.redirects(), vec!["/login".to_owned()]);

    let mut logouts = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, AuthEvent::TokenExpired { reason: LogoutReason::TokenExpired }) {
            logouts += 1;
        }
    }
    assert_eq!(logouts, 1);
    Ok(())
}

#[tokio::test]
async fn auth_endpoint_401_does_not_refresh() -> anyhow::Result<()> {
    let h = logged_in().await?;
    h.backend.refresh_ok.store(false, Ordering::SeqCst);

    let result = h.client.execute(&ApiRequest::post("/api/auth/refresh-token", json!({}))).await;

    assert!(matches!(result, Err(AuthError::RecursiveAuthFailure)));
    assert_eq!(h.backend.refresh_calls(), 1);
    assert!(!h.session.is_authenticated());
    Ok(())
}

#[tokio::test]
async fn login_endpoint_401_does_not_refresh() -> anyhow::Result<()> {
    let h = logged_in().await?;

    let result = h
        .client
        .post_json("/api/auth/login", json!({ "email": "cook@example.com", "password": "wrong" }))
        .await;

    assert_eq!(result.err(), Some(AuthError::RecursiveAuthFailure));
    assert_eq!(h.backend.refresh_calls(), 0);
    assert!(!h.session.is_authenticated());
    Ok(())
}

// -- Other verbs --------------------------------------------------------------

#[tokio::test]
async fn put_and_delete_carry_bearer() -> anyhow::Result<()> {
    let h = logged_in().await?;

    let updated = h.client.put_json("/api/recipes/3", json!({ "title": "Menemen" })).await?;
    let deleted = h.client.delete("/api/recipes/3").await?;

    assert_eq!(updated, json!({ "id": 3, "title": "Menemen" }));
    assert_eq!(deleted, json!({ "deleted": 3 }));
    assert_eq!(h.backend.refresh_calls(), 0);
    Ok(())
}

// -- 403 ----------------------------------------------------------------------

#[tokio::test]
async fn forbidden_invalidates_session_without_refresh() -> anyhow::Result<()> {
    let h = logged_in().await?;
    let mut events = h.session.subscribe();

    let result = h.client.get_json::<Value>("/api/admin").await;

    assert_eq!(result.err(), Some(AuthError::SessionInvalidated));
    assert_eq!(h.backend.refresh_calls(), 0);
    assert!(!h.session.store().has_access_token());
    assert_eq!(h.nav.redirects(), vec!["/login".to_owned()]);
    assert_eq!(events.recv().await?, AuthEvent::SessionExpired);
    Ok(())
}

#[tokio::test]
async fn forbidden_on_public_route_does_not_redirect() -> anyhow::Result<()> {
    let h = logged_in().await?;
    h.nav.visit("/register?ref=share");

    let result = h.client.get_json::<Value>("/api/admin").await;

    assert_eq!(result.err(), Some(AuthError::SessionInvalidated));
    assert!(h.nav.redirects().is_empty());
    assert!(!h.session.is_authenticated());
    Ok(())
}
