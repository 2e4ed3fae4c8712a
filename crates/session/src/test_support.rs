// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test doubles shared by unit and integration tests.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::api::{ApiFuture, AuthApi, Credentials, Registration, TokenPair, User};
use crate::clock::{epoch_secs, Clock};
use crate::error::AuthError;
use crate::storage::Storage;

/// Build an unsigned JWT-shaped token with the given `exp`.
pub fn make_jwt(exp: i64) -> String {
    make_jwt_with_claims(&serde_json::json!({ "sub": "cook@example.com", "exp": exp }))
}

/// Build an unsigned JWT-shaped token carrying arbitrary claims.
pub fn make_jwt_with_claims(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

/// A token expiring `secs` from the real clock (negative for the past).
pub fn jwt_expiring_in(secs: i64) -> String {
    make_jwt(epoch_secs() + secs)
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Arc<Self> {
        Arc::new(Self { now: AtomicI64::new(now) })
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Storage whose every operation fails.
pub struct FailingStorage;

impl Storage for FailingStorage {
    fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("storage unavailable")
    }

    fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!("storage unavailable")
    }

    fn remove(&self, _key: &str) -> anyhow::Result<()> {
        anyhow::bail!("storage unavailable")
    }
}

/// Scriptable [`AuthApi`] that counts calls and can hold refreshes open.
pub struct MockAuthApi {
    login_result: Mutex<Result<TokenPair, AuthError>>,
    refresh_result: Mutex<Result<TokenPair, AuthError>>,
    user_result: Mutex<Result<User, AuthError>>,
    login_calls: AtomicU32,
    refresh_calls: AtomicU32,
    user_calls: AtomicU32,
    last_refresh_token: Mutex<Option<String>>,
    held: AtomicBool,
    gate: Semaphore,
}

impl MockAuthApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            login_result: Mutex::new(Ok(TokenPair::new(jwt_expiring_in(3600), Some("refresh-1")))),
            refresh_result: Mutex::new(Ok(TokenPair::new(jwt_expiring_in(3600), None))),
            user_result: Mutex::new(Ok(User {
                email: Some("cook@example.com".into()),
                ..User::default()
            })),
            login_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            user_calls: AtomicU32::new(0),
            last_refresh_token: Mutex::new(None),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
        })
    }

    pub fn set_login_result(&self, result: Result<TokenPair, AuthError>) {
        *self.login_result.lock() = result;
    }

    pub fn set_refresh_result(&self, result: Result<TokenPair, AuthError>) {
        *self.refresh_result.lock() = result;
    }

    pub fn set_user_result(&self, result: Result<User, AuthError>) {
        *self.user_result.lock() = result;
    }

    /// Make subsequent refresh calls block until [`Self::release_refresh`].
    pub fn hold_refresh(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_refresh(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.add_permits(1024);
    }

    pub fn login_calls(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn user_calls(&self) -> u32 {
        self.user_calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        self.last_refresh_token.lock().clone()
    }

    /// Wait until at least `n` refresh calls have started.
    pub async fn wait_for_refresh_calls(&self, n: u32) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.refresh_calls() < n {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("timed out waiting for {n} refresh calls");
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Ok(())
    }
}

impl AuthApi for MockAuthApi {
    fn login<'a>(&'a self, _credentials: &'a Credentials) -> ApiFuture<'a, TokenPair> {
        Box::pin(async move {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            self.login_result.lock().clone()
        })
    }

    fn register<'a>(&'a self, _registration: &'a Registration) -> ApiFuture<'a, TokenPair> {
        Box::pin(async move {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            self.login_result.lock().clone()
        })
    }

    fn refresh<'a>(&'a self, refresh_token: Option<&'a str>) -> ApiFuture<'a, TokenPair> {
        Box::pin(async move {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_refresh_token.lock() = refresh_token.map(String::from);
            if self.held.load(Ordering::SeqCst) {
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;
            }
            self.refresh_result.lock().clone()
        })
    }

    fn current_user<'a>(&'a self, _access_token: &'a str) -> ApiFuture<'a, User> {
        Box::pin(async move {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            self.user_result.lock().clone()
        })
    }
}
