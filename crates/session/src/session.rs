// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session orchestration: login, logout, registration, verification, and
//! forced logout.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::api::{AuthApi, Credentials, HttpAuthApi, Registration, TokenPair, User};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::AuthError;
use crate::events::{AuthEvent, LogoutReason};
use crate::expiry::ExpiryOracle;
use crate::navigation::{is_public_route, MemoryNavigator, Navigator};
use crate::storage::{FileStorage, Storage};
use crate::store::TokenStore;

/// Application-level authentication state.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated { user: Option<User> },
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Counts logins in progress. Forced logout is suppressed while non-zero.
/// Logins that already finished are caught by the session epoch instead.
#[derive(Default)]
pub struct LoginGate {
    active: AtomicU32,
}

impl LoginGate {
    pub fn enter(&self) -> LoginGuard<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        LoginGuard { gate: self }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }
}

pub struct LoginGuard<'a> {
    gate: &'a LoginGate,
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The authentication core shared by the request pipeline, the session
/// monitor and the application.
pub struct AuthSession {
    config: SessionConfig,
    store: TokenStore,
    oracle: ExpiryOracle,
    coordinator: Arc<RefreshCoordinator>,
    api: Arc<dyn AuthApi>,
    navigator: Arc<dyn Navigator>,
    event_tx: broadcast::Sender<AuthEvent>,
    state_tx: watch::Sender<AuthState>,
    login_gate: LoginGate,
    /// Bumped each time a session is established.
    epoch: AtomicU64,
    redirect_lock: Mutex<()>,
}

impl AuthSession {
    pub fn new(
        config: SessionConfig,
        storage: Arc<dyn Storage>,
        api: Arc<dyn AuthApi>,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let store = TokenStore::new(storage, config.storage_keys());
        let oracle = ExpiryOracle::new(store.clone(), clock);
        let (event_tx, _) = broadcast::channel(64);
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            oracle.clone(),
            Arc::clone(&api),
            event_tx.clone(),
        );
        let (state_tx, _) = watch::channel(AuthState::Unauthenticated);
        Arc::new(Self {
            config,
            store,
            oracle,
            coordinator,
            api,
            navigator,
            event_tx,
            state_tx,
            login_gate: LoginGate::default(),
            epoch: AtomicU64::new(0),
            redirect_lock: Mutex::new(()),
        })
    }

    /// File-backed session talking HTTP to the configured API.
    pub fn from_config(config: SessionConfig) -> Arc<Self> {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(config.credentials_path()));
        let api: Arc<dyn AuthApi> = Arc::new(HttpAuthApi::new(&config));
        let navigator: Arc<dyn Navigator> = Arc::new(MemoryNavigator::new("/"));
        Self::new(config, storage, api, navigator, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn oracle(&self) -> &ExpiryOracle {
        &self.oracle
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.event_tx.subscribe()
    }

    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state_tx.borrow().is_authenticated()
    }

    pub fn current_user(&self) -> Option<User> {
        match &*self.state_tx.borrow() {
            AuthState::Authenticated { user } => user.clone(),
            AuthState::Unauthenticated => None,
        }
    }

    pub fn login_in_progress(&self) -> bool {
        self.login_gate.is_active()
    }

    /// Identifies the current session. Capture it when an auth failure is
    /// observed and pass it to [`Self::force_logout_since`].
    pub fn session_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Option<User>, AuthError> {
        let _guard = self.login_gate.enter();
        let tokens = self.api.login(credentials).await.inspect_err(|e| {
            tracing::info!(err = %e, "login rejected");
        })?;
        Ok(self.establish(tokens).await)
    }

    pub async fn register(&self, registration: &Registration) -> Result<Option<User>, AuthError> {
        let _guard = self.login_gate.enter();
        let tokens = self.api.register(registration).await.inspect_err(|e| {
            tracing::info!(err = %e, "registration rejected");
        })?;
        Ok(self.establish(tokens).await)
    }

    /// User-initiated logout.
    pub fn logout(&self) {
        self.state_tx.send_replace(AuthState::Unauthenticated);
        self.store.clear_all();
        let _ = self.event_tx.send(AuthEvent::LoggedOut);
        self.redirect_to_login();
        tracing::info!("logged out");
    }

    /// Verify stored credentials with the server and publish the result.
    ///
    /// An expired access token is refreshed first when possible. Transport
    /// failures keep the stored credentials and fall back to the cached user.
    pub async fn check_auth(&self) -> bool {
        if !self.store.has_access_token() {
            self.end_quietly();
            return false;
        }

        if self.oracle.is_access_token_expired() {
            if !self.coordinator.should_refresh() {
                tracing::debug!("access token expired and no refresh token");
                self.end_quietly();
                return false;
            }
            if let Err(e) = self.coordinator.refresh().await {
                tracing::info!(err = %e, "session could not be renewed");
                self.end_quietly();
                return false;
            }
        }

        let Some(token) = self.store.get_access_token() else {
            self.end_quietly();
            return false;
        };
        match self.api.current_user(&token).await {
            Ok(user) => {
                self.store.set_user(&user);
                self.state_tx.send_replace(AuthState::Authenticated { user: Some(user) });
                true
            }
            Err(e) if e.is_auth_failure() => {
                tracing::info!(err = %e, "stored session rejected by server");
                self.end_quietly();
                false
            }
            Err(e) => {
                tracing::warn!(err = %e, "could not verify session, using cached state");
                match self.store.user() {
                    Some(user) => {
                        self.state_tx.send_replace(AuthState::Authenticated { user: Some(user) });
                        true
                    }
                    None => false,
                }
            }
        }
    }

    pub async fn attempt_refresh(&self) -> bool {
        self.coordinator.attempt_refresh().await
    }

    pub fn should_refresh(&self) -> bool {
        self.coordinator.should_refresh()
    }

    /// Clear credentials, redirect to login unless on a public route, and
    /// notify once per authenticated session.
    ///
    /// Returns true if this call ended an authenticated session.
    pub fn force_logout(&self, reason: LogoutReason) -> bool {
        let had_credentials = self.store.has_access_token() || self.store.has_refresh_token();
        let was_authenticated =
            self.state_tx.send_replace(AuthState::Unauthenticated).is_authenticated();
        self.store.clear_all();
        self.redirect_to_login();

        let ended = was_authenticated || had_credentials;
        if ended {
            tracing::warn!(?reason, "forced logout");
            let event = match reason {
                LogoutReason::SessionInvalidated => AuthEvent::SessionExpired,
                reason => AuthEvent::TokenExpired { reason },
            };
            let _ = self.event_tx.send(event);
        }
        ended
    }

    /// Force logout for a failure observed during session `epoch`.
    ///
    /// Skipped if a login is running or a new session was established since.
    pub fn force_logout_since(&self, reason: LogoutReason, epoch: u64) -> bool {
        if self.login_in_progress() {
            tracing::debug!(?reason, "login in progress, skipping forced logout");
            return false;
        }
        if self.session_epoch() != epoch {
            tracing::debug!(?reason, "session replaced since failure, skipping forced logout");
            return false;
        }
        self.force_logout(reason)
    }

    /// Wait out the settle delay, then [`Self::force_logout_since`].
    pub async fn settle_then_force_logout(&self, reason: LogoutReason, epoch: u64) -> bool {
        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.force_logout_since(reason, epoch)
    }

    /// Reconcile after the access token vanished from storage.
    ///
    /// Returns true if an authenticated session was ended.
    pub fn reconcile_removed_token(&self) -> bool {
        if !self.is_authenticated() || self.store.has_access_token() || self.login_in_progress() {
            return false;
        }
        // A failed refresh also empties storage; report it as expiry.
        let reason = if self.coordinator.last_refresh_failed() {
            LogoutReason::TokenExpired
        } else {
            LogoutReason::RemovedExternally
        };
        tracing::info!(?reason, "access token no longer in storage");
        self.force_logout(reason)
    }

    /// Redirect to the login route unless already on a public route.
    ///
    /// The check and the redirect happen under one lock so concurrent
    /// callers redirect at most once.
    pub fn redirect_to_login(&self) -> bool {
        let _guard = self.redirect_lock.lock();
        let current = self.navigator.current_path();
        if is_public_route(&current, &self.config.public_routes) {
            return false;
        }
        tracing::debug!(from = %current, to = %self.config.login_route, "redirecting to login");
        self.navigator.replace(&self.config.login_route);
        true
    }

    async fn establish(&self, tokens: TokenPair) -> Option<User> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.store.store_tokens(&tokens);
        self.coordinator.reset_outcome();
        let user = match tokens.user {
            Some(user) => Some(user),
            None => match self.api.current_user(&tokens.token).await {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::debug!(err = %e, "user lookup after login failed");
                    None
                }
            },
        };
        if let Some(ref user) = user {
            self.store.set_user(user);
        }
        self.state_tx.send_replace(AuthState::Authenticated { user: user.clone() });
        let _ = self.event_tx.send(AuthEvent::LoggedIn { user: user.clone() });
        tracing::info!("logged in");
        user
    }

    fn end_quietly(&self) {
        self.state_tx.send_replace(AuthState::Unauthenticated);
        self.store.clear_all();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
