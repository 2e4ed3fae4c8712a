// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight token refresh.
//!
//! At most one refresh call is in flight at any time. Callers arriving while
//! a flight is running are queued and receive that flight's outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::api::AuthApi;
use crate::error::AuthError;
use crate::events::AuthEvent;
use crate::expiry::ExpiryOracle;
use crate::store::TokenStore;

type Outcome = Result<String, AuthError>;

/// An in-flight refresh and the callers waiting on it.
struct Flight {
    waiters: Vec<oneshot::Sender<Outcome>>,
}

/// Coordinates refresh across every concurrent caller.
pub struct RefreshCoordinator {
    store: TokenStore,
    oracle: ExpiryOracle,
    api: Arc<dyn AuthApi>,
    event_tx: broadcast::Sender<AuthEvent>,
    /// `Some` while a refresh is in flight.
    flight: Mutex<Option<Flight>>,
    last_failed: AtomicBool,
}

impl RefreshCoordinator {
    pub fn new(
        store: TokenStore,
        oracle: ExpiryOracle,
        api: Arc<dyn AuthApi>,
        event_tx: broadcast::Sender<AuthEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            oracle,
            api,
            event_tx,
            flight: Mutex::new(None),
            last_failed: AtomicBool::new(false),
        })
    }

    /// Refresh the access token, joining the in-flight refresh if there is one.
    ///
    /// Every caller of the same flight gets the same token or the same error.
    /// On failure all credentials have been cleared; forced logout is left to
    /// the caller.
    pub async fn refresh(self: &Arc<Self>) -> Outcome {
        let (tx, rx) = oneshot::channel();
        let lead = {
            let mut slot = self.flight.lock();
            match slot.as_mut() {
                Some(flight) => {
                    flight.waiters.push(tx);
                    false
                }
                None => {
                    *slot = Some(Flight { waiters: vec![tx] });
                    true
                }
            }
        };

        if lead {
            self.launch();
        } else {
            tracing::debug!("refresh already in flight, waiting");
        }

        rx.await.unwrap_or_else(|_| Err(AuthError::RefreshFailed("refresh abandoned".into())))
    }

    /// Lead a refresh only if none is in flight. Never joins a running flight.
    ///
    /// Returns `None` when a refresh was already running.
    pub async fn refresh_if_idle(self: &Arc<Self>) -> Option<Outcome> {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.flight.lock();
            if slot.is_some() {
                return None;
            }
            *slot = Some(Flight { waiters: vec![tx] });
        }
        self.launch();
        Some(rx.await.unwrap_or_else(|_| Err(AuthError::RefreshFailed("refresh abandoned".into()))))
    }

    /// `refresh()` reduced to success/failure.
    pub async fn attempt_refresh(self: &Arc<Self>) -> bool {
        self.refresh().await.is_ok()
    }

    /// Policy gate: a refresh token exists and the access token is expired.
    pub fn should_refresh(&self) -> bool {
        self.store.has_refresh_token() && self.oracle.is_access_token_expired()
    }

    pub fn is_in_flight(&self) -> bool {
        self.flight.lock().is_some()
    }

    /// True if the most recent settled refresh failed.
    pub fn last_refresh_failed(&self) -> bool {
        self.last_failed.load(Ordering::SeqCst)
    }

    /// Forget the last outcome; called when a new session is established.
    pub fn reset_outcome(&self) {
        self.last_failed.store(false, Ordering::SeqCst);
    }

    // The network call runs on its own task so the flight settles even if
    // the caller that opened it is dropped.
    fn launch(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.run().await;
            this.settle(outcome);
        });
    }

    async fn run(&self) -> Outcome {
        let access_token = self.store.get_access_token();
        let refresh_token = self.store.get_refresh_token().filter(|t| !t.trim().is_empty());
        if refresh_token.is_some() && self.oracle.is_refresh_token_expired() {
            self.clear_unless_replaced(access_token.as_deref());
            return Err(AuthError::RefreshFailed("refresh token expired".into()));
        }

        match self.api.refresh(refresh_token.as_deref()).await {
            Ok(tokens) => {
                self.store.store_tokens(&tokens);
                tracing::info!(rotated = tokens.refresh_token.is_some(), "access token refreshed");
                Ok(tokens.token)
            }
            Err(e) => {
                self.clear_unless_replaced(access_token.as_deref());
                let err = match e {
                    AuthError::RefreshFailed(_) => e,
                    other => AuthError::RefreshFailed(other.to_string()),
                };
                tracing::warn!(err = %err, "token refresh failed, credentials cleared");
                Err(err)
            }
        }
    }

    // A login during the flight stores a new access token; leave it alone.
    fn clear_unless_replaced(&self, started_with: Option<&str>) {
        if self.store.get_access_token().as_deref() == started_with {
            self.store.clear_all();
        } else {
            tracing::debug!("credentials replaced during refresh, keeping them");
        }
    }

    // Take the flight out of the slot first so no caller can join a settled
    // flight, then notify every waiter with the same outcome.
    fn settle(&self, outcome: Outcome) {
        let flight = self.flight.lock().take();
        let waiters = flight.map(|f| f.waiters).unwrap_or_default();
        self.last_failed.store(outcome.is_err(), Ordering::SeqCst);

        let event = match &outcome {
            Ok(_) => AuthEvent::Refreshed,
            Err(e) => AuthEvent::RefreshFailed { error: e.to_string() },
        };
        let _ = self.event_tx.send(event);

        tracing::debug!(waiters = waiters.len(), ok = outcome.is_ok(), "refresh settled");
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
