// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expiry decisions for stored tokens.
//!
//! The defaults are asymmetric: a token whose expiry cannot be
//! determined is assumed valid (the server will reject it if not), while a
//! token whose claims fail to decode is assumed expired.

use std::sync::Arc;

use crate::claims::token_expiry;
use crate::clock::Clock;
use crate::store::TokenStore;

/// Answers "is it expired / near expiry" for the tokens in a [`TokenStore`].
#[derive(Clone)]
pub struct ExpiryOracle {
    store: TokenStore,
    clock: Arc<dyn Clock>,
}

impl ExpiryOracle {
    pub fn new(store: TokenStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now_secs(&self) -> i64 {
        self.clock.now_secs()
    }

    pub fn is_access_token_expired(&self) -> bool {
        let Some(token) = self.store.get_access_token() else {
            return true;
        };
        match self.access_expiry_of(&token) {
            Ok(Some(exp)) => exp <= self.now_secs(),
            Ok(None) => false,
            Err(()) => true,
        }
    }

    pub fn is_refresh_token_expired(&self) -> bool {
        let Some(token) = self.store.get_refresh_token() else {
            return true;
        };
        match token_expiry(&token) {
            Ok(Some(exp)) => exp <= self.now_secs(),
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(err = %e, "refresh token claims unreadable");
                true
            }
        }
    }

    /// True iff the access expiry is known and falls within `window_secs` of now.
    pub fn is_near_expiry(&self, window_secs: i64) -> bool {
        self.seconds_until_expiry().is_some_and(|remaining| remaining <= window_secs)
    }

    /// Seconds until the access token expires (negative once expired).
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        let token = self.store.get_access_token()?;
        let exp = self.access_expiry_of(&token).ok()??;
        Some(exp - self.now_secs())
    }

    // Cached expiry first; otherwise derive from claims and cache the result.
    fn access_expiry_of(&self, token: &str) -> Result<Option<i64>, ()> {
        if let Some(exp) = self.store.access_expiry() {
            return Ok(Some(exp));
        }
        match token_expiry(token) {
            Ok(Some(exp)) => {
                self.store.set_access_expiry(exp);
                Ok(Some(exp))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::debug!(err = %e, "access token claims unreadable");
                Err(())
            }
        }
    }
}

#[cfg(test)]
#[path = "expiry_tests.rs"]
mod tests;
