// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token store: the single source of truth for session credentials.
//!
//! Pure data access over a [`Storage`] backend. Storage failures are logged
//! and read as "absent"; no method here returns an error.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::api::{TokenPair, User};
use crate::claims::token_expiry;
use crate::config::StorageKeys;
use crate::storage::{Storage, StorageChange};

/// Shared handle to the persisted token record. Cheap to clone.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn Storage>,
    keys: Arc<StorageKeys>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn Storage>, keys: StorageKeys) -> Self {
        Self { storage, keys: Arc::new(keys) }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.read(&self.keys.access_token)
    }

    /// Store the access token and cache its `exp` claim.
    ///
    /// The old cached expiry is removed before the token is written, so a
    /// reader never pairs the new token with the previous token's expiry.
    /// When the claim cannot be read the expiry stays undetermined.
    pub fn set_access_token(&self, token: &str) {
        self.delete(&self.keys.access_expiry);
        self.write(&self.keys.access_token, token);
        match token_expiry(token) {
            Ok(Some(exp)) => self.set_access_expiry(exp),
            Ok(None) => {}
            Err(e) => tracing::debug!(err = %e, "access token claims unreadable"),
        }
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.read(&self.keys.refresh_token)
    }

    pub fn set_refresh_token(&self, token: &str) {
        self.write(&self.keys.refresh_token, token);
    }

    /// Persist a token pair. The refresh token is only replaced when one was issued.
    pub fn store_tokens(&self, tokens: &TokenPair) {
        self.set_access_token(&tokens.token);
        if let Some(ref refresh) = tokens.refresh_token {
            self.set_refresh_token(refresh);
        }
    }

    /// Cached access-token expiry in epoch seconds.
    pub fn access_expiry(&self) -> Option<i64> {
        let raw = self.read(&self.keys.access_expiry)?;
        match raw.trim().parse() {
            Ok(exp) => Some(exp),
            Err(_) => {
                tracing::debug!("ignoring unparseable cached expiry");
                None
            }
        }
    }

    pub fn set_access_expiry(&self, exp: i64) {
        self.write(&self.keys.access_expiry, &exp.to_string());
    }

    pub fn user(&self) -> Option<User> {
        let raw = self.read(&self.keys.user)?;
        serde_json::from_str(&raw).ok()
    }

    pub fn set_user(&self, user: &User) {
        match serde_json::to_string(user) {
            Ok(json) => self.write(&self.keys.user, &json),
            Err(e) => tracing::debug!(err = %e, "failed to encode user"),
        }
    }

    pub fn has_access_token(&self) -> bool {
        self.get_access_token().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn has_refresh_token(&self) -> bool {
        self.get_refresh_token().is_some_and(|t| !t.trim().is_empty())
    }

    /// Remove every credential field and cached user data. Idempotent.
    pub fn clear_all(&self) {
        for key in [
            &self.keys.access_token,
            &self.keys.refresh_token,
            &self.keys.access_expiry,
            &self.keys.user,
        ] {
            self.delete(key);
        }
    }

    /// Change notifications from the backing storage, if supported.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<StorageChange>> {
        self.storage.subscribe()
    }

    /// True if a change notification concerns the access token.
    pub fn touches_access_token(&self, change: &StorageChange) -> bool {
        match change.key.as_deref() {
            Some(key) => key == self.keys.access_token,
            None => true,
        }
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(key, err = %e, "storage read failed");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            tracing::debug!(key, err = %e, "storage write failed");
        }
    }

    fn delete(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            tracing::debug!(key, err = %e, "storage remove failed");
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
