// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle events broadcast to independent UI surfaces.

use serde::{Deserialize, Serialize};

use crate::api::User;

/// Why a session was ended without the user asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// Refresh was exhausted or a 401 could not be recovered.
    TokenExpired,
    /// The server answered 403.
    SessionInvalidated,
    /// The access token disappeared from storage (logout elsewhere).
    RemovedExternally,
}

/// Events emitted by [`crate::session::AuthSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum AuthEvent {
    #[serde(rename = "auth:loggedIn")]
    LoggedIn { user: Option<User> },
    #[serde(rename = "auth:loggedOut")]
    LoggedOut,
    #[serde(rename = "auth:refreshed")]
    Refreshed,
    #[serde(rename = "auth:refreshFailed")]
    RefreshFailed { error: String },
    /// Forced logout after an unrecoverable 401 or an external token removal.
    #[serde(rename = "auth:tokenExpired")]
    TokenExpired { reason: LogoutReason },
    /// Forced logout after a 403.
    #[serde(rename = "auth:sessionExpired")]
    SessionExpired,
}

impl AuthEvent {
    /// One-line message suitable for a user-facing notification, if any.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            Self::TokenExpired { reason: LogoutReason::RemovedExternally } => {
                Some("You were signed out in another window.")
            }
            Self::TokenExpired { .. } => Some("Your session has expired. Please sign in again."),
            Self::SessionExpired => Some("Your session is no longer valid. Please sign in again."),
            _ => None,
        }
    }
}
