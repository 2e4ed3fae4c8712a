// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors produced by the session core.
///
/// Cloneable so a single refresh outcome can be handed to every queued waiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthError {
    /// Token claims could not be decoded.
    MalformedToken(String),
    /// The refresh endpoint rejected or errored.
    RefreshFailed(String),
    /// A 401 that could not be recovered by refresh + retry.
    Unauthorized,
    /// A 403: the server invalidated the session.
    SessionInvalidated,
    /// A 401 from the refresh or login endpoint itself.
    RecursiveAuthFailure,
    /// Login or registration was rejected.
    InvalidCredentials(String),
    /// Transport-level failure (connect, timeout, TLS).
    Network(String),
    /// Non-auth HTTP failure.
    Http { status: u16, message: String },
    /// Response body did not match the expected shape.
    Decode(String),
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "MALFORMED_TOKEN",
            Self::RefreshFailed(_) => "REFRESH_FAILED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::SessionInvalidated => "SESSION_INVALIDATED",
            Self::RecursiveAuthFailure => "RECURSIVE_AUTH_FAILURE",
            Self::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            Self::Network(_) => "NETWORK",
            Self::Http { .. } => "HTTP",
            Self::Decode(_) => "DECODE",
        }
    }

    /// HTTP status most closely matching this error, for callers that
    /// re-expose failures over their own API.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized | Self::RecursiveAuthFailure | Self::RefreshFailed(_) => 401,
            Self::InvalidCredentials(_) => 401,
            Self::SessionInvalidated => 403,
            Self::Http { status, .. } => *status,
            Self::Network(_) => 502,
            Self::MalformedToken(_) | Self::Decode(_) => 500,
        }
    }

    /// True for failures that end the authenticated session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized
                | Self::SessionInvalidated
                | Self::RecursiveAuthFailure
                | Self::RefreshFailed(_)
        )
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedToken(msg) => write!(f, "malformed token: {msg}"),
            Self::RefreshFailed(msg) => write!(f, "token refresh failed: {msg}"),
            Self::Unauthorized => f.write_str("session expired"),
            Self::SessionInvalidated => f.write_str("session invalidated by server"),
            Self::RecursiveAuthFailure => f.write_str("authentication endpoint rejected request"),
            Self::InvalidCredentials(msg) => write!(f, "invalid credentials: {msg}"),
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Http { status, message } => write!(f, "http {status}: {message}"),
            Self::Decode(msg) => write!(f, "unexpected response: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
