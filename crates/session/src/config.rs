// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the session core.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the application API.
    #[arg(long, default_value = "http://127.0.0.1:3000", env = "PANTRY_API_URL")]
    pub api_url: String,

    /// Login endpoint path.
    #[arg(long, default_value = "/api/auth/login", env = "PANTRY_LOGIN_PATH")]
    pub login_path: String,

    /// Registration endpoint path.
    #[arg(long, default_value = "/api/auth/register", env = "PANTRY_REGISTER_PATH")]
    pub register_path: String,

    /// Token refresh endpoint path.
    #[arg(long, default_value = "/api/auth/refresh-token", env = "PANTRY_REFRESH_PATH")]
    pub refresh_path: String,

    /// Current-user endpoint path.
    #[arg(long, default_value = "/api/auth/me", env = "PANTRY_ME_PATH")]
    pub me_path: String,

    /// Credentials file. Defaults to `<state dir>/session.json`.
    #[arg(long, env = "PANTRY_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Storage key for the access token.
    #[arg(long, default_value = "accessToken", env = "PANTRY_ACCESS_TOKEN_KEY")]
    pub access_token_key: String,

    /// Storage key for the refresh token.
    #[arg(long, default_value = "refreshToken", env = "PANTRY_REFRESH_TOKEN_KEY")]
    pub refresh_token_key: String,

    /// Storage key for the cached access-token expiry.
    #[arg(long, default_value = "accessExpiryEpochSeconds", env = "PANTRY_ACCESS_EXPIRY_KEY")]
    pub access_expiry_key: String,

    /// Storage key for cached user data.
    #[arg(long, default_value = "user", env = "PANTRY_USER_KEY")]
    pub user_key: String,

    /// Session monitor check interval in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "PANTRY_MONITOR_INTERVAL_MS")]
    pub monitor_interval_ms: u64,

    /// Proactively refresh when the access token expires within this many seconds.
    #[arg(long, default_value_t = 300, env = "PANTRY_NEAR_EXPIRY_SECS")]
    pub near_expiry_secs: i64,

    /// Delay before clearing credentials on 401/403, in milliseconds.
    #[arg(long, default_value_t = 150, env = "PANTRY_SETTLE_MS")]
    pub settle_ms: u64,

    /// HTTP request timeout in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "PANTRY_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Route the user is sent to on forced logout.
    #[arg(long, default_value = "/login", env = "PANTRY_LOGIN_ROUTE")]
    pub login_route: String,

    /// Routes reachable without a token (comma-separated).
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "/login,/register,/forgot-password,/reset-password",
        env = "PANTRY_PUBLIC_ROUTES"
    )]
    pub public_routes: Vec<String>,
}

impl SessionConfig {
    /// Defaults for an API at `api_url`, without consulting argv or env.
    pub fn for_api(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            login_path: "/api/auth/login".into(),
            register_path: "/api/auth/register".into(),
            refresh_path: "/api/auth/refresh-token".into(),
            me_path: "/api/auth/me".into(),
            credentials_file: None,
            access_token_key: "accessToken".into(),
            refresh_token_key: "refreshToken".into(),
            access_expiry_key: "accessExpiryEpochSeconds".into(),
            user_key: "user".into(),
            monitor_interval_ms: 60_000,
            near_expiry_secs: 300,
            settle_ms: 150,
            request_timeout_ms: 30_000,
            login_route: "/login".into(),
            public_routes: vec![
                "/login".into(),
                "/register".into(),
                "/forgot-password".into(),
                "/reset-password".into(),
            ],
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn storage_keys(&self) -> StorageKeys {
        StorageKeys {
            access_token: self.access_token_key.clone(),
            refresh_token: self.refresh_token_key.clone(),
            access_expiry: self.access_expiry_key.clone(),
            user: self.user_key.clone(),
        }
    }

    /// Resolve the credentials file path.
    pub fn credentials_path(&self) -> PathBuf {
        match self.credentials_file {
            Some(ref path) => path.clone(),
            None => state_dir().join("session.json"),
        }
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    /// True when `path` targets the login or refresh endpoint.
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        path == self.login_path || path == self.refresh_path
    }
}

/// Storage keys for each persisted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expiry: String,
    pub user: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            access_token: "accessToken".into(),
            refresh_token: "refreshToken".into(),
            access_expiry: "accessExpiryEpochSeconds".into(),
            user: "user".into(),
        }
    }
}

/// Resolve the state directory for session data.
///
/// Checks `PANTRY_STATE_DIR`, then `$XDG_STATE_HOME/pantry`,
/// then `$HOME/.local/state/pantry`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PANTRY_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("pantry");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/pantry");
    }
    PathBuf::from(".pantry")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
