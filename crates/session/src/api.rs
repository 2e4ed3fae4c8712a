// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side authentication endpoints consumed by the session core.

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::AuthError;

pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuthError>> + Send + 'a>>;

/// Login request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Registration request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Tokens issued by login, registration, or refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl TokenPair {
    pub fn new(token: impl Into<String>, refresh_token: Option<&str>) -> Self {
        Self { token: token.into(), refresh_token: refresh_token.map(String::from), user: None }
    }
}

/// The authenticated user as reported by the API.
///
/// Only the identifying fields are typed; everything else is carried through.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl User {
    pub fn from_value(value: serde_json::Value) -> anyhow::Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Authentication endpoints.
///
/// Object-safe for use as `Arc<dyn AuthApi>`.
pub trait AuthApi: Send + Sync + 'static {
    fn login<'a>(&'a self, credentials: &'a Credentials) -> ApiFuture<'a, TokenPair>;

    fn register<'a>(&'a self, registration: &'a Registration) -> ApiFuture<'a, TokenPair>;

    /// Exchange the refresh credential for new tokens. `refresh_token` is the
    /// stored refresh token, if any; implementations may also rely on an
    /// out-of-band credential such as a cookie.
    fn refresh<'a>(&'a self, refresh_token: Option<&'a str>) -> ApiFuture<'a, TokenPair>;

    fn current_user<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, User>;
}

/// [`AuthApi`] over HTTP.
///
/// Uses its own client rather than [`crate::client::ApiClient`] so that auth
/// endpoint failures never re-enter the refresh path.
pub struct HttpAuthApi {
    http: Client,
    login_url: String,
    register_url: String,
    refresh_url: String,
    me_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct CurrentUserEnvelope {
    user: User,
}

impl HttpAuthApi {
    pub fn new(config: &SessionConfig) -> Self {
        let http = http_client(config, true);
        Self {
            http,
            login_url: config.url(&config.login_path),
            register_url: config.url(&config.register_path),
            refresh_url: config.url(&config.refresh_path),
            me_url: config.url(&config.me_path),
        }
    }

    async fn post_credentials<B: Serialize + Sync>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<TokenPair, AuthError> {
        let resp = self.http.post(url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AuthError::InvalidCredentials(error_message(status, &text)));
        }
        Ok(resp.json().await?)
    }
}

impl AuthApi for HttpAuthApi {
    fn login<'a>(&'a self, credentials: &'a Credentials) -> ApiFuture<'a, TokenPair> {
        Box::pin(self.post_credentials(&self.login_url, credentials))
    }

    fn register<'a>(&'a self, registration: &'a Registration) -> ApiFuture<'a, TokenPair> {
        Box::pin(self.post_credentials(&self.register_url, registration))
    }

    fn refresh<'a>(&'a self, refresh_token: Option<&'a str>) -> ApiFuture<'a, TokenPair> {
        Box::pin(async move {
            let req = self.http.post(&self.refresh_url);
            let req = match refresh_token {
                Some(token) => req.json(&RefreshBody { refresh_token: token }),
                None => req,
            };
            let resp = req.send().await.map_err(|e| AuthError::RefreshFailed(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(AuthError::RefreshFailed(error_message(status, &text)));
            }
            resp.json().await.map_err(|e| AuthError::RefreshFailed(e.to_string()))
        })
    }

    fn current_user<'a>(&'a self, access_token: &'a str) -> ApiFuture<'a, User> {
        Box::pin(async move {
            let resp = self.http.get(&self.me_url).bearer_auth(access_token).send().await?;
            let status = resp.status();
            match status {
                StatusCode::UNAUTHORIZED => return Err(AuthError::Unauthorized),
                StatusCode::FORBIDDEN => return Err(AuthError::SessionInvalidated),
                s if !s.is_success() => {
                    let text = resp.text().await.unwrap_or_default();
                    return Err(AuthError::Http {
                        status: s.as_u16(),
                        message: error_message(s, &text),
                    });
                }
                _ => {}
            }
            // Accept both `{ "user": {...} }` and a bare user object.
            let value: serde_json::Value = resp.json().await?;
            if let Ok(envelope) = serde_json::from_value::<CurrentUserEnvelope>(value.clone()) {
                return Ok(envelope.user);
            }
            serde_json::from_value(value).map_err(|e| AuthError::Decode(e.to_string()))
        })
    }
}

/// Install the ring crypto provider for rustls unless one is already set.
///
/// reqwest needs a provider even for plain HTTP.
pub fn ensure_crypto_provider() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub(crate) fn http_client(config: &SessionConfig, cookies: bool) -> Client {
    ensure_crypto_provider();
    Client::builder()
        .timeout(config.request_timeout())
        .cookie_store(cookies)
        .build()
        .unwrap_or_default()
}

/// Prefer a JSON `message` / `error` field from the body, else the status text.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let field = parsed.as_ref().and_then(|v| {
        v.get("message").or_else(|| v.get("error")).and_then(|m| m.as_str()).map(String::from)
    });
    match field {
        Some(msg) => msg,
        None if !body.trim().is_empty() && body.len() <= 200 => body.trim().to_owned(),
        None => status.canonical_reason().unwrap_or("request failed").to_owned(),
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
