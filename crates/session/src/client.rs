// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated HTTP client: the request pipeline every API call goes through.
//!
//! Before send, a valid access token is attached as a bearer credential.
//! After the response, 401 triggers one refresh + retry and 403 ends the
//! session.

use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::api::{error_message, http_client};
use crate::error::AuthError;
use crate::events::LogoutReason;
use crate::session::AuthSession;

/// A replayable API request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self { method: Method::POST, path: path.into(), body: Some(body) }
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self { method: Method::PUT, path: path.into(), body: Some(body) }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }
}

/// HTTP client bound to an [`AuthSession`].
pub struct ApiClient {
    session: Arc<AuthSession>,
    client: Client,
}

impl ApiClient {
    pub fn new(session: Arc<AuthSession>) -> Self {
        let client = http_client(session.config(), false);
        Self { session, client }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Send a request through the pipeline.
    ///
    /// Returns the response for any status other than an unrecoverable 401
    /// or a 403; those end the session and surface as errors.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Response, AuthError> {
        let epoch = self.session.session_epoch();
        let sent = self.bearer_for_send();
        let resp = self.send(request, sent.as_deref()).await?;
        match resp.status() {
            StatusCode::UNAUTHORIZED => self.on_unauthorized(request, sent, epoch).await,
            StatusCode::FORBIDDEN => Err(self.on_forbidden(request, epoch).await),
            _ => Ok(resp),
        }
    }

    pub async fn get(&self, path: &str) -> Result<Response, AuthError> {
        self.execute(&ApiRequest::get(path)).await
    }

    /// GET a path and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        let resp = self.execute(&ApiRequest::get(path)).await?;
        decode(resp).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, AuthError> {
        let resp = self.execute(&ApiRequest::post(path, body)).await?;
        decode(resp).await
    }

    pub async fn put_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, AuthError> {
        let resp = self.execute(&ApiRequest::put(path, body)).await?;
        decode(resp).await
    }

    pub async fn delete(&self, path: &str) -> Result<serde_json::Value, AuthError> {
        let resp = self.execute(&ApiRequest::delete(path)).await?;
        decode(resp).await
    }

    /// The token to attach: present and not expired, else none.
    fn bearer_for_send(&self) -> Option<String> {
        let token = self.session.store().get_access_token()?;
        if token.trim().is_empty() || self.session.oracle().is_access_token_expired() {
            return None;
        }
        Some(token)
    }

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, AuthError> {
        let url = self.session.config().url(&request.path);
        let mut req = self.client.request(request.method.clone(), url);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    async fn on_unauthorized(
        &self,
        request: &ApiRequest,
        sent: Option<String>,
        epoch: u64,
    ) -> Result<Response, AuthError> {
        if self.session.config().is_auth_endpoint(&request.path) {
            tracing::warn!(path = %request.path, "auth endpoint returned 401, not refreshing");
            self.session.settle_then_force_logout(LogoutReason::TokenExpired, epoch).await;
            return Err(AuthError::RecursiveAuthFailure);
        }

        let token = match self.rotated_since(sent.as_deref()) {
            Some(token) => {
                tracing::debug!(path = %request.path, "token rotated while in flight, retrying");
                token
            }
            None => match self.session.coordinator().refresh().await {
                Ok(token) => token,
                Err(e) => {
                    tracing::info!(path = %request.path, err = %e, "refresh failed after 401");
                    self.session.settle_then_force_logout(LogoutReason::TokenExpired, epoch).await;
                    return Err(e);
                }
            },
        };

        let retry = self.send(request, Some(&token)).await?;
        match retry.status() {
            StatusCode::UNAUTHORIZED => {
                tracing::warn!(path = %request.path, "retry with fresh token still unauthorized");
                self.session.settle_then_force_logout(LogoutReason::TokenExpired, epoch).await;
                Err(AuthError::Unauthorized)
            }
            StatusCode::FORBIDDEN => Err(self.on_forbidden(request, epoch).await),
            _ => Ok(retry),
        }
    }

    async fn on_forbidden(&self, request: &ApiRequest, epoch: u64) -> AuthError {
        tracing::warn!(path = %request.path, "403 received, invalidating session");
        self.session.settle_then_force_logout(LogoutReason::SessionInvalidated, epoch).await;
        AuthError::SessionInvalidated
    }

    // A valid token different from the one sent means another caller already
    // refreshed; retry with it instead of refreshing again.
    fn rotated_since(&self, sent: Option<&str>) -> Option<String> {
        let current = self.bearer_for_send()?;
        (Some(current.as_str()) != sent).then_some(current)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, AuthError> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(AuthError::Http { status: status.as_u16(), message: error_message(status, &text) });
    }
    let bytes = resp.bytes().await?;
    let body: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
    serde_json::from_slice(body).map_err(|e| AuthError::Decode(e.to_string()))
}
