// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pantry session core: token storage, expiry checks, single-flight refresh,
//! the authenticated request pipeline and the background session monitor.

pub mod api;
pub mod claims;
pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod expiry;
pub mod monitor;
pub mod navigation;
pub mod session;
pub mod storage;
pub mod store;
pub mod test_support;

pub use crate::client::{ApiClient, ApiRequest};
pub use crate::config::SessionConfig;
pub use crate::error::AuthError;
pub use crate::events::{AuthEvent, LogoutReason};
pub use crate::monitor::{spawn_session_monitor, MonitorHandle};
pub use crate::session::{AuthSession, AuthState};
