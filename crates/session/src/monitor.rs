// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background session monitor.
//!
//! While the session is authenticated, periodically refreshes tokens close to
//! expiry and reconciles with storage (token removed elsewhere). Storage
//! change notifications trigger an immediate reconcile; the timer is the
//! fallback when the backend cannot notify.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::LogoutReason;
use crate::session::{AuthSession, AuthState};
use crate::storage::StorageChange;

/// Owns the monitor task. Dropping the handle cancels the task.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the monitor and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn the session monitor. It exits when `shutdown` (or the handle) is
/// cancelled.
pub fn spawn_session_monitor(session: Arc<AuthSession>, shutdown: CancellationToken) -> MonitorHandle {
    let cancel = shutdown.child_token();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut auth_rx = session.auth_state();
        loop {
            // Idle until authenticated.
            tokio::select! {
                _ = token.cancelled() => return,
                res = auth_rx.wait_for(|s| s.is_authenticated()) => {
                    if res.is_err() {
                        return;
                    }
                }
            }

            tracing::debug!("session monitor active");
            if !watch_session(&session, &mut auth_rx, &token).await {
                return;
            }
            tracing::debug!("session monitor idle");
        }
    });
    MonitorHandle { cancel, task }
}

/// Run checks while authenticated. Returns false when the monitor should exit.
async fn watch_session(
    session: &Arc<AuthSession>,
    auth_rx: &mut watch::Receiver<AuthState>,
    token: &CancellationToken,
) -> bool {
    let mut timer = tokio::time::interval(session.config().monitor_interval());
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut changes = session.store().subscribe();

    loop {
        tokio::select! {
            _ = token.cancelled() => return false,
            res = auth_rx.changed() => {
                if res.is_err() {
                    return false;
                }
                if !auth_rx.borrow_and_update().is_authenticated() {
                    return true;
                }
            }
            change = next_change(&mut changes) => {
                match change {
                    Some(change) if session.store().touches_access_token(&change) => {
                        session.reconcile_removed_token();
                    }
                    Some(_) => {}
                    // Notifications gone; keep polling on the timer.
                    None => changes = None,
                }
            }
            _ = timer.tick() => check_session(session, token).await,
        }

        if !session.is_authenticated() {
            return true;
        }
    }
}

/// One monitor pass: reconcile removal, then refresh if close to expiry.
///
/// Returns early when `cancel` fires; an abandoned refresh still settles on
/// its own task.
pub async fn check_session(session: &Arc<AuthSession>, cancel: &CancellationToken) {
    if session.reconcile_removed_token() || !session.store().has_access_token() {
        return;
    }

    let window = session.config().near_expiry_secs;
    if !session.oracle().is_near_expiry(window) {
        return;
    }

    tracing::debug!(window, "access token near expiry, refreshing in background");
    let epoch = session.session_epoch();
    let outcome = tokio::select! {
        _ = cancel.cancelled() => return,
        outcome = session.coordinator().refresh_if_idle() => outcome,
    };
    match outcome {
        None => tracing::debug!("refresh already in flight"),
        Some(Ok(_)) => tracing::debug!("background refresh succeeded"),
        // Credentials are already gone; finish the logout the next request
        // would otherwise trigger.
        Some(Err(e)) => {
            tracing::warn!(err = %e, "background refresh failed");
            session.force_logout_since(LogoutReason::TokenExpired, epoch);
        }
    }
}

async fn next_change(
    changes: &mut Option<broadcast::Receiver<StorageChange>>,
) -> Option<StorageChange> {
    let Some(rx) = changes.as_mut() else {
        return std::future::pending().await;
    };
    match rx.recv().await {
        Ok(change) => Some(change),
        // Missed notifications: reconcile as if everything changed.
        Err(broadcast::error::RecvError::Lagged(_)) => Some(StorageChange { key: None }),
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
