// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Navigation surface and the public route allow-list.

use parking_lot::Mutex;

/// Where the user currently is, and how to send them elsewhere.
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;
    fn replace(&self, path: &str);
}

/// Headless navigator that tracks the current path and records redirects.
pub struct MemoryNavigator {
    inner: Mutex<NavState>,
}

struct NavState {
    current: String,
    redirects: Vec<String>,
}

impl MemoryNavigator {
    pub fn new(start: impl Into<String>) -> Self {
        Self { inner: Mutex::new(NavState { current: start.into(), redirects: Vec::new() }) }
    }

    /// Move without counting as a redirect (the user navigated).
    pub fn visit(&self, path: impl Into<String>) {
        self.inner.lock().current = path.into();
    }

    /// Every path passed to [`Navigator::replace`], in order.
    pub fn redirects(&self) -> Vec<String> {
        self.inner.lock().redirects.clone()
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        self.inner.lock().current.clone()
    }

    fn replace(&self, path: &str) {
        let mut state = self.inner.lock();
        state.current = path.to_owned();
        state.redirects.push(path.to_owned());
    }
}

/// True if `path` is one of `routes` or nested beneath one.
///
/// Query strings and fragments are ignored.
pub fn is_public_route(path: &str, routes: &[String]) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = match path.trim_end_matches('/') {
        "" => "/",
        p => p,
    };
    routes.iter().any(|route| {
        let route = route.trim_end_matches('/');
        !route.is_empty()
            && (path == route
                || path.strip_prefix(route).is_some_and(|rest| rest.starts_with('/')))
    })
}

#[cfg(test)]
#[path = "navigation_tests.rs"]
mod tests;
