// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in whole epoch seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        epoch_secs()
    }
}

/// Current epoch seconds from the system clock.
pub fn epoch_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
