// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time source abstraction.
//!
//! All record timestamps are whole seconds since the Unix epoch, taken
//! through the [`Clock`] trait so TTL compaction and timestamp invariants
//! are testable with a manually-advanced clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of second-precision epoch timestamps.
pub trait Clock: Clone + Send + Sync + 'static {
    fn epoch_secs(&self) -> u64;
}

/// Wall-clock time for production use.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Manually-advanced clock for tests.
#[derive(Clone, Debug, Default)]
pub struct FakeClock {
    secs: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(secs: u64) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(secs)),
        }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn epoch_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}
