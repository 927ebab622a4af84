// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic TTL compaction of terminal runs and processes.

use crate::process_store::ProcessStore;
use crate::run_graph::RunGraphStore;
use gaffer_core::{Clock, IdGen};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(600);

/// TTL compaction settings.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    pub interval: Duration,
    pub run_ttl_seconds: u64,
    pub process_ttl_seconds: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_COMPACTION_INTERVAL,
            run_ttl_seconds: gaffer_core::config::DEFAULT_RUN_TTL_SECONDS,
            process_ttl_seconds: gaffer_core::config::DEFAULT_PROCESS_TTL_SECONDS,
        }
    }
}

/// Spawn the periodic cleanup task. Abort the returned handle to stop.
///
/// Only terminal records past their TTL are pruned; the stores enforce
/// that non-terminal records are never deleted.
pub fn spawn_compaction<C: Clock, G: IdGen + 'static>(
    runs: Arc<RunGraphStore<C, G>>,
    processes: Arc<ProcessStore<C, G>>,
    config: CompactionConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so startup stays quiet
        tick.tick().await;
        loop {
            tick.tick().await;
            match runs.cleanup(config.run_ttl_seconds) {
                Ok(0) => {}
                Ok(removed) => info!(removed, "pruned expired runs"),
                Err(e) => warn!(error = %e, "run compaction failed"),
            }
            match processes.cleanup(config.process_ttl_seconds) {
                Ok(0) => {}
                Ok(removed) => info!(removed, "pruned expired processes"),
                Err(e) => warn!(error = %e, "process compaction failed"),
            }
        }
    })
}
