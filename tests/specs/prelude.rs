// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for behavioral specifications.

#![allow(dead_code)]

use async_trait::async_trait;
use gaffer_core::Config;
use gaffer_daemon::DaemonState;
use gaffer_engine::{Task, TaskCtx, TaskError};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Spec polling cadence.
pub const POLL_INTERVAL_MS: u64 = 10;
pub const POLL_MAX_MS: u64 = 2_000;

/// Boot a daemon over `dir` with default options.
pub async fn boot(dir: &Path) -> DaemonState {
    boot_with(dir, |_| {}).await
}

/// Boot a daemon over `dir`, letting the caller adjust the config.
pub async fn boot_with(dir: &Path, adjust: impl FnOnce(&mut Config)) -> DaemonState {
    let mut config = Config {
        data_dir: dir.to_path_buf(),
        ..Default::default()
    };
    adjust(&mut config);
    gaffer_daemon::startup(config).await.unwrap()
}

/// Poll until `predicate` holds, panicking after [`POLL_MAX_MS`].
pub async fn wait_until(predicate: impl Fn() -> bool) {
    let rounds = POLL_MAX_MS / POLL_INTERVAL_MS;
    for _ in 0..rounds {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
    panic!("condition not reached within {POLL_MAX_MS}ms");
}

/// Task that blocks until its gate is released, or its token cancels.
pub struct GatedTask {
    gate: Arc<Notify>,
}

impl GatedTask {
    pub fn new() -> (Arc<Notify>, Arc<Self>) {
        let gate = Arc::new(Notify::new());
        (Arc::clone(&gate), Arc::new(Self { gate }))
    }
}

#[async_trait]
impl Task for GatedTask {
    fn describe(&self) -> &str {
        "gated"
    }

    async fn run(&self, ctx: &TaskCtx) -> Result<Value, TaskError> {
        tokio::select! {
            _ = self.gate.notified() => Ok(json!("released")),
            _ = ctx.cancel.cancelled() => Err(TaskError::new("cancelled")),
        }
    }
}

/// Task that completes immediately with a fixed value.
pub struct InstantTask(pub Value);

#[async_trait]
impl Task for InstantTask {
    async fn run(&self, _ctx: &TaskCtx) -> Result<Value, TaskError> {
        Ok(self.0.clone())
    }
}
