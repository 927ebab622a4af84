// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, reconciliation, shutdown.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use gaffer_core::{Config, HexIdGen, SystemClock};
use gaffer_engine::{
    spawn_compaction, CompactionConfig, EventBus, LaneQueue, ProcessManager, ProcessStore,
    RunGraphStore, StoreError,
};
use gaffer_storage::{table_path, Table, TableError, PROCESSES_TABLE, RUNS_TABLE};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::supervisor::SessionSupervisor;

/// Daemon store types with production clock and id generation.
pub type DaemonRunStore = RunGraphStore<SystemClock, HexIdGen>;
pub type DaemonProcessStore = ProcessStore<SystemClock, HexIdGen>;
pub type DaemonLaneQueue = LaneQueue<SystemClock, HexIdGen>;
pub type DaemonProcessManager = ProcessManager<SystemClock, HexIdGen>;
pub type DaemonSupervisor = SessionSupervisor<SystemClock, HexIdGen>;

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem layout under the data directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    /// Lock/PID file
    pub lock_path: PathBuf,
    pub runs_table: PathBuf,
    pub processes_table: PathBuf,
}

impl Paths {
    /// Resolve paths from config; an empty `data_dir` falls back to the
    /// per-user state directory.
    pub fn resolve(config: &Config) -> Result<Self, LifecycleError> {
        let data_dir = if config.data_dir.as_os_str().is_empty() {
            crate::env::state_dir()?
        } else {
            config.data_dir.clone()
        };
        Ok(Self {
            lock_path: data_dir.join("gafferd.pid"),
            runs_table: table_path(&data_dir, RUNS_TABLE),
            processes_table: table_path(&data_dir, PROCESSES_TABLE),
            data_dir,
        })
    }
}

/// Daemon state during operation.
pub struct DaemonState {
    pub config: Config,
    pub paths: Paths,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub bus: EventBus,
    pub runs: Arc<DaemonRunStore>,
    pub processes: Arc<DaemonProcessStore>,
    pub lanes: DaemonLaneQueue,
    pub manager: DaemonProcessManager,
    pub supervisor: DaemonSupervisor,
    compaction: JoinHandle<()>,
}

impl std::fmt::Debug for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonState")
            .field("config", &self.config)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

/// Start the daemon: lock, replay, reconcile, compaction, primary session.
pub async fn startup(config: Config) -> Result<DaemonState, LifecycleError> {
    let paths = Paths::resolve(&config)?;
    fs::create_dir_all(&paths.data_dir)?;

    // Acquire the lock FIRST to prevent double-start races. Open without
    // truncating so a running daemon's pid is not wiped before we hold
    // the lock.
    let lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&paths.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    let bus = EventBus::new();
    let clock = SystemClock;
    let ids = HexIdGen;

    // Replay both tables into the in-memory stores
    let (runs_table, run_records) = Table::open(&paths.runs_table)?;
    let runs = Arc::new(
        RunGraphStore::open(runs_table, run_records, bus.clone(), clock, ids)
            .with_safety_repoll(Duration::from_millis(config.await_safety_repoll_ms))
            .with_default_wait_timeout(config.await_default_timeout_ms),
    );

    let (processes_table, process_records) = Table::open(&paths.processes_table)?;
    let processes = Arc::new(ProcessStore::open(
        processes_table,
        process_records,
        bus.clone(),
        clock,
        ids,
        config.log_max_lines,
    ));

    info!(
        runs = runs.len(),
        processes = processes.len(),
        data_dir = %paths.data_dir.display(),
        "recovered state"
    );

    // Reconcile runs: anything non-terminal lost its worker with the old
    // process. `lost` stays reserved for process reconciliation.
    let interrupted = fail_interrupted_runs(&runs);
    if interrupted > 0 {
        warn!(interrupted, "failed runs interrupted by restart");
    }

    // Reconcile processes against actual OS pid liveness
    let manager = ProcessManager::new(Arc::clone(&processes));
    manager.reconcile();

    let lanes = LaneQueue::new(&config.lane_caps, Arc::clone(&runs));
    let supervisor = SessionSupervisor::new(lanes.clone(), clock, ids);

    let compaction = spawn_compaction(
        Arc::clone(&runs),
        Arc::clone(&processes),
        CompactionConfig {
            run_ttl_seconds: config.run_ttl_seconds,
            process_ttl_seconds: config.process_ttl_seconds,
            ..Default::default()
        },
    );

    // Primary session starts softly: failure is logged, never fatal
    if let Some(spec) = config.primary_session.clone() {
        match supervisor.start_session(spec, |ctx| async move {
            // The dialogue loop lives outside this workspace; the boot
            // session simply holds its registration until shutdown.
            ctx.cancel.cancelled().await;
        }) {
            Ok(id) => info!(session_id = %id, "primary session started"),
            Err(e) => warn!(error = %e, "primary session failed to start"),
        }
    }

    info!("daemon started");

    Ok(DaemonState {
        config,
        paths,
        lock_file,
        bus,
        runs,
        processes,
        lanes,
        manager,
        supervisor,
        compaction,
    })
}

impl DaemonState {
    /// Graceful shutdown: sessions, compaction, durable sync, lock
    /// removal.
    pub async fn shutdown(self) -> Result<(), LifecycleError> {
        info!("shutting down daemon");

        self.supervisor.shutdown().await;
        self.compaction.abort();

        self.runs.sync()?;
        self.processes.sync()?;

        if self.paths.lock_path.exists() {
            if let Err(e) = fs::remove_file(&self.paths.lock_path) {
                warn!("failed to remove pid file: {e}");
            }
        }

        info!("daemon shutdown complete");
        Ok(())
    }
}

/// Fail runs that were queued or running when the previous process died.
fn fail_interrupted_runs(runs: &DaemonRunStore) -> usize {
    let mut failed = 0;
    for record in runs.list() {
        if record.is_terminal() {
            continue;
        }
        match runs.fail(
            &record.id,
            serde_json::json!({ "crash": "interrupted by daemon restart" }),
        ) {
            Ok(()) => failed += 1,
            Err(e) => warn!(run_id = %record.id, error = %e, "interrupted run not failed"),
        }
    }
    failed
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
