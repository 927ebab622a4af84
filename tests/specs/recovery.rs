// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash-restart recovery: replay, reconciliation, and TTL compaction.

use crate::prelude::*;
use gaffer_core::process::{ProcessRecord, ProcessSpec, ProcessStatus};
use gaffer_core::run::{RunSpec, RunStatus};
use gaffer_core::ProcessId;
use serde_json::json;
use tempfile::tempdir;

#[tokio::test]
async fn terminal_state_survives_restart_exactly() {
    let dir = tempdir().unwrap();

    let (done, failed) = {
        let state = boot(dir.path()).await;
        let done = state.runs.new_run(RunSpec::default()).unwrap();
        state.runs.mark_running(&done).unwrap();
        state.runs.finish(&done, json!({"answer": 42})).unwrap();

        let failed = state.runs.new_run(RunSpec::default()).unwrap();
        state.runs.fail(&failed, json!("nope")).unwrap();

        let snapshot = (
            state.runs.get(&done).unwrap(),
            state.runs.get(&failed).unwrap(),
        );
        state.shutdown().await.unwrap();
        snapshot
    };

    let state = boot(dir.path()).await;
    assert_eq!(state.runs.get(&done.id), Some(done));
    assert_eq!(state.runs.get(&failed.id), Some(failed));
    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn dead_pid_reconciles_to_lost() {
    // S5
    let dir = tempdir().unwrap();

    {
        let state = boot(dir.path()).await;
        let mut record = ProcessRecord::new(
            ProcessId::new("survivor"),
            ProcessSpec {
                command: "sleep 999".to_string(),
                ..Default::default()
            },
            100,
            1000,
        );
        record.transition(ProcessStatus::Running, 101).unwrap();
        record.os_pid = Some(99_999_999);
        state.processes.insert_record(record).unwrap();
        state.shutdown().await.unwrap();
    }

    let state = boot(dir.path()).await;
    let (record, _) = state.processes.get(&ProcessId::new("survivor")).unwrap();
    assert_eq!(record.status, ProcessStatus::Lost);
    assert!(record.completed_at.is_some());
    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn ttl_cleanup_spares_the_recent_and_the_live() {
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let finished = state.runs.new_run(RunSpec::default()).unwrap();
    state.runs.mark_running(&finished).unwrap();
    state.runs.finish(&finished, json!(null)).unwrap();
    let queued = state.runs.new_run(RunSpec::default()).unwrap();

    // Nothing is old enough for the default day-long TTL
    assert_eq!(state.runs.cleanup(86_400).unwrap(), 0);

    // Let the terminal record age past a zero TTL (second-precision
    // timestamps), then prune: the queued run is never collected
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    assert_eq!(state.runs.cleanup(0).unwrap(), 1);
    assert!(state.runs.get(&finished).is_none());
    assert!(state.runs.get(&queued).is_some());

    state.shutdown().await.unwrap();
}
