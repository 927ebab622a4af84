// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background process supervision and rolling logs.

use crate::prelude::*;
use gaffer_core::process::{ProcessSpec, ProcessStatus};
use tempfile::tempdir;

fn shell(command: &str) -> ProcessSpec {
    ProcessSpec {
        command: command.to_string(),
        owner: "spec".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn spawned_process_streams_logs_and_completes() {
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let id = state.manager.spawn(shell("echo one; echo two")).unwrap();

    let processes = state.processes.clone();
    let probe = id.clone();
    wait_until(move || {
        processes
            .get(&probe)
            .is_some_and(|(r, _)| r.status == ProcessStatus::Completed)
    })
    .await;

    let (record, logs) = state.processes.get(&id).unwrap();
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(logs, vec!["one", "two"]);

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn log_buffer_is_bounded() {
    // S6 driven through a real subprocess, with a small cap for speed
    let dir = tempdir().unwrap();
    let state = boot_with(dir.path(), |config| {
        config.log_max_lines = 100;
    })
    .await;

    let id = state
        .manager
        .spawn(shell("i=1; while [ $i -le 150 ]; do echo L$i; i=$((i+1)); done"))
        .unwrap();

    let processes = state.processes.clone();
    let probe = id.clone();
    wait_until(move || {
        processes
            .get(&probe)
            .is_some_and(|(r, _)| r.status == ProcessStatus::Completed)
    })
    .await;

    let logs = state.manager.logs(&id, 2_000).unwrap();
    assert_eq!(logs.len(), 100);
    assert_eq!(logs.first().map(String::as_str), Some("L51"));
    assert_eq!(logs.last().map(String::as_str), Some("L150"));

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn kill_terminates_and_marks_killed() {
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let id = state.manager.spawn(shell("sleep 30")).unwrap();
    let processes = state.processes.clone();
    let probe = id.clone();
    wait_until(move || {
        processes
            .get(&probe)
            .is_some_and(|(r, _)| r.status == ProcessStatus::Running)
    })
    .await;

    state.manager.kill(&id).unwrap();
    let processes = state.processes.clone();
    let probe = id.clone();
    wait_until(move || {
        processes
            .get(&probe)
            .is_some_and(|(r, _)| r.status == ProcessStatus::Killed)
    })
    .await;

    state.shutdown().await.unwrap();
}
