// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lane capacity, fairness, and cancellation.

use crate::prelude::*;
use gaffer_core::run::RunStatus;
use gaffer_engine::{SubmitOpts, WaitMode, WaitTimeout};
use indexmap::IndexMap;
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn capacity_bounds_concurrency() {
    // S1: cap 2, three blocked tasks
    let dir = tempdir().unwrap();
    let state = boot_with(dir.path(), |config| {
        config.lane_caps = IndexMap::from([("main".to_string(), 2)]);
    })
    .await;

    let (gate1, t1) = GatedTask::new();
    let (_gate2, t2) = GatedTask::new();
    let (_gate3, t3) = GatedTask::new();
    let r1 = state.lanes.submit("main", t1, SubmitOpts::default()).unwrap();
    let r2 = state.lanes.submit("main", t2, SubmitOpts::default()).unwrap();
    let r3 = state.lanes.submit("main", t3, SubmitOpts::default()).unwrap();

    let runs = Arc::clone(&state.runs);
    wait_until(|| {
        runs.get(&r1).unwrap().status == RunStatus::Running
            && runs.get(&r2).unwrap().status == RunStatus::Running
    })
    .await;
    assert_eq!(runs.get(&r3).unwrap().status, RunStatus::Queued);

    gate1.notify_one();
    wait_until(|| {
        runs.get(&r1).unwrap().status == RunStatus::Completed
            && runs.get(&r3).unwrap().status == RunStatus::Running
    })
    .await;

    let stats = state.lanes.stats();
    assert_eq!(stats["main"].capacity, 2);
    assert_eq!(stats["main"].queued, 0);

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_lane_is_rejected_without_a_run() {
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let before = state.runs.len();
    let (_gate, task) = GatedTask::new();
    assert!(state.lanes.submit("warp", task, SubmitOpts::default()).is_err());
    assert_eq!(state.runs.len(), before);

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn default_lanes_are_declared() {
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let stats = state.lanes.stats();
    assert_eq!(stats["main"].capacity, 4);
    assert_eq!(stats["subagent"].capacity, 8);
    assert_eq!(stats["background_exec"].capacity, 2);

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn identical_work_submitted_n_times_runs_n_times() {
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            state
                .lanes
                .submit(
                    "subagent",
                    Arc::new(InstantTask(json!("same"))),
                    SubmitOpts::default(),
                )
                .unwrap(),
        );
    }

    let summary = state
        .runs
        .wait(&ids, WaitMode::All, WaitTimeout::Millis(5_000))
        .await;
    assert!(!summary.timed_out);
    for id in &ids {
        assert_eq!(state.runs.get(id).unwrap().result, Some(json!("same")));
    }

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelled_queued_work_never_runs() {
    let dir = tempdir().unwrap();
    let state = boot_with(dir.path(), |config| {
        config.lane_caps = IndexMap::from([("main".to_string(), 1)]);
    })
    .await;

    let (_gate1, blocker) = GatedTask::new();
    let (_gate2, queued_task) = GatedTask::new();
    let running = state
        .lanes
        .submit("main", blocker, SubmitOpts::default())
        .unwrap();
    let queued = state
        .lanes
        .submit("main", queued_task, SubmitOpts::default())
        .unwrap();

    let runs = Arc::clone(&state.runs);
    wait_until(|| runs.get(&running).unwrap().status == RunStatus::Running).await;

    state.lanes.cancel(&queued).unwrap();
    assert_eq!(state.runs.get(&queued).unwrap().status, RunStatus::Cancelled);

    state.lanes.cancel(&running).unwrap();
    let summary = state
        .runs
        .wait(&[running], WaitMode::All, WaitTimeout::Millis(2_000))
        .await;
    assert!(!summary.timed_out);

    state.shutdown().await.unwrap();
}
