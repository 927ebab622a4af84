// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run graph lifecycle, linking, and waiting.

use crate::prelude::*;
use gaffer_core::run::{RunSpec, RunStatus};
use gaffer_engine::{StoreError, WaitMode, WaitTimeout};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn monotonic_transitions_stick() {
    // S2
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let id = state.runs.new_run(RunSpec::default()).unwrap();
    state.runs.mark_running(&id).unwrap();
    state.runs.fail(&id, json!("x")).unwrap();

    assert!(matches!(
        state.runs.mark_running(&id),
        Err(StoreError::InvalidTransition(_))
    ));
    assert_eq!(state.runs.get(&id).unwrap().status, RunStatus::Error);

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn parent_child_linking_is_symmetric() {
    // S3
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let parent = state.runs.new_run(RunSpec::default()).unwrap();
    let child = state.runs.new_run(RunSpec::default()).unwrap();
    state.runs.add_child(&parent, &child).unwrap();

    assert_eq!(state.runs.get(&parent).unwrap().children, vec![child.clone()]);
    assert_eq!(state.runs.get(&child).unwrap().parent, Some(parent));

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn wait_all_timeout_carries_final_snapshot() {
    // S4
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let a = state.runs.new_run(RunSpec::default()).unwrap();
    let b = state.runs.new_run(RunSpec::default()).unwrap();
    state.runs.mark_running(&a).unwrap();
    state.runs.finish(&a, json!(1)).unwrap();

    let summary = state
        .runs
        .wait(&[a.clone(), b.clone()], WaitMode::All, WaitTimeout::Millis(100))
        .await;
    assert!(summary.timed_out);
    assert_eq!(summary.status_of(&a), Some(RunStatus::Completed));
    assert_eq!(summary.status_of(&b), Some(RunStatus::Queued));

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn wait_all_infinite_returns_once_everything_settles() {
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let a = state.runs.new_run(RunSpec::default()).unwrap();
    let b = state.runs.new_run(RunSpec::default()).unwrap();

    let waiter = {
        let runs = Arc::clone(&state.runs);
        let (a, b) = (a.clone(), b.clone());
        tokio::spawn(async move { runs.wait(&[a, b], WaitMode::All, WaitTimeout::Infinite).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    state.runs.mark_running(&a).unwrap();
    state.runs.finish(&a, json!(null)).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    state.runs.transition(&b, RunStatus::Cancelled).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(!summary.timed_out);
    assert_eq!(summary.status_of(&b), Some(RunStatus::Cancelled));

    state.shutdown().await.unwrap();
}

#[tokio::test]
async fn deleting_a_run_settles_its_waiters() {
    let dir = tempdir().unwrap();
    let state = boot(dir.path()).await;

    let id = state.runs.new_run(RunSpec::default()).unwrap();
    let waiter = {
        let runs = Arc::clone(&state.runs);
        let id = id.clone();
        tokio::spawn(async move { runs.wait(&[id], WaitMode::All, WaitTimeout::Infinite).await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    state.runs.delete_run(&id).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap();
    // The id now resolves to a synthesized unknown record, which is terminal
    assert_eq!(summary.status_of(&id), Some(RunStatus::Unknown));

    state.shutdown().await.unwrap();
}
