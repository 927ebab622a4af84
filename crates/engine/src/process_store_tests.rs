// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use gaffer_core::process::DEFAULT_LOG_MAX_LINES;
use gaffer_core::{FakeClock, SequentialIdGen};
use std::path::Path;
use tempfile::tempdir;
use yare::parameterized;

fn open_store(
    dir: &Path,
    clock: FakeClock,
    log_max_lines: usize,
) -> ProcessStore<FakeClock, SequentialIdGen> {
    let (table, records) = Table::open(&dir.join("processes.jsonl")).unwrap();
    ProcessStore::open(
        table,
        records,
        EventBus::new(),
        clock,
        SequentialIdGen::new("proc"),
        log_max_lines,
    )
}

fn fresh(
    log_max_lines: usize,
) -> (tempfile::TempDir, ProcessStore<FakeClock, SequentialIdGen>, FakeClock) {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new(1_000);
    let store = open_store(dir.path(), clock.clone(), log_max_lines);
    (dir, store, clock)
}

fn spec(command: &str) -> ProcessSpec {
    ProcessSpec {
        command: command.to_string(),
        owner: "session-1".to_string(),
        ..Default::default()
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[test]
fn new_process_is_queued() {
    let (_dir, store, _) = fresh(10);
    let id = store.new_process(spec("sleep 1")).unwrap();

    let (record, logs) = store.get(&id).unwrap();
    assert_eq!(record.status, ProcessStatus::Queued);
    assert_eq!(record.command, "sleep 1");
    assert_eq!(record.owner, "session-1");
    assert!(logs.is_empty());
}

#[test]
fn mark_running_records_pid() {
    let (_dir, store, _) = fresh(10);
    let id = store.new_process(spec("sleep 1")).unwrap();

    store.mark_running(&id, 4242).unwrap();
    let (record, _) = store.get(&id).unwrap();
    assert_eq!(record.status, ProcessStatus::Running);
    assert_eq!(record.os_pid, Some(4242));
    assert!(record.started_at.is_some());
}

#[test]
fn terminal_marks_are_monotonic() {
    let (_dir, store, _) = fresh(10);
    let id = store.new_process(spec("true")).unwrap();
    store.mark_running(&id, 1).unwrap();
    store.mark_completed(&id, 0).unwrap();

    assert!(matches!(
        store.mark_killed(&id),
        Err(StoreError::InvalidTransition(_))
    ));
    let (record, _) = store.get(&id).unwrap();
    assert_eq!(record.status, ProcessStatus::Completed);
    assert_eq!(record.exit_code, Some(0));
    assert!(record.completed_at.is_some());
}

#[parameterized(
    completed = { ProcessStatus::Completed },
    error = { ProcessStatus::Error },
    killed = { ProcessStatus::Killed },
    lost = { ProcessStatus::Lost },
)]
fn every_terminal_status_blocks_further_marks(terminal: ProcessStatus) {
    let (_dir, store, _) = fresh(10);
    let id = store.new_process(spec("x")).unwrap();
    store.mark_running(&id, 1).unwrap();

    match terminal {
        ProcessStatus::Completed => store.mark_completed(&id, 0).unwrap(),
        ProcessStatus::Error => store.mark_error(&id, "boom").unwrap(),
        ProcessStatus::Killed => store.mark_killed(&id).unwrap(),
        ProcessStatus::Lost => store.mark_lost(&id).unwrap(),
        ProcessStatus::Queued | ProcessStatus::Running => unreachable!(),
    }

    assert!(matches!(
        store.mark_running(&id, 2),
        Err(StoreError::InvalidTransition(_))
    ));
    let (record, _) = store.get(&id).unwrap();
    assert_eq!(record.status, terminal);
}

#[test]
fn mark_error_records_reason() {
    let (_dir, store, _) = fresh(10);
    let id = store.new_process(spec("nope")).unwrap();
    store.mark_error(&id, "spawn failed: no such file").unwrap();

    let (record, _) = store.get(&id).unwrap();
    assert_eq!(record.status, ProcessStatus::Error);
    assert_eq!(
        record.error.as_deref(),
        Some("spawn failed: no such file")
    );
}

#[test]
fn missing_ids_are_not_found() {
    let (_dir, store, _) = fresh(10);
    let ghost = ProcessId::new("ghost");
    assert!(store.get(&ghost).is_none());
    assert!(matches!(
        store.mark_running(&ghost, 1),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.append_log(&ghost, "line"),
        Err(StoreError::NotFound(_))
    ));
}

// ── Logs ─────────────────────────────────────────────────────────────────────

#[test]
fn log_bound_holds_at_default_cap() {
    // S6: 1500 appends through a 1000-line buffer
    let (_dir, store, _) = fresh(DEFAULT_LOG_MAX_LINES);
    let id = store.new_process(spec("chatty")).unwrap();
    store.mark_running(&id, 1).unwrap();

    for i in 1..=1500 {
        store.append_log(&id, format!("L{i}")).unwrap();
    }

    let logs = store.get_logs(&id, 2000).unwrap();
    assert_eq!(logs.len(), 1000);
    assert_eq!(logs.first().map(String::as_str), Some("L501"));
    assert_eq!(logs.last().map(String::as_str), Some("L1500"));
}

#[test]
fn get_logs_returns_newest_n_chronologically() {
    let (_dir, store, _) = fresh(10);
    let id = store.new_process(spec("chatty")).unwrap();
    store.mark_running(&id, 1).unwrap();
    for i in 1..=5 {
        store.append_log(&id, format!("L{i}")).unwrap();
    }

    assert_eq!(store.get_logs(&id, 2).unwrap(), vec!["L4", "L5"]);
    let (_, all) = store.get(&id).unwrap();
    assert_eq!(all, vec!["L1", "L2", "L3", "L4", "L5"]);
}

// ── Listing ──────────────────────────────────────────────────────────────────

#[test]
fn list_filters_by_status() {
    let (_dir, store, clock) = fresh(10);
    let running = store.new_process(spec("a")).unwrap();
    store.mark_running(&running, 1).unwrap();
    clock.advance(1);
    let queued = store.new_process(spec("b")).unwrap();

    let all = store.list(None);
    assert_eq!(all.len(), 2);
    // Oldest first
    assert_eq!(all[0].id, running);
    assert_eq!(all[1].id, queued);

    let only_running = store.list(Some(ProcessStatus::Running));
    assert_eq!(only_running.len(), 1);
    assert_eq!(only_running[0].id, running);
}

// ── Durability & cleanup ─────────────────────────────────────────────────────

#[test]
fn reopen_reconstructs_index_and_logs() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new(1_000);

    let id = {
        let store = open_store(dir.path(), clock.clone(), 10);
        let id = store.new_process(spec("echo hi")).unwrap();
        store.mark_running(&id, 7).unwrap();
        store.append_log(&id, "hi").unwrap();
        store.mark_completed(&id, 0).unwrap();
        store.sync().unwrap();
        id
    };

    let store = open_store(dir.path(), clock, 10);
    let (record, logs) = store.get(&id).unwrap();
    assert_eq!(record.status, ProcessStatus::Completed);
    assert_eq!(record.os_pid, Some(7));
    assert_eq!(logs, vec!["hi"]);
}

#[test]
fn reopen_recaps_log_buffers() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new(1_000);

    let id = {
        let store = open_store(dir.path(), clock.clone(), 100);
        let id = store.new_process(spec("chatty")).unwrap();
        store.mark_running(&id, 1).unwrap();
        for i in 1..=50 {
            store.append_log(&id, format!("L{i}")).unwrap();
        }
        store.sync().unwrap();
        id
    };

    // Reopened with a smaller cap: oldest lines are discarded
    let store = open_store(dir.path(), clock, 10);
    let (_, logs) = store.get(&id).unwrap();
    assert_eq!(logs.len(), 10);
    assert_eq!(logs.first().map(String::as_str), Some("L41"));
}

#[test]
fn delete_is_idempotent() {
    let (_dir, store, _) = fresh(10);
    let id = store.new_process(spec("x")).unwrap();
    store.delete(&id).unwrap();
    assert!(store.get(&id).is_none());
    store.delete(&id).unwrap();
}

#[test]
fn cleanup_prunes_expired_terminal_processes() {
    let (_dir, store, clock) = fresh(10);

    let old = store.new_process(spec("old")).unwrap();
    store.mark_running(&old, 1).unwrap();
    store.mark_completed(&old, 0).unwrap();

    let still_running = store.new_process(spec("live")).unwrap();
    store.mark_running(&still_running, 2).unwrap();

    clock.advance(200);
    assert_eq!(store.cleanup(100).unwrap(), 1);
    assert!(store.get(&old).is_none());
    assert!(store.get(&still_running).is_some());
}
