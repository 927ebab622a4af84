// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background-process records and the rolling log buffer.

use crate::run::TransitionError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for a managed background process.
    #[derive(Default)]
    pub struct ProcessId;
}

/// Default cap on a process's rolling log buffer.
pub const DEFAULT_LOG_MAX_LINES: usize = 1000;

/// Lifecycle status of a background process.
///
/// Same monotonic order as run statuses: `queued < running < terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Queued,
    Running,
    Completed,
    Error,
    Killed,
    /// OS pid no longer existed at reconciliation
    Lost,
}

impl ProcessStatus {
    /// Position in the monotonic state order.
    pub fn order(self) -> u8 {
        match self {
            ProcessStatus::Queued => 0,
            ProcessStatus::Running => 1,
            ProcessStatus::Completed
            | ProcessStatus::Error
            | ProcessStatus::Killed
            | ProcessStatus::Lost => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.order() == 2
    }

    /// A transition is valid only if it strictly increases the state order.
    pub fn valid_transition(from: ProcessStatus, to: ProcessStatus) -> bool {
        to.order() > from.order()
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Queued => write!(f, "queued"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Completed => write!(f, "completed"),
            ProcessStatus::Error => write!(f, "error"),
            ProcessStatus::Killed => write!(f, "killed"),
            ProcessStatus::Lost => write!(f, "lost"),
        }
    }
}

/// Bounded rolling log buffer.
///
/// Lines are held newest-first; overflow discards the oldest line.
/// Readers always receive chronological (oldest-first) output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    max_lines: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_MAX_LINES)
    }
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max_lines,
        }
    }

    /// Append a line, dropping the oldest if the buffer is full.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_front(line.into());
        self.lines.truncate(self.max_lines);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Re-cap the buffer, discarding oldest lines beyond the new limit.
    pub fn set_max_lines(&mut self, max_lines: usize) {
        self.max_lines = max_lines;
        self.lines.truncate(max_lines);
    }

    /// All retained lines, oldest first.
    pub fn chronological(&self) -> Vec<String> {
        self.lines.iter().rev().cloned().collect()
    }

    /// Newest `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let mut lines: Vec<String> = self.lines.iter().take(n).cloned().collect();
        lines.reverse();
        lines
    }
}

/// Attributes for spawning a new background process.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    /// Shell command line
    pub command: String,
    /// Working directory (empty means inherit)
    pub cwd: PathBuf,
    pub env: IndexMap<String, String>,
    /// Opaque owner tag (e.g. the session that requested the spawn)
    pub owner: String,
}

/// A managed background process with durable metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub status: ProcessStatus,
    pub command: String,
    pub cwd: PathBuf,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub owner: String,
    /// OS pid once running; survives restart for reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Epoch seconds
    pub inserted_at: u64,
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default)]
    pub logs: LogBuffer,
}

impl ProcessRecord {
    /// Create a queued record from spawn attributes.
    pub fn new(id: ProcessId, spec: ProcessSpec, now: u64, log_max_lines: usize) -> Self {
        Self {
            id,
            status: ProcessStatus::Queued,
            command: spec.command,
            cwd: spec.cwd,
            env: spec.env,
            owner: spec.owner,
            os_pid: None,
            exit_code: None,
            error: None,
            inserted_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            logs: LogBuffer::new(log_max_lines),
        }
    }

    /// Stamp `updated_at`, keeping it non-decreasing.
    pub fn touch(&mut self, now: u64) {
        self.updated_at = self.updated_at.max(now);
    }

    /// Apply a monotonic status transition, stamping timestamps.
    pub fn transition(&mut self, to: ProcessStatus, now: u64) -> Result<(), TransitionError> {
        if !ProcessStatus::valid_transition(self.status, to) {
            return Err(TransitionError::new(self.status, to));
        }
        self.status = to;
        if to == ProcessStatus::Running {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        self.touch(now);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
