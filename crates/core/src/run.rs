// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run records and their state machine.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

crate::define_id! {
    /// Unique identifier for a run.
    ///
    /// Each submitted unit of work gets an opaque 16-hex-digit ID used to
    /// track its state, link it to parents and children, and address its
    /// event-bus topic.
    #[derive(Default)]
    pub struct RunId;
}

/// Lifecycle status of a run.
///
/// Statuses are ordered: `queued < running < terminal`. Every terminal
/// status shares the same order, so no transition out of a terminal
/// status (including to itself) is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Admitted into a lane, not yet dispatched
    Queued,
    /// Executing on a lane worker
    Running,
    /// Finished with a result
    Completed,
    /// Finished with an error
    Error,
    /// Forcibly terminated
    Killed,
    /// Cancelled by the submitter
    Cancelled,
    /// Worker vanished without a terminal transition
    Lost,
    /// Synthesized for ids that resolve to no record
    Unknown,
}

impl RunStatus {
    /// Position in the monotonic state order.
    pub fn order(self) -> u8 {
        match self {
            RunStatus::Queued => 0,
            RunStatus::Running => 1,
            RunStatus::Completed
            | RunStatus::Error
            | RunStatus::Killed
            | RunStatus::Cancelled
            | RunStatus::Lost
            | RunStatus::Unknown => 2,
        }
    }

    /// Check if no forward transition is permitted from this status.
    pub fn is_terminal(self) -> bool {
        self.order() == 2
    }

    /// A transition is valid only if it strictly increases the state order.
    pub fn valid_transition(from: RunStatus, to: RunStatus) -> bool {
        to.order() > from.order()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "queued"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Error => write!(f, "error"),
            RunStatus::Killed => write!(f, "killed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
            RunStatus::Lost => write!(f, "lost"),
            RunStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Rejected state change; the record is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}

impl TransitionError {
    pub fn new(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Attributes for submitting a new run.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    /// Lane the run is admitted into
    pub lane: String,
    /// Run that spawned this one, if any
    pub parent: Option<RunId>,
    /// Opaque caller-defined payload
    pub payload: IndexMap<String, serde_json::Value>,
}

/// A run: one unit of work with a recorded lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub status: RunStatus,
    /// Lane the run was admitted into
    #[serde(default)]
    pub lane: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<RunId>,
    /// Child run ids, newest first
    #[serde(default)]
    pub children: Vec<RunId>,
    /// Opaque caller-defined payload
    #[serde(default)]
    pub payload: IndexMap<String, serde_json::Value>,
    /// Caller-defined result, set on `completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Caller-defined error, set on `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    /// Epoch seconds
    pub inserted_at: u64,
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

impl RunRecord {
    /// Create a queued record from submission attributes.
    pub fn new(id: RunId, spec: RunSpec, now: u64) -> Self {
        Self {
            id,
            status: RunStatus::Queued,
            lane: spec.lane,
            parent: spec.parent,
            children: Vec::new(),
            payload: spec.payload,
            result: None,
            error: None,
            inserted_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Synthesize a record for an id that resolves to nothing.
    ///
    /// `unknown` is terminal, so waiters treat absent ids as settled.
    pub fn unknown(id: RunId, now: u64) -> Self {
        Self {
            id,
            status: RunStatus::Unknown,
            lane: String::new(),
            parent: None,
            children: Vec::new(),
            payload: IndexMap::new(),
            result: None,
            error: None,
            inserted_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Stamp `updated_at`, keeping it non-decreasing.
    pub fn touch(&mut self, now: u64) {
        self.updated_at = self.updated_at.max(now);
    }

    /// Apply a monotonic status transition, stamping timestamps.
    pub fn transition(&mut self, to: RunStatus, now: u64) -> Result<(), TransitionError> {
        if !RunStatus::valid_transition(self.status, to) {
            return Err(TransitionError::new(self.status, to));
        }
        self.status = to;
        if to == RunStatus::Running {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        self.touch(now);
        Ok(())
    }

    /// Prepend a child id (newest first). Re-linking an existing child is
    /// a no-op.
    pub fn push_child(&mut self, child: &RunId) {
        if !self.children.contains(child) {
            self.children.insert(0, child.clone());
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
