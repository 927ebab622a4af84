// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error types.
//!
//! Operational errors are returned to the caller and never raised as
//! fatal; infrastructural failures (backing-store IO) surface here too,
//! after the in-memory mutation has already applied.

use gaffer_core::run::TransitionError;
use gaffer_storage::TableError;
use thiserror::Error;

/// Errors returned by the run graph and process stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Id absent from the store
    #[error("not found: {0}")]
    NotFound(String),

    /// Attempted backward state change; the record is unchanged
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Backing store failed; the in-memory mutation stays applied
    #[error("backing store error: {0}")]
    Io(#[from] TableError),
}

/// Errors returned by the lane queue.
#[derive(Debug, Error)]
pub enum LaneError {
    /// Submission to an undeclared lane
    #[error("unknown lane: {0}")]
    UnknownLane(String),

    /// Cancel target is neither queued nor running
    #[error("run {0} is not queued or running")]
    NotRunning(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned by the process manager.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Id absent, or the record carries no OS pid yet
    #[error("process not found: {0}")]
    NotFound(String),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("signal delivery failed: {0}")]
    Signal(nix::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}
