// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The unit-of-work trait executed by lane workers.

use async_trait::async_trait;
use gaffer_core::RunId;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure reported by a task's `run`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    /// Optional caller-defined detail carried into the run's error field
    pub detail: Option<Value>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(message: impl Into<String>, detail: Value) -> Self {
        Self {
            message: message.into(),
            detail: Some(detail),
        }
    }

    /// Structured error value stored on the failed run.
    pub fn to_value(&self) -> Value {
        match &self.detail {
            Some(detail) => json!({ "message": self.message, "detail": detail }),
            None => json!({ "message": self.message }),
        }
    }
}

/// Progress-emission callback handed to running tasks.
pub type ProgressFn = Arc<dyn Fn(Value) + Send + Sync>;

/// Execution context for a task's `run` and `cancel` hooks.
#[derive(Clone)]
pub struct TaskCtx {
    pub run_id: RunId,
    /// Cooperative cancellation signal; tasks observe it at their
    /// suspension points
    pub cancel: CancellationToken,
    progress: ProgressFn,
}

impl TaskCtx {
    pub fn new(run_id: RunId, cancel: CancellationToken, progress: ProgressFn) -> Self {
        Self {
            run_id,
            cancel,
            progress,
        }
    }

    /// True once a cancel has been requested for this run.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record a progress value onto the run, waking any waiters.
    pub fn emit_progress(&self, value: Value) {
        (self.progress)(value);
    }
}

/// An opaque unit of work dispatched onto a lane worker.
#[async_trait]
pub trait Task: Send + Sync {
    /// Short description used in traces.
    fn describe(&self) -> &str {
        "task"
    }

    /// Execute the task. Implementations observe `ctx.cancel` at their
    /// suspension points; the worker owns the terminal transition.
    async fn run(&self, ctx: &TaskCtx) -> Result<Value, TaskError>;

    /// Cooperative cancellation hook, invoked in addition to the token.
    async fn cancel(&self, _ctx: &TaskCtx) {}
}
