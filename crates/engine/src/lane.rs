// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lane queue: admission-controlled dispatch across bounded lanes.
//!
//! Each lane holds a strict-FIFO queue and a running set capped at the
//! lane's capacity; lanes are independent of each other. A supervising
//! wrapper task owns every worker's terminal transition and releases the
//! slot on all exit paths, panics included. Slot accounting stays
//! correct even if a run-store publish is lost.

use crate::error::LaneError;
use crate::run_graph::RunGraphStore;
use crate::task::{ProgressFn, Task, TaskCtx};
use gaffer_core::run::{RunSpec, RunStatus};
use gaffer_core::{Clock, IdGen, RunId};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Options for submitting work to a lane.
#[derive(Debug, Clone, Default)]
pub struct SubmitOpts {
    /// Run to link the new run under
    pub parent: Option<RunId>,
    /// Opaque caller-defined payload stored on the run
    pub payload: IndexMap<String, Value>,
}

/// Point-in-time occupancy of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneStats {
    pub queued: usize,
    pub running: usize,
    pub capacity: usize,
}

struct Pending {
    run_id: RunId,
    task: Arc<dyn Task>,
    cancel: CancellationToken,
}

struct RunningEntry {
    task: Arc<dyn Task>,
    cancel: CancellationToken,
}

struct Lane {
    capacity: usize,
    queue: VecDeque<Pending>,
    running: HashMap<RunId, RunningEntry>,
}

/// Multi-class admission control and dispatch.
///
/// Cheap to clone; clones share the lanes and the run store.
#[derive(Clone)]
pub struct LaneQueue<C: Clock, G: IdGen> {
    runs: Arc<RunGraphStore<C, G>>,
    lanes: Arc<Mutex<IndexMap<String, Lane>>>,
}

impl<C: Clock, G: IdGen + 'static> LaneQueue<C, G> {
    /// Create a queue with the given lane capacities.
    pub fn new(lane_caps: &IndexMap<String, usize>, runs: Arc<RunGraphStore<C, G>>) -> Self {
        let lanes = lane_caps
            .iter()
            .map(|(name, cap)| {
                (
                    name.clone(),
                    Lane {
                        capacity: *cap,
                        queue: VecDeque::new(),
                        running: HashMap::new(),
                    },
                )
            })
            .collect();
        Self {
            runs,
            lanes: Arc::new(Mutex::new(lanes)),
        }
    }

    pub fn runs(&self) -> &Arc<RunGraphStore<C, G>> {
        &self.runs
    }

    /// Admit a task into `lane`, returning the queued run's id.
    ///
    /// The run is created `queued` immediately; dispatch happens when a
    /// slot frees. Submitting to an undeclared lane fails.
    pub fn submit(
        &self,
        lane: &str,
        task: Arc<dyn Task>,
        opts: SubmitOpts,
    ) -> Result<RunId, LaneError> {
        if !self.lanes.lock().contains_key(lane) {
            return Err(LaneError::UnknownLane(lane.to_string()));
        }

        let parent = opts.parent.clone();
        let run_id = self.runs.new_run(RunSpec {
            lane: lane.to_string(),
            parent: opts.parent,
            payload: opts.payload,
        })?;
        if let Some(parent) = parent {
            self.runs.add_child(&parent, &run_id)?;
        }
        debug!(run_id = %run_id, lane, task = task.describe(), "run queued");

        {
            let mut lanes = self.lanes.lock();
            if let Some(state) = lanes.get_mut(lane) {
                state.queue.push_back(Pending {
                    run_id: run_id.clone(),
                    task,
                    cancel: CancellationToken::new(),
                });
            }
        }
        self.pump(lane);
        Ok(run_id)
    }

    /// Cancel a run.
    ///
    /// Still queued: removed from its lane and marked `cancelled` now.
    /// Running: the worker's token is cancelled and the task's `cancel`
    /// hook invoked; the run is marked `cancelled` once the worker
    /// yields. Anything else is `not_running`.
    pub fn cancel(&self, run_id: &RunId) -> Result<(), LaneError> {
        let was_queued = {
            let mut lanes = self.lanes.lock();
            lanes.values_mut().any(|state| {
                match state.queue.iter().position(|p| &p.run_id == run_id) {
                    Some(pos) => {
                        state.queue.remove(pos);
                        true
                    }
                    None => false,
                }
            })
        };
        if was_queued {
            if let Err(e) = self.runs.transition(run_id, RunStatus::Cancelled) {
                warn!(run_id = %run_id, error = %e, "queued run not marked cancelled");
            }
            debug!(run_id = %run_id, "queued run cancelled");
            return Ok(());
        }

        let running = {
            let lanes = self.lanes.lock();
            lanes.values().find_map(|state| {
                state
                    .running
                    .get(run_id)
                    .map(|entry| (Arc::clone(&entry.task), entry.cancel.clone()))
            })
        };
        match running {
            Some((task, cancel)) => {
                cancel.cancel();
                let ctx = TaskCtx::new(run_id.clone(), cancel, noop_progress());
                tokio::spawn(async move {
                    task.cancel(&ctx).await;
                });
                debug!(run_id = %run_id, "running task signalled to cancel");
                Ok(())
            }
            None => Err(LaneError::NotRunning(run_id.to_string())),
        }
    }

    /// Per-lane occupancy.
    pub fn stats(&self) -> IndexMap<String, LaneStats> {
        self.lanes
            .lock()
            .iter()
            .map(|(name, state)| {
                (
                    name.clone(),
                    LaneStats {
                        queued: state.queue.len(),
                        running: state.running.len(),
                        capacity: state.capacity,
                    },
                )
            })
            .collect()
    }

    /// Fill free slots: dequeue FIFO while under capacity, then start a
    /// worker per dispatched entry.
    fn pump(&self, lane: &str) {
        let mut dispatched = Vec::new();
        {
            let mut lanes = self.lanes.lock();
            let Some(state) = lanes.get_mut(lane) else {
                return;
            };
            while state.running.len() < state.capacity {
                let Some(pending) = state.queue.pop_front() else {
                    break;
                };
                state.running.insert(
                    pending.run_id.clone(),
                    RunningEntry {
                        task: Arc::clone(&pending.task),
                        cancel: pending.cancel.clone(),
                    },
                );
                dispatched.push(pending);
            }
        }
        for pending in dispatched {
            self.spawn_worker(lane.to_string(), pending);
        }
    }

    /// Remove a finished run from the running set and refill the lane.
    fn release(&self, lane: &str, run_id: &RunId) {
        {
            let mut lanes = self.lanes.lock();
            if let Some(state) = lanes.get_mut(lane) {
                state.running.remove(run_id);
            }
        }
        self.pump(lane);
    }

    fn spawn_worker(&self, lane: String, pending: Pending) {
        let queue = self.clone();
        tokio::spawn(async move {
            let Pending {
                run_id,
                task,
                cancel,
            } = pending;

            if let Err(e) = queue.runs.mark_running(&run_id) {
                // Lost a race with cancel or delete; give the slot back.
                debug!(run_id = %run_id, error = %e, "run not dispatched");
                queue.release(&lane, &run_id);
                return;
            }

            let ctx = TaskCtx::new(
                run_id.clone(),
                cancel.clone(),
                record_progress(Arc::clone(&queue.runs), run_id.clone()),
            );

            // Inner spawn so a panicking task surfaces as a JoinError
            // instead of unwinding through the supervisor.
            let worker = {
                let task = Arc::clone(&task);
                let ctx = ctx.clone();
                tokio::spawn(async move { task.run(&ctx).await })
            };
            let outcome = worker.await;

            let transition = if cancel.is_cancelled() {
                queue.runs.transition(&run_id, RunStatus::Cancelled)
            } else {
                match outcome {
                    Ok(Ok(result)) => queue.runs.finish(&run_id, result),
                    Ok(Err(task_err)) => queue.runs.fail(&run_id, task_err.to_value()),
                    Err(join_err) => {
                        let message = if join_err.is_panic() {
                            panic_message(join_err.into_panic())
                        } else {
                            "worker aborted".to_string()
                        };
                        warn!(run_id = %run_id, lane = %lane, message = %message, "worker crashed");
                        queue.runs.fail(&run_id, json!({ "crash": message }))
                    }
                }
            };
            if let Err(e) = transition {
                // The run already reached a terminal status elsewhere;
                // slot accounting is still ours to finish.
                debug!(run_id = %run_id, error = %e, "terminal transition skipped");
            }

            queue.release(&lane, &run_id);
        });
    }
}

fn noop_progress() -> ProgressFn {
    Arc::new(|_| {})
}

/// Progress callback that records the value into the run's payload,
/// which also wakes waiters on the run's topic.
fn record_progress<C: Clock + 'static, G: IdGen + 'static>(
    runs: Arc<RunGraphStore<C, G>>,
    id: RunId,
) -> ProgressFn {
    Arc::new(move |value| {
        if let Err(e) = runs.update(&id, |record| {
            record.payload.insert("progress".to_string(), value);
        }) {
            debug!(run_id = %id, error = %e, "progress dropped");
        }
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "worker panicked".to_string(),
        },
    }
}

#[cfg(test)]
#[path = "lane_tests.rs"]
mod tests;
