// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run graph store: every unit of work and its lifecycle.
//!
//! Reads snapshot the in-memory index through an `RwLock` read guard and
//! never serialize with each other. All mutations funnel through a
//! single serializing mutex that owns the durable table handle, giving
//! linearizable writes per record. Every successful mutation publishes
//! on the run's topic after the in-memory update is visible and before
//! the serializer accepts the next request.

use crate::bus::{run_topic, BusMessage, EventBus};
use crate::error::StoreError;
use gaffer_core::run::{RunRecord, RunSpec, RunStatus, TransitionError};
use gaffer_core::{Clock, IdGen, RunId};
use gaffer_storage::{Table, TableError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Ceiling on how long a waiter sleeps between re-reads of the index.
/// Converts a lost notification into at most this much extra latency.
pub const DEFAULT_SAFETY_REPOLL: Duration = Duration::from_millis(5_000);

/// Fallback applied to invalid caller-supplied wait timeouts.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

/// Aggregate-wait mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Every awaited id must be terminal
    All,
    /// At least one awaited id must be terminal
    Any,
}

/// Deadline for [`RunGraphStore::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    Millis(u64),
    Infinite,
}

impl WaitTimeout {
    /// Interpret a possibly-invalid caller-supplied timeout: negative
    /// input falls back to the 30 s default.
    pub fn from_millis_lossy(ms: i64) -> Self {
        if ms < 0 {
            WaitTimeout::Millis(DEFAULT_WAIT_TIMEOUT_MS)
        } else {
            WaitTimeout::Millis(ms as u64)
        }
    }
}

impl From<Option<u64>> for WaitTimeout {
    /// `None` (absent/null) means wait forever.
    fn from(ms: Option<u64>) -> Self {
        match ms {
            Some(ms) => WaitTimeout::Millis(ms),
            None => WaitTimeout::Infinite,
        }
    }
}

/// Final snapshot returned by [`RunGraphStore::wait`].
#[derive(Debug, Clone)]
pub struct WaitSummary {
    /// One record per awaited id, in request order. Absent ids are
    /// synthesized with status `unknown`.
    pub runs: Vec<RunRecord>,
    /// True when the deadline elapsed before the predicate held
    pub timed_out: bool,
}

impl WaitSummary {
    /// Status of one awaited id in this snapshot.
    pub fn status_of(&self, id: &RunId) -> Option<RunStatus> {
        self.runs.iter().find(|r| &r.id == id).map(|r| r.status)
    }
}

/// The serialized write half: owns the durable table.
struct WriteHalf {
    table: Table,
}

/// In-memory run index mirrored to a durable table.
pub struct RunGraphStore<C: Clock, G: IdGen> {
    index: RwLock<HashMap<RunId, RunRecord>>,
    serializer: Mutex<WriteHalf>,
    bus: EventBus,
    clock: C,
    ids: G,
    safety_repoll: Duration,
    default_wait_timeout_ms: u64,
}

impl<C: Clock, G: IdGen> RunGraphStore<C, G> {
    /// Open the store over a durable table, adopting its replayed records.
    pub fn open(
        table: Table,
        records: Vec<(String, Value)>,
        bus: EventBus,
        clock: C,
        ids: G,
    ) -> Self {
        let mut index = HashMap::new();
        for (key, value) in records {
            match serde_json::from_value::<RunRecord>(value) {
                Ok(record) => {
                    index.insert(record.id.clone(), record);
                }
                Err(e) => warn!(key = %key, error = %e, "dropping undecodable run record"),
            }
        }
        Self {
            index: RwLock::new(index),
            serializer: Mutex::new(WriteHalf { table }),
            bus,
            clock,
            ids,
            safety_repoll: DEFAULT_SAFETY_REPOLL,
            default_wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }

    /// Override the safety re-poll ceiling. Never shorten it below the
    /// bus delivery latency.
    pub fn with_safety_repoll(mut self, repoll: Duration) -> Self {
        self.safety_repoll = repoll;
        self
    }

    /// Override the deadline used by [`RunGraphStore::wait_default`].
    pub fn with_default_wait_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_wait_timeout_ms = timeout_ms;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// True when `from → to` strictly increases the state order.
    pub fn valid_transition(from: RunStatus, to: RunStatus) -> bool {
        RunStatus::valid_transition(from, to)
    }

    // ── Reads (bypass the serializer) ────────────────────────────────────

    /// Lock-free read of a single record.
    pub fn get(&self, id: &RunId) -> Option<RunRecord> {
        self.index.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Snapshot of every record.
    pub fn list(&self) -> Vec<RunRecord> {
        self.index.read().values().cloned().collect()
    }

    /// Snapshot the given ids, synthesizing `unknown` records for ids
    /// that resolve to nothing.
    pub fn snapshot(&self, ids: &[RunId]) -> Vec<RunRecord> {
        let now = self.clock.epoch_secs();
        let index = self.index.read();
        ids.iter()
            .map(|id| {
                index
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| RunRecord::unknown(id.clone(), now))
            })
            .collect()
    }

    // ── Mutations (serialized) ───────────────────────────────────────────

    /// Make a record visible, mirror it to the backing store, and publish
    /// its state change. Must be called under the serializer.
    fn commit(&self, write: &mut WriteHalf, record: RunRecord) -> Result<(), StoreError> {
        let id = record.id.clone();
        let value = serde_json::to_value(&record).map_err(TableError::Json)?;
        self.index.write().insert(id.clone(), record);
        self.bus
            .publish(&run_topic(id.as_str()), BusMessage::StateChanged);
        if let Err(e) = write.table.put(id.as_str(), &value) {
            warn!(run_id = %id, error = %e, "run record not mirrored to backing store");
            return Err(StoreError::Io(e));
        }
        Ok(())
    }

    fn read_for_update(&self, id: &RunId) -> Result<RunRecord, StoreError> {
        self.index
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Assign a fresh id and persist a queued record.
    pub fn new_run(&self, spec: RunSpec) -> Result<RunId, StoreError> {
        let mut write = self.serializer.lock();
        let id = loop {
            let candidate = RunId::new(self.ids.next());
            if !self.index.read().contains_key(&candidate) {
                break candidate;
            }
        };
        let record = RunRecord::new(id.clone(), spec, self.clock.epoch_secs());
        self.commit(&mut write, record)?;
        Ok(id)
    }

    /// Unconditional insert, used by crash-recovery replay.
    pub fn insert_record(&self, record: RunRecord) -> Result<(), StoreError> {
        let mut write = self.serializer.lock();
        self.commit(&mut write, record)
    }

    /// Monotonic transition with an extra mutation applied on success.
    fn transition_with<F>(&self, id: &RunId, to: RunStatus, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut RunRecord),
    {
        let mut write = self.serializer.lock();
        let mut record = self.read_for_update(id)?;
        record
            .transition(to, self.clock.epoch_secs())
            .map_err(StoreError::InvalidTransition)?;
        apply(&mut record);
        self.commit(&mut write, record)
    }

    /// Monotonic transition to `to`.
    pub fn transition(&self, id: &RunId, to: RunStatus) -> Result<(), StoreError> {
        self.transition_with(id, to, |_| {})
    }

    /// Transition to `running`, stamping `started_at`.
    pub fn mark_running(&self, id: &RunId) -> Result<(), StoreError> {
        self.transition(id, RunStatus::Running)
    }

    /// Transition to `completed` with a caller-defined result.
    pub fn finish(&self, id: &RunId, result: Value) -> Result<(), StoreError> {
        self.transition_with(id, RunStatus::Completed, |record| {
            record.result = Some(result);
        })
    }

    /// Transition to `error` with a caller-defined error.
    pub fn fail(&self, id: &RunId, error: Value) -> Result<(), StoreError> {
        self.transition_with(id, RunStatus::Error, |record| {
            record.error = Some(error);
        })
    }

    /// Arbitrary read-modify-write under the serializer.
    ///
    /// The closure mutates a copy; if it moves the status backward in the
    /// state order the mutation is discarded and `invalid_transition`
    /// returned with the record unchanged.
    pub fn update<F>(&self, id: &RunId, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut RunRecord),
    {
        let mut write = self.serializer.lock();
        let mut record = self.read_for_update(id)?;
        let before = record.status;
        f(&mut record);
        if record.status != before && !RunStatus::valid_transition(before, record.status) {
            return Err(StoreError::InvalidTransition(TransitionError::new(
                before,
                record.status,
            )));
        }
        record.touch(self.clock.epoch_secs());
        self.commit(&mut write, record)
    }

    /// Link `child` under `parent`.
    ///
    /// Best-effort: the link is applied to whichever side exists, and the
    /// operation succeeds regardless. Both effects become visible to
    /// readers together.
    pub fn add_child(&self, parent: &RunId, child: &RunId) -> Result<(), StoreError> {
        let mut write = self.serializer.lock();
        let now = self.clock.epoch_secs();

        let (parent_record, child_record) = {
            let index = self.index.read();
            (index.get(parent).cloned(), index.get(child).cloned())
        };

        let mut changed = Vec::new();
        if let Some(mut record) = parent_record {
            record.push_child(child);
            record.touch(now);
            changed.push(record);
        }
        if let Some(mut record) = child_record {
            record.parent = Some(parent.clone());
            record.touch(now);
            changed.push(record);
        }
        if changed.is_empty() {
            return Ok(());
        }

        {
            let mut index = self.index.write();
            for record in &changed {
                index.insert(record.id.clone(), record.clone());
            }
        }
        for record in &changed {
            self.bus
                .publish(&run_topic(record.id.as_str()), BusMessage::StateChanged);
        }
        for record in &changed {
            let value = serde_json::to_value(record).map_err(TableError::Json)?;
            if let Err(e) = write.table.put(record.id.as_str(), &value) {
                warn!(run_id = %record.id, error = %e, "run record not mirrored to backing store");
                return Err(StoreError::Io(e));
            }
        }
        Ok(())
    }

    /// Remove a run from memory and the backing store. Deleting an
    /// absent id still returns Ok.
    pub fn delete_run(&self, id: &RunId) -> Result<(), StoreError> {
        let mut write = self.serializer.lock();
        let removed = self.index.write().remove(id).is_some();
        if removed {
            // Waiters re-snapshot and see a terminal `unknown`
            self.bus
                .publish(&run_topic(id.as_str()), BusMessage::StateChanged);
        }
        write.table.delete(id.as_str()).map_err(StoreError::Io)
    }

    /// Delete terminal runs whose `updated_at` is older than `now - ttl`.
    ///
    /// Scan and delete both happen under the serializer, so a record
    /// updated mid-scan can never be collected. Returns the number of
    /// runs removed.
    pub fn cleanup(&self, ttl_seconds: u64) -> Result<usize, StoreError> {
        let mut write = self.serializer.lock();
        let cutoff = self.clock.epoch_secs().saturating_sub(ttl_seconds);

        let expired: Vec<RunId> = self
            .index
            .read()
            .values()
            .filter(|record| record.is_terminal() && record.updated_at < cutoff)
            .map(|record| record.id.clone())
            .collect();

        for id in &expired {
            self.index.write().remove(id);
            write.table.delete(id.as_str()).map_err(StoreError::Io)?;
        }

        if !expired.is_empty() {
            let live: Vec<(String, Value)> = self
                .index
                .read()
                .values()
                .filter_map(|record| {
                    serde_json::to_value(record)
                        .ok()
                        .map(|value| (record.id.to_string(), value))
                })
                .collect();
            write.table.compact(&live).map_err(StoreError::Io)?;
            debug!(removed = expired.len(), "run graph compacted");
        }

        Ok(expired.len())
    }

    /// Fsync the backing table. Durability point for buffered mirrors.
    pub fn sync(&self) -> Result<(), StoreError> {
        let mut write = self.serializer.lock();
        write.table.sync().map_err(StoreError::Io)
    }

    // ── Waiting ──────────────────────────────────────────────────────────

    fn settled(mode: WaitMode, runs: &[RunRecord]) -> bool {
        match mode {
            WaitMode::All => runs.iter().all(|r| r.is_terminal()),
            WaitMode::Any => runs.iter().any(|r| r.is_terminal()),
        }
    }

    /// Block until the mode predicate holds over `ids`, or the deadline
    /// elapses.
    ///
    /// Subscribes to each run's topic before the first snapshot, so a
    /// transition that lands between snapshot and sleep is never missed;
    /// a notification lost on the wire costs at most one safety re-poll.
    /// The subscription is dropped (unsubscribed) on every exit path.
    pub async fn wait(&self, ids: &[RunId], mode: WaitMode, timeout: WaitTimeout) -> WaitSummary {
        let topics: Vec<String> = ids.iter().map(|id| run_topic(id.as_str())).collect();
        let mut sub = self.bus.subscribe_all(&topics);

        // An unrepresentable deadline (absurdly large timeout) degrades
        // to waiting forever.
        let deadline = match timeout {
            WaitTimeout::Millis(ms) => Instant::now().checked_add(Duration::from_millis(ms)),
            WaitTimeout::Infinite => None,
        };

        loop {
            let runs = self.snapshot(ids);
            if Self::settled(mode, &runs) {
                return WaitSummary {
                    runs,
                    timed_out: false,
                };
            }

            let mut pause = self.safety_repoll;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return WaitSummary {
                        runs,
                        timed_out: true,
                    };
                }
                pause = pause.min(remaining);
            }

            tokio::select! {
                _ = sub.recv() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// [`RunGraphStore::wait`] with the store's configured default
    /// deadline.
    pub async fn wait_default(&self, ids: &[RunId], mode: WaitMode) -> WaitSummary {
        self.wait(ids, mode, WaitTimeout::Millis(self.default_wait_timeout_ms))
            .await
    }
}

#[cfg(test)]
impl<C: Clock, G: IdGen> RunGraphStore<C, G> {
    /// Apply a transition without publishing, simulating a notification
    /// lost on the wire.
    pub(crate) fn transition_unpublished(
        &self,
        id: &RunId,
        to: RunStatus,
    ) -> Result<(), StoreError> {
        let mut write = self.serializer.lock();
        let mut record = self.read_for_update(id)?;
        record
            .transition(to, self.clock.epoch_secs())
            .map_err(StoreError::InvalidTransition)?;
        let value = serde_json::to_value(&record).map_err(TableError::Json)?;
        self.index.write().insert(id.clone(), record);
        write.table.put(id.as_str(), &value).map_err(StoreError::Io)
    }
}

#[cfg(test)]
#[path = "run_graph_tests.rs"]
mod tests;
