// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process store: durable metadata and rolling logs for background
//! processes.
//!
//! Same shape as the run graph store: lock-free read snapshots, a single
//! serializing mutex owning the durable table, and publication on the
//! process topic after every successful mutation.

use crate::bus::{process_topic, BusMessage, EventBus};
use crate::error::StoreError;
use gaffer_core::process::{ProcessRecord, ProcessSpec, ProcessStatus};
use gaffer_core::{Clock, IdGen, ProcessId};
use gaffer_storage::{Table, TableError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

struct WriteHalf {
    table: Table,
}

/// In-memory process index mirrored to a durable table.
pub struct ProcessStore<C: Clock, G: IdGen> {
    index: RwLock<HashMap<ProcessId, ProcessRecord>>,
    serializer: Mutex<WriteHalf>,
    bus: EventBus,
    clock: C,
    ids: G,
    log_max_lines: usize,
}

impl<C: Clock, G: IdGen> ProcessStore<C, G> {
    /// Open the store over a durable table, adopting its replayed
    /// records. Replayed log buffers are re-capped to `log_max_lines`.
    pub fn open(
        table: Table,
        records: Vec<(String, Value)>,
        bus: EventBus,
        clock: C,
        ids: G,
        log_max_lines: usize,
    ) -> Self {
        let mut index = HashMap::new();
        for (key, value) in records {
            match serde_json::from_value::<ProcessRecord>(value) {
                Ok(mut record) => {
                    record.logs.set_max_lines(log_max_lines);
                    index.insert(record.id.clone(), record);
                }
                Err(e) => warn!(key = %key, error = %e, "dropping undecodable process record"),
            }
        }
        Self {
            index: RwLock::new(index),
            serializer: Mutex::new(WriteHalf { table }),
            bus,
            clock,
            ids,
            log_max_lines,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ── Reads (bypass the serializer) ────────────────────────────────────

    /// Record plus its retained logs in chronological order.
    pub fn get(&self, id: &ProcessId) -> Option<(ProcessRecord, Vec<String>)> {
        let record = self.index.read().get(id).cloned()?;
        let logs = record.logs.chronological();
        Some((record, logs))
    }

    /// Newest `n` log lines in chronological order.
    pub fn get_logs(&self, id: &ProcessId, n: usize) -> Option<Vec<String>> {
        self.index.read().get(id).map(|record| record.logs.tail(n))
    }

    /// All records, optionally filtered by status, oldest first.
    pub fn list(&self, status: Option<ProcessStatus>) -> Vec<ProcessRecord> {
        let mut records: Vec<ProcessRecord> = self
            .index
            .read()
            .values()
            .filter(|record| status.is_none_or(|s| record.status == s))
            .cloned()
            .collect();
        records.sort_by_key(|record| record.inserted_at);
        records
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    // ── Mutations (serialized) ───────────────────────────────────────────

    fn commit(
        &self,
        write: &mut WriteHalf,
        record: ProcessRecord,
        message: BusMessage,
    ) -> Result<(), StoreError> {
        let id = record.id.clone();
        let value = serde_json::to_value(&record).map_err(TableError::Json)?;
        self.index.write().insert(id.clone(), record);
        self.bus.publish(&process_topic(id.as_str()), message);
        if let Err(e) = write.table.put(id.as_str(), &value) {
            warn!(process_id = %id, error = %e, "process record not mirrored to backing store");
            return Err(StoreError::Io(e));
        }
        Ok(())
    }

    fn read_for_update(&self, id: &ProcessId) -> Result<ProcessRecord, StoreError> {
        self.index
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Assign a fresh id and persist a queued record.
    pub fn new_process(&self, spec: ProcessSpec) -> Result<ProcessId, StoreError> {
        let mut write = self.serializer.lock();
        let id = loop {
            let candidate = ProcessId::new(self.ids.next());
            if !self.index.read().contains_key(&candidate) {
                break candidate;
            }
        };
        let record = ProcessRecord::new(
            id.clone(),
            spec,
            self.clock.epoch_secs(),
            self.log_max_lines,
        );
        self.commit(&mut write, record, BusMessage::StatusChanged)?;
        Ok(id)
    }

    /// Unconditional insert, used by crash-recovery replay.
    pub fn insert_record(&self, mut record: ProcessRecord) -> Result<(), StoreError> {
        let mut write = self.serializer.lock();
        record.logs.set_max_lines(self.log_max_lines);
        self.commit(&mut write, record, BusMessage::StatusChanged)
    }

    fn transition_with<F>(&self, id: &ProcessId, to: ProcessStatus, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ProcessRecord),
    {
        let mut write = self.serializer.lock();
        let mut record = self.read_for_update(id)?;
        record
            .transition(to, self.clock.epoch_secs())
            .map_err(StoreError::InvalidTransition)?;
        apply(&mut record);
        self.commit(&mut write, record, BusMessage::StatusChanged)
    }

    /// Transition to `running`, recording the OS pid.
    pub fn mark_running(&self, id: &ProcessId, os_pid: u32) -> Result<(), StoreError> {
        self.transition_with(id, ProcessStatus::Running, |record| {
            record.os_pid = Some(os_pid);
        })
    }

    /// Transition to `completed` with the exit code.
    pub fn mark_completed(&self, id: &ProcessId, exit_code: i32) -> Result<(), StoreError> {
        self.transition_with(id, ProcessStatus::Completed, |record| {
            record.exit_code = Some(exit_code);
        })
    }

    /// Transition to `killed`.
    pub fn mark_killed(&self, id: &ProcessId) -> Result<(), StoreError> {
        self.transition_with(id, ProcessStatus::Killed, |_| {})
    }

    /// Transition to `error` with a reason.
    pub fn mark_error(&self, id: &ProcessId, error: impl Into<String>) -> Result<(), StoreError> {
        let error = error.into();
        self.transition_with(id, ProcessStatus::Error, |record| {
            record.error = Some(error);
        })
    }

    /// Transition to `lost`; produced by reconciliation only.
    pub fn mark_lost(&self, id: &ProcessId) -> Result<(), StoreError> {
        self.transition_with(id, ProcessStatus::Lost, |_| {})
    }

    /// Append one log line. The buffer length afterwards is
    /// `min(prior + 1, cap)`; the oldest line is discarded on overflow.
    pub fn append_log(&self, id: &ProcessId, line: impl Into<String>) -> Result<(), StoreError> {
        let mut write = self.serializer.lock();
        let mut record = self.read_for_update(id)?;
        record.logs.push(line);
        record.touch(self.clock.epoch_secs());
        self.commit(&mut write, record, BusMessage::LogAppended)
    }

    /// Remove a process from memory and the backing store. Deleting an
    /// absent id still returns Ok.
    pub fn delete(&self, id: &ProcessId) -> Result<(), StoreError> {
        let mut write = self.serializer.lock();
        let removed = self.index.write().remove(id).is_some();
        if removed {
            self.bus
                .publish(&process_topic(id.as_str()), BusMessage::StatusChanged);
        }
        write.table.delete(id.as_str()).map_err(StoreError::Io)
    }

    /// Delete terminal processes whose `updated_at` is older than
    /// `now - ttl`. Non-terminal records are never collected.
    pub fn cleanup(&self, ttl_seconds: u64) -> Result<usize, StoreError> {
        let mut write = self.serializer.lock();
        let cutoff = self.clock.epoch_secs().saturating_sub(ttl_seconds);

        let expired: Vec<ProcessId> = self
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
            debug!(removed = expired.len(), "process store compacted");
        }

        Ok(expired.len())
    }

    /// Fsync the backing table.
    pub fn sync(&self) -> Result<(), StoreError> {
        let mut write = self.serializer.lock();
        write.table.sync().map_err(StoreError::Io)
    }
}

#[cfg(test)]
#[path = "process_store_tests.rs"]
mod tests;
