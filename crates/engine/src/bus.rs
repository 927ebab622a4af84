// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic-addressed in-process event bus.
//!
//! Subscribers register under string topics and own their delivery
//! queue, so publishing never blocks and a dead subscriber never blocks
//! the rest. Delivery is best-effort, at-least-once within the lifetime
//! of a subscription, in publish order within a single topic.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages carried on bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMessage {
    /// A run record changed state (topic `run_graph:{id}`)
    StateChanged,
    /// A process record changed status (topic `process:{id}`)
    StatusChanged,
    /// A log line was appended to a process (topic `process:{id}`)
    LogAppended,
}

/// Topic carrying a run's state-change events. Stable ABI.
pub fn run_topic(id: &str) -> String {
    format!("run_graph:{id}")
}

/// Topic carrying a process's status and log events. Stable ABI.
pub fn process_topic(id: &str) -> String {
    format!("process:{id}")
}

struct SubscriberEntry {
    id: u64,
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// In-process publish/subscribe bus.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<Mutex<HashMap<String, Vec<SubscriberEntry>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for messages on a single topic.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        self.subscribe_all(&[topic.to_string()])
    }

    /// Register one delivery queue across several topics.
    pub fn subscribe_all(&self, topics: &[String]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut map = self.topics.lock();
            for topic in topics {
                map.entry(topic.clone())
                    .or_default()
                    .push(SubscriberEntry { id, tx: tx.clone() });
            }
        }
        Subscription {
            bus: self.clone(),
            topics: topics.to_vec(),
            id,
            rx,
            // Keeps the channel open even with zero topics, so `recv`
            // pends instead of reporting closure.
            _tx: tx,
        }
    }

    /// Publish to every subscriber of `topic`. Never blocks; entries
    /// whose receiver is gone are pruned.
    pub fn publish(&self, topic: &str, message: BusMessage) {
        let mut map = self.topics.lock();
        if let Some(subs) = map.get_mut(topic) {
            subs.retain(|sub| sub.tx.send(message).is_ok());
            if subs.is_empty() {
                map.remove(topic);
            }
        }
    }

    fn unsubscribe(&self, topics: &[String], id: u64) {
        let mut map = self.topics.lock();
        for topic in topics {
            if let Some(subs) = map.get_mut(topic) {
                subs.retain(|sub| sub.id != id);
                if subs.is_empty() {
                    map.remove(topic);
                }
            }
        }
    }

    /// Number of live subscriber registrations on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, |subs| subs.len())
    }
}

/// A live registration on one or more topics.
///
/// Dropping the subscription unsubscribes from every topic.
pub struct Subscription {
    bus: EventBus,
    topics: Vec<String>,
    id: u64,
    rx: mpsc::UnboundedReceiver<BusMessage>,
    _tx: mpsc::UnboundedSender<BusMessage>,
}

impl Subscription {
    /// Wait for the next message on any subscribed topic.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.topics, self.id);
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
