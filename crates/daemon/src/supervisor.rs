// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session supervision: one owner task per interactive session.
//!
//! The supervisor keeps a unique-id registry of session owners. Owners
//! are temporary: a crashed owner is logged and deregistered, never
//! respawned, and the supervisor stays available for new sessions.
//! Shutdown cancels every owner and waits for it to exit.

use gaffer_core::{Clock, IdGen, SessionId, SessionSpec};
use gaffer_engine::LaneQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long shutdown waits for an owner to observe its cancel signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session id already registered: {0}")]
    AlreadyRegistered(String),
}

/// Context handed to a session's driver future.
///
/// Sessions are the producers of runs, so the context carries the lane
/// queue handle alongside the cancellation signal.
pub struct SessionCtx<C: Clock, G: IdGen + 'static> {
    pub session_id: SessionId,
    pub cancel: CancellationToken,
    pub lanes: LaneQueue<C, G>,
}

/// Registry view of a session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub started_at: u64,
}

struct SessionOwner {
    info: SessionInfo,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Dynamic one-per-session supervision with a unique-key registry.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct SessionSupervisor<C: Clock, G: IdGen + 'static> {
    registry: Arc<Mutex<HashMap<SessionId, SessionOwner>>>,
    lanes: LaneQueue<C, G>,
    clock: C,
    ids: G,
}

impl<C: Clock, G: IdGen + 'static> SessionSupervisor<C, G> {
    pub fn new(lanes: LaneQueue<C, G>, clock: C, ids: G) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            lanes,
            clock,
            ids,
        }
    }

    /// Start a session owner running `driver` and register it.
    ///
    /// The driver future is the session's dialogue loop (out of scope
    /// here); it should exit when its cancellation token fires. A panic
    /// in the driver is logged and the owner deregistered.
    pub fn start_session<F, Fut>(
        &self,
        spec: SessionSpec,
        driver: F,
    ) -> Result<SessionId, SupervisorError>
    where
        F: FnOnce(SessionCtx<C, G>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = SessionId::new(self.ids.next());
        let cancel = CancellationToken::new();
        let fut = driver(SessionCtx {
            session_id: id.clone(),
            cancel: cancel.clone(),
            lanes: self.lanes.clone(),
        });

        // Hold the registry lock across spawn + insert so the watcher's
        // deregistration cannot run before the owner is registered.
        let mut registry = self.registry.lock();
        if registry.contains_key(&id) {
            return Err(SupervisorError::AlreadyRegistered(id.to_string()));
        }

        let owner_task = tokio::spawn(fut);
        let watcher = {
            let registry = Arc::clone(&self.registry);
            let owner_id = id.clone();
            tokio::spawn(async move {
                if let Err(e) = owner_task.await {
                    if e.is_panic() {
                        warn!(session_id = %owner_id, "session owner crashed");
                    }
                }
                // Temporary restart policy: deregister, never respawn
                registry.lock().remove(&owner_id);
            })
        };

        let info = SessionInfo {
            id: id.clone(),
            name: spec.name.clone(),
            started_at: self.clock.epoch_secs(),
        };
        registry.insert(
            id.clone(),
            SessionOwner {
                info,
                cancel,
                join: watcher,
            },
        );
        drop(registry);

        info!(session_id = %id, name = %spec.name, "session started");
        Ok(id)
    }

    /// Stop and deregister a session owner.
    ///
    /// Cancellation is cooperative: the driver observes its token. The
    /// registry entry is removed immediately.
    pub fn stop_session(&self, id: &SessionId) -> Result<(), SupervisorError> {
        let owner = self
            .registry
            .lock()
            .remove(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;
        owner.cancel.cancel();
        info!(session_id = %id, "session stopped");
        Ok(())
    }

    pub fn lookup(&self, id: &SessionId) -> Option<SessionInfo> {
        self.registry.lock().get(id).map(|owner| owner.info.clone())
    }

    /// All registered owners, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .registry
            .lock()
            .values()
            .map(|owner| owner.info.clone())
            .collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.0.cmp(&b.id.0)));
        sessions
    }

    /// Cancel every owner and wait for each to exit (bounded grace).
    pub async fn shutdown(&self) {
        let owners: Vec<SessionOwner> = {
            let mut registry = self.registry.lock();
            registry.drain().map(|(_, owner)| owner).collect()
        };
        for owner in &owners {
            owner.cancel.cancel();
        }
        for owner in owners {
            let id = owner.info.id.clone();
            match tokio::time::timeout(SHUTDOWN_GRACE, owner.join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    warn!(session_id = %id, "session owner crashed during shutdown");
                }
                Ok(Err(_)) => {}
                Err(_) => warn!(session_id = %id, "session owner ignored shutdown"),
            }
        }
        info!("session supervisor shut down");
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
