// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process manager: spawns, signals, and reaps external subprocesses.
//!
//! Commands run under `/bin/sh -c`. stdout and stderr are streamed
//! line-by-line (UTF-8 best-effort) into the process store; a reaper
//! task records the exit. On startup, persisted `running` records are
//! reconciled against actual OS pid liveness.

use crate::error::ProcessError;
use crate::process_store::ProcessStore;
use gaffer_core::process::{ProcessSpec, ProcessStatus};
use gaffer_core::{Clock, IdGen, ProcessId};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Longest log line stored before truncation.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const TRUNCATION_SUFFIX: &str = "…[truncated]";

/// Supervises external subprocesses on behalf of sessions.
pub struct ProcessManager<C: Clock, G: IdGen> {
    store: Arc<ProcessStore<C, G>>,
}

impl<C: Clock, G: IdGen + 'static> ProcessManager<C, G> {
    pub fn new(store: Arc<ProcessStore<C, G>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ProcessStore<C, G>> {
        &self.store
    }

    /// Spawn `spec.command` under `/bin/sh -c` and track it.
    ///
    /// The record is created `queued`, marked `running` with the OS pid
    /// on a successful spawn, and reaped into a terminal status when the
    /// child exits. Must be called within a tokio runtime.
    pub fn spawn(&self, spec: ProcessSpec) -> Result<ProcessId, ProcessError> {
        let id = self.store.new_process(spec.clone())?;

        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(&spec.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !spec.cwd.as_os_str().is_empty() {
            command.current_dir(&spec.cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                if let Err(store_err) = self.store.mark_error(&id, format!("spawn failed: {e}")) {
                    warn!(process_id = %id, error = %store_err, "spawn failure not recorded");
                }
                return Err(ProcessError::Spawn {
                    command: spec.command,
                    source: e,
                });
            }
        };

        let os_pid = child.id().unwrap_or_default();
        self.store.mark_running(&id, os_pid)?;
        info!(process_id = %id, os_pid, command = %spec.command, "process spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(stream_lines(Arc::clone(&self.store), id.clone(), stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stream_lines(Arc::clone(&self.store), id.clone(), stderr));
        }

        let store = Arc::clone(&self.store);
        let reap_id = id.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let outcome = match status.code() {
                        Some(code) => store.mark_completed(&reap_id, code),
                        // No exit code means the child died to a signal
                        None => store.mark_killed(&reap_id),
                    };
                    if let Err(e) = outcome {
                        debug!(process_id = %reap_id, error = %e, "exit already recorded");
                    }
                }
                Err(e) => {
                    warn!(process_id = %reap_id, error = %e, "wait on child failed");
                    let _ = store.mark_error(&reap_id, format!("wait failed: {e}"));
                }
            }
        });

        Ok(id)
    }

    /// Deliver `signal` to the process's recorded OS pid.
    pub fn signal(&self, id: &ProcessId, signal: Signal) -> Result<(), ProcessError> {
        let (record, _) = self
            .store
            .get(id)
            .ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
        let os_pid = record
            .os_pid
            .ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
        kill(Pid::from_raw(os_pid as i32), signal).map_err(ProcessError::Signal)
    }

    /// Force-terminate with SIGKILL. The reaper records the `killed`
    /// status when the child is waited on.
    pub fn kill(&self, id: &ProcessId) -> Result<(), ProcessError> {
        self.signal(id, Signal::SIGKILL)
    }

    /// Newest `n` log lines in chronological order.
    pub fn logs(&self, id: &ProcessId, n: usize) -> Result<Vec<String>, ProcessError> {
        self.store
            .get_logs(id, n)
            .ok_or_else(|| ProcessError::NotFound(id.to_string()))
    }

    /// Decide the fate of persisted `running` records after a restart.
    ///
    /// A record whose OS pid is gone, or no longer runs the recorded
    /// command, transitions to `lost`. Surviving pids keep their record;
    /// their output pipes died with the previous daemon, so no new log
    /// stream can be attached. Returns the number of records marked
    /// lost.
    pub fn reconcile(&self) -> usize {
        let mut lost = 0;
        for record in self.store.list(Some(ProcessStatus::Running)) {
            let alive = record
                .os_pid
                .map(|pid| pid_alive(pid) && pid_matches_command(pid, &record.command))
                .unwrap_or(false);
            if alive {
                debug!(process_id = %record.id, os_pid = ?record.os_pid, "process survived restart");
                continue;
            }
            match self.store.mark_lost(&record.id) {
                Ok(()) => lost += 1,
                Err(e) => warn!(process_id = %record.id, error = %e, "stale process not marked lost"),
            }
        }
        if lost > 0 {
            info!(lost, "reconciled processes with dead pids");
        }
        lost
    }
}

/// Probe pid existence with a null signal. EPERM still means the pid
/// exists.
fn pid_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Best-effort check that the pid still runs the recorded command.
///
/// Reads `/proc/<pid>/cmdline` where available; without procfs the
/// liveness probe alone decides.
fn pid_matches_command(pid: u32, command: &str) -> bool {
    match std::fs::read(format!("/proc/{pid}/cmdline")) {
        Ok(raw) => {
            let cmdline = raw
                .split(|byte| *byte == 0)
                .map(String::from_utf8_lossy)
                .collect::<Vec<_>>()
                .join(" ");
            cmdline.contains(command)
        }
        Err(_) => true,
    }
}

/// Stream one pipe into the store, line by line.
///
/// Lines are decoded UTF-8 best-effort and truncated at
/// [`MAX_LINE_BYTES`] with a marker suffix. A final unterminated line is
/// appended at EOF.
async fn stream_lines<C, G, R>(store: Arc<ProcessStore<C, G>>, id: ProcessId, pipe: R)
where
    C: Clock,
    G: IdGen + 'static,
    R: AsyncRead + Unpin + Send,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while buf.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                    buf.pop();
                }
                let line = truncate_line(String::from_utf8_lossy(&buf).into_owned());
                match store.append_log(&id, line) {
                    Ok(()) => {}
                    Err(crate::error::StoreError::NotFound(_)) => break,
                    Err(e) => debug!(process_id = %id, error = %e, "log line not mirrored"),
                }
            }
            Err(e) => {
                warn!(process_id = %id, error = %e, "log stream read failed");
                break;
            }
        }
    }
}

/// Truncate to [`MAX_LINE_BYTES`] on a char boundary, marking the cut.
fn truncate_line(line: String) -> String {
    if line.len() <= MAX_LINE_BYTES {
        return line;
    }
    let mut cut = MAX_LINE_BYTES;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = line[..cut].to_string();
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}

#[cfg(test)]
#[path = "process_manager_tests.rs"]
mod tests;
