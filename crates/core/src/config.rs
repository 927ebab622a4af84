// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup configuration.
//!
//! Options load from a TOML file; a missing file yields pure defaults.
//! The empty `data_dir` default is resolved to the per-user state
//! directory by the daemon.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_RUN_TTL_SECONDS: u64 = 86_400;
pub const DEFAULT_PROCESS_TTL_SECONDS: u64 = 86_400;
pub const DEFAULT_AWAIT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SAFETY_REPOLL_MS: u64 = 5_000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("lane '{0}' must have a positive capacity")]
    InvalidLaneCap(String),

    #[error("option '{0}' must be positive")]
    InvalidOption(&'static str),
}

/// Descriptor for a session started at boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub name: String,
    #[serde(default)]
    pub vars: IndexMap<String, String>,
}

impl SessionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: IndexMap::new(),
        }
    }
}

fn default_lane_caps() -> IndexMap<String, usize> {
    IndexMap::from([
        ("main".to_string(), 4),
        ("subagent".to_string(), 8),
        ("background_exec".to_string(), 2),
    ])
}

fn default_run_ttl() -> u64 {
    DEFAULT_RUN_TTL_SECONDS
}

fn default_process_ttl() -> u64 {
    DEFAULT_PROCESS_TTL_SECONDS
}

fn default_log_max_lines() -> usize {
    crate::process::DEFAULT_LOG_MAX_LINES
}

fn default_await_timeout_ms() -> u64 {
    DEFAULT_AWAIT_TIMEOUT_MS
}

fn default_safety_repoll_ms() -> u64 {
    DEFAULT_SAFETY_REPOLL_MS
}

/// Recognized startup options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Lane name → concurrency cap
    pub lane_caps: IndexMap<String, usize>,
    /// Durable state directory; empty resolves to the per-user default
    pub data_dir: PathBuf,
    pub run_ttl_seconds: u64,
    pub process_ttl_seconds: u64,
    pub log_max_lines: usize,
    pub await_default_timeout_ms: u64,
    pub await_safety_repoll_ms: u64,
    /// Session started at boot; startup fails softly on error
    pub primary_session: Option<SessionSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lane_caps: default_lane_caps(),
            data_dir: PathBuf::new(),
            run_ttl_seconds: default_run_ttl(),
            process_ttl_seconds: default_process_ttl(),
            log_max_lines: default_log_max_lines(),
            await_default_timeout_ms: default_await_timeout_ms(),
            await_safety_repoll_ms: default_safety_repoll_ms(),
            primary_session: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error; it yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject caps and intervals that would wedge the scheduler.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (lane, cap) in &self.lane_caps {
            if *cap == 0 {
                return Err(ConfigError::InvalidLaneCap(lane.clone()));
            }
        }
        if self.log_max_lines == 0 {
            return Err(ConfigError::InvalidOption("log_max_lines"));
        }
        if self.await_safety_repoll_ms == 0 {
            return Err(ConfigError::InvalidOption("await_safety_repoll_ms"));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
