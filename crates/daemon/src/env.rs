// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

use crate::lifecycle::LifecycleError;

/// Resolve state directory: GAFFER_STATE_DIR > XDG_STATE_HOME/gaffer > ~/.local/state/gaffer
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("GAFFER_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("gaffer"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/gaffer"))
}

/// Resolve the config file: GAFFER_CONFIG > <state_dir>/config.toml
pub fn config_path() -> Result<PathBuf, LifecycleError> {
    if let Ok(path) = std::env::var("GAFFER_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    Ok(state_dir()?.join("config.toml"))
}
