// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session identifier type.
//!
//! SessionId identifies an interactive session owner registered with the
//! session supervisor. Sessions are the producers of runs; their internal
//! dialogue logic lives outside this workspace.

crate::define_id! {
    /// Unique identifier for a session owner.
    pub struct SessionId;
}
