// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gaffer-daemon: session supervision and daemon lifecycle

pub mod env;
pub mod lifecycle;
pub mod supervisor;

pub use lifecycle::{startup, DaemonState, LifecycleError, Paths};
pub use supervisor::{SessionCtx, SessionInfo, SessionSupervisor, SupervisorError};
