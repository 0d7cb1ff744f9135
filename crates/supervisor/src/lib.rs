// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! kd-supervisor: stages, spawns, and supervises the child interpreter
//! that runs a session's accepted code.

pub mod classifier;
pub mod stager;
pub mod supervisor;

pub use stager::{stage, StagedRun, StagingError};
pub use supervisor::{run, LineSink, Outcome, RunError};
