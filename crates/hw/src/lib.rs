// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! kd-hw: hardware telemetry probe and the 1-second publisher that rides
//! on top of it.

pub mod probe;
pub mod publisher;

pub use probe::{FakeProbe, HwProbe, HwSample, SystemProbe};
pub use publisher::{spawn, TICK_INTERVAL};
