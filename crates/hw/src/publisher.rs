// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hardware Publisher (§4.F): ticks a probe every second and forwards the
//! result onto the session's outbound event channel for the lifetime of
//! the connection.

use std::sync::Arc;
use std::time::Duration;

use kd_core::Event;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::probe::HwProbe;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the Publisher task. The returned handle is the "Hardware
/// Publisher task handle" the Session holds and aborts on teardown (§3).
/// A probe failure is non-fatal: it is folded into the `hw` event's
/// `error` field and the ticker keeps running.
pub fn spawn(probe: Arc<dyn HwProbe>, tx: UnboundedSender<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let sample = probe.sample().await;
            let event = Event::Hw {
                ts_ms: sample.ts_ms,
                gpus: sample.gpus,
                cpu: sample.cpu,
                error: sample.error,
            };
            if tx.send(event).is_err() {
                // receiver gone: session has torn down, nothing left to publish to.
                break;
            }
        }
    })
}
