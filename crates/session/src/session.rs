// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Handler (§4.H): the per-connection state machine — hello,
//! best-effort system info, the hardware publisher, then a receive loop
//! dispatching `exec`/`cancel`/`request_system_info` frames until the
//! peer disconnects.

use std::sync::Arc;

use kd_core::frame::Frame;
use kd_core::{Clock, Event, IdGen, SystemClock, UuidIdGen};
use kd_hw::HwProbe;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;

use crate::coordinator::Coordinator;

/// A live connection: owns the Coordinator and the hardware probe it
/// publishes from, transport-agnostic over any `AsyncRead`/`AsyncWrite`
/// pair (§1 Non-goals: no transport binding lives here).
pub struct Session<G: IdGen, C: Clock> {
    coordinator: Coordinator<G, C>,
    hw_probe: Arc<dyn HwProbe>,
    default_python_exe: String,
}

impl Session<UuidIdGen, SystemClock> {
    /// Build a session wired to real ids, real time, and a real hardware
    /// probe — what `kd-daemon` uses for every accepted connection.
    pub fn with_defaults(hw_probe: Arc<dyn HwProbe>, default_python_exe: impl Into<String>) -> Self {
        Self::new(UuidIdGen, SystemClock, hw_probe, default_python_exe)
    }
}

impl<G: IdGen, C: Clock> Session<G, C> {
    pub fn new(id_gen: G, clock: C, hw_probe: Arc<dyn HwProbe>, default_python_exe: impl Into<String>) -> Self {
        Self {
            coordinator: Coordinator::new(id_gen, clock),
            hw_probe,
            default_python_exe: default_python_exe.into(),
        }
    }

    /// Drive the connection to completion: hello, system info, start the
    /// hardware publisher, then dispatch frames until `reader` hits EOF.
    /// On return, the hardware publisher is stopped and any in-flight run
    /// has been asked to cancel and allowed to drain (§4.H).
    pub async fn run<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Event>();
        let encoder = crate::encoder::spawn(writer, outbound_rx);

        let (python_version, python_executable) = probe_python_version(&self.default_python_exe).await;
        let _ = outbound_tx.send(Event::Hello {
            python: python_version,
            executable: python_executable,
        });
        let _ = outbound_tx.send(Event::SystemInfo {
            data: system_info(),
        });

        let hw_handle = kd_hw::spawn(Arc::clone(&self.hw_probe), outbound_tx.clone());

        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.dispatch(&line, &outbound_tx).await;
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(%error, "session: read error, tearing down");
                    break;
                }
            }
        }

        hw_handle.abort();
        self.coordinator.cancel_active().await;
        self.coordinator.wait_idle().await;
        drop(outbound_tx);
        let _ = encoder.await;
    }

    async fn dispatch(&self, line: &str, outbound: &mpsc::UnboundedSender<Event>) {
        let frame: Frame = match serde_json::from_str(line) {
            Ok(frame) => frame,
            Err(_) => {
                let _ = outbound.send(Event::Error {
                    message: "Unsupported message".to_string(),
                    run_id: None,
                });
                return;
            }
        };

        match frame {
            Frame::Exec { .. } => {
                self.coordinator
                    .submit(frame, outbound.clone(), &self.default_python_exe)
                    .await;
            }
            Frame::Cancel { ref run_id } => {
                self.coordinator.request_cancel(run_id, outbound).await;
            }
            Frame::RequestSystemInfo => {
                let _ = outbound.send(Event::SystemInfo {
                    data: system_info(),
                });
            }
        }
    }
}

/// Best-effort interpreter identity for the `hello` event (§4.H). The
/// original kernel reports its own embedded `sys.version`/`sys.executable`
/// (see `ws.py`); since this kernel doesn't embed Python, it instead asks
/// the configured interpreter what it is.
async fn probe_python_version(python_exe: &str) -> (String, String) {
    let output = tokio::process::Command::new(python_exe)
        .arg("--version")
        .output()
        .await;
    let version = match output {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if text.is_empty() {
                text = String::from_utf8_lossy(&output.stderr).trim().to_string();
            }
            text
        }
        Err(error) => {
            tracing::debug!(%error, python_exe, "session: could not probe python version");
            String::new()
        }
    };
    (version, python_exe.to_string())
}

/// Minimal, best-effort system info (§1 Non-goals: no rich hardware
/// inventory). Just enough for a client to know what it's talking to.
fn system_info() -> serde_json::Value {
    serde_json::json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpu_count": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    })
}
