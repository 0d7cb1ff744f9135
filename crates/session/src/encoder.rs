// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire Encoder (§4.I): a single-writer task that serializes `Event`s as
//! newline-delimited JSON. All concurrent emitters — the Hw Publisher,
//! the Coordinator's background run tasks, and the Session's own
//! hello/system_info sends — funnel through the same mpsc queue, so the
//! one task actually touching the socket is never shared.

use kd_core::Event;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

/// Spawn the encoder loop. Returns once `rx` is closed or a write fails.
pub fn spawn<W>(mut writer: W, mut rx: UnboundedReceiver<Event>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(error) => {
                    tracing::warn!(%error, "wire encoder: failed to serialize event");
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    })
}
