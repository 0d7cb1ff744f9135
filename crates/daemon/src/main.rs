// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! kerneld — the compute kernel daemon.
//!
//! Binds a newline-delimited-JSON-over-TCP listener and hands each
//! accepted connection to a transport-agnostic `Session` (§4.H). This
//! binary is the one concrete transport binding; the HTTP/WebSocket
//! front-end the original kernel shipped is out of scope (§1).

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;

use std::sync::Arc;

use kd_hw::SystemProbe;
use kd_session::Session;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env_and_args()?;
    let _log_guard = setup_logging();

    info!(bind = %config.bind_addr, python = %config.python_exe, "starting kerneld");

    let listener = TcpListener::bind(config.bind_addr).await?;
    let hw_probe: Arc<SystemProbe> = Arc::new(SystemProbe::new());

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!("kerneld ready, listening on {}", config.bind_addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        info!(%peer, "accepted connection");
                        let hw_probe: Arc<dyn kd_hw::HwProbe> = Arc::clone(&hw_probe);
                        let python_exe = config.python_exe.clone();
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            let session = Session::with_defaults(hw_probe, python_exe);
                            session.run(reader, writer).await;
                            info!(%peer, "connection closed");
                        });
                    }
                    Err(error) => {
                        error!(%error, "error accepting connection");
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    info!("kerneld stopped");
    Ok(())
}

fn setup_logging() -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    guard
}
