// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child Process Supervisor (§4.C): spawns the staged interpreter,
//! streams its output line-by-line, and races process exit against
//! cancellation and timeout.

use std::process::Stdio;
use std::time::Duration;

use kd_core::CancelSignal;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::stager::StagedRun;

const TERMINATE_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn child: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Terminal result of a supervised run (§3, §4.C).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Callbacks invoked synchronously, in wire-arrival order, once per
/// decoded line.
pub trait LineSink: Send + 'static {
    fn on_stdout(&mut self, line: String);
    fn on_stderr(&mut self, line: String);
}

/// Spawn `staged`, stream its output to `sink`, and race exit against
/// `cancel` and `timeout`. See §4.C for the full resolution table.
pub async fn run(
    staged: StagedRun,
    timeout: Duration,
    cancel: CancelSignal,
    mut sink: impl LineSink,
) -> Result<Outcome, RunError> {
    let mut cmd = Command::new(&staged.program);
    cmd.args(&staged.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env_clear()
        .envs(staged.env.iter().cloned());
    if let Some(cwd) = &staged.cwd {
        cmd.current_dir(cwd);
    }

    let mut child: Child = cmd.spawn().map_err(|error| {
        tracing::warn!(program = %staged.program.display(), %error, "supervisor: failed to spawn child");
        error
    })?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<Line>();

    let stdout_tx = line_tx.clone();
    let stdout_task = tokio::spawn(async move {
        if let Some(stdout) = stdout {
            read_lines_preserving_newline(stdout, |line| {
                let _ = stdout_tx.send(Line::Stdout(line));
            })
            .await;
        }
    });
    let trace_root = staged.trace_root.clone();
    let stderr_tx = line_tx.clone();
    let stderr_task = tokio::spawn(async move {
        if let Some(stderr) = stderr {
            read_lines_preserving_newline(stderr, |line| {
                let line = match &trace_root {
                    Some(root) => crate::classifier::strip_root_prefix(&line, root),
                    None => line,
                };
                let _ = stderr_tx.send(Line::Stderr(line));
            })
            .await;
        }
    });
    drop(line_tx);

    // Stream lines to the sink as they arrive, racing process exit
    // against cancel and timeout. Whichever of the three resolves first
    // wins; lines keep flowing until then (§4.C).
    let mut timed_out = false;
    let mut cancelled = false;
    let mut rx_open = true;
    let sleep = tokio::time::sleep(timeout);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            biased;
            maybe_line = line_rx.recv(), if rx_open => {
                match maybe_line {
                    Some(Line::Stdout(l)) => sink.on_stdout(l),
                    Some(Line::Stderr(l)) => sink.on_stderr(l),
                    None => rx_open = false,
                }
            }
            _ = child.wait() => break,
            _ = cancel.wait() => { cancelled = true; break; }
            _ = &mut sleep => { timed_out = true; break; }
        }
    }

    let exit_code = if timed_out || cancelled {
        tracing::debug!(timed_out, cancelled, "supervisor: escalating to terminate/kill");
        escalate_to_exit(&mut child).await
    } else {
        child.wait().await.ok().and_then(|s| s.code())
    };

    // Drain whatever output the reader tasks still have buffered before
    // their pipes closed.
    while let Some(line) = line_rx.recv().await {
        match line {
            Line::Stdout(l) => sink.on_stdout(l),
            Line::Stderr(l) => sink.on_stderr(l),
        }
    }
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    Ok(Outcome {
        exit_code,
        timed_out,
        cancelled,
    })
}

enum Line {
    Stdout(String),
    Stderr(String),
}

/// Reads `reader` line-by-line, byte-oriented so the trailing `\n` is
/// preserved in `on_line`'s argument exactly as the child wrote it (§6
/// wire table: `data` carries "line with trailing newline preserved").
/// A final line with no trailing `\n` at EOF is still flushed, unterminated.
async fn read_lines_preserving_newline<R>(reader: R, mut on_line: impl FnMut(String))
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => on_line(String::from_utf8_lossy(&buf).into_owned()),
        }
    }
}

/// Terminate, grace, then kill. Returns the exit code the OS yields.
async fn escalate_to_exit(child: &mut Child) -> Option<i32> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        _ => {
            let _ = child.start_kill();
            child.wait().await.ok().and_then(|s| s.code())
        }
    }
}
