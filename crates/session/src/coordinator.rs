// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run Coordinator (§4.G): validates an `exec` frame, runs the safety
//! check, enforces single-inflight-run-per-connection, and drives the
//! Supervisor for the run's lifetime.

use std::sync::Arc;
use std::time::Duration;

use kd_core::frame::{ExecMode, Frame};
use kd_core::{Clock, Event, IdGen, RunId, RunRecord};
use kd_safety::{check_code_safety, SecurityViolation};
use tokio::sync::{mpsc::UnboundedSender, Mutex, Notify};

use crate::sink::EventSink;

/// Drives the whole submit/cancel lifecycle for one connection.
///
/// A connection may have at most one run in flight (§1 Non-goals); `active`
/// is the single-slot guard enforcing that.
pub struct Coordinator<G: IdGen, C: Clock> {
    id_gen: G,
    clock: C,
    active: Arc<Mutex<Option<RunRecord>>>,
    idle: Arc<Notify>,
}

impl<G: IdGen, C: Clock> Coordinator<G, C> {
    pub fn new(id_gen: G, clock: C) -> Self {
        Self {
            id_gen,
            clock,
            active: Arc::new(Mutex::new(None)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Resolve once no run is in flight. Used on connection teardown to
    /// let a cancelled run drain before the session exits (§4.H).
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.lock().await.is_none() {
                return;
            }
            notified.await;
        }
    }

    /// Handle an `exec` frame: resolve its mode, enforce busy/safety gates,
    /// and — if accepted — spawn the supervised run in the background.
    ///
    /// Returns once the run has been accepted or rejected; the run itself
    /// (if accepted) continues on a detached task and reports its own
    /// `Done`/`Error` event when it finishes.
    pub async fn submit(&self, frame: Frame, outbound: UnboundedSender<Event>, default_python_exe: &str) {
        let mode = match frame.exec_mode() {
            Some(Ok(mode)) => mode,
            Some(Err(_)) | None => {
                let _ = outbound.send(Event::Error {
                    message: "Unsupported message".to_string(),
                    run_id: None,
                });
                return;
            }
        };

        let mut guard = self.active.lock().await;
        if let Some(running) = guard.as_ref() {
            let _ = outbound.send(Event::Error {
                message: "Kernel is busy".to_string(),
                run_id: Some(running.run_id.clone()),
            });
            return;
        }

        if let Some(violation) = find_first_violation(&mode) {
            let _ = outbound.send(Event::Error {
                message: format!("safety check failed: {violation}"),
                run_id: None,
            });
            return;
        }

        let run_id = RunId::from_generated(self.id_gen.next());
        let timeout_secs = frame.timeout_s().unwrap_or(kd_core::run::DEFAULT_TIMEOUT_SECS);
        let record = RunRecord::new(run_id.clone(), self.clock.now(), timeout_secs);
        let cancel_signal = record.cancel_signal.clone();
        *guard = Some(record);
        drop(guard);

        let _ = outbound.send(Event::Start {
            run_id: run_id.clone(),
        });

        let python_exe = frame
            .python_exe()
            .map(str::to_string)
            .unwrap_or_else(|| default_python_exe.to_string());
        let active = Arc::clone(&self.active);
        let idle = Arc::clone(&self.idle);
        let done_run_id = run_id.clone();

        tokio::spawn(async move {
            let outcome = run_supervised(mode, timeout_secs, python_exe, cancel_signal, done_run_id.clone(), outbound.clone()).await;
            match outcome {
                Ok(outcome) => {
                    let _ = outbound.send(Event::Done {
                        run_id: done_run_id,
                        exit_code: outcome.exit_code,
                        timed_out: outcome.timed_out,
                        cancelled: outcome.cancelled,
                    });
                }
                Err(message) => {
                    let _ = outbound.send(Event::Error {
                        message,
                        run_id: Some(done_run_id),
                    });
                }
            }
            *active.lock().await = None;
            idle.notify_waiters();
        });
    }

    /// Trigger the active run's cancel signal, if any, without reporting
    /// an error when there is none. Used on connection teardown (§4.H).
    pub async fn cancel_active(&self) {
        if let Some(record) = self.active.lock().await.as_ref() {
            record.cancel_signal.trigger();
        }
    }

    /// Handle a `cancel` frame (§4.G): trigger the active run's cancel
    /// signal if it matches, otherwise report the appropriate error.
    pub async fn request_cancel(&self, run_id_raw: &str, outbound: &UnboundedSender<Event>) {
        let run_id = match RunId::parse(run_id_raw) {
            Ok(id) => id,
            Err(_) => {
                let _ = outbound.send(Event::Error {
                    message: "Missing or invalid run_id".to_string(),
                    run_id: None,
                });
                return;
            }
        };

        let guard = self.active.lock().await;
        match guard.as_ref() {
            Some(record) if record.run_id == run_id => {
                record.cancel_signal.trigger();
            }
            _ => {
                let _ = outbound.send(Event::Error {
                    message: "No running task".to_string(),
                    run_id: Some(run_id),
                });
            }
        }
    }
}

async fn run_supervised(
    mode: ExecMode,
    timeout_secs: u64,
    python_exe: String,
    cancel_signal: kd_core::CancelSignal,
    run_id: RunId,
    outbound: UnboundedSender<Event>,
) -> Result<kd_supervisor::Outcome, String> {
    let staged = kd_supervisor::stage(&mode, &python_exe).map_err(|e| e.to_string())?;
    let sink = EventSink::new(run_id, outbound);
    kd_supervisor::run(staged, Duration::from_secs(timeout_secs), cancel_signal, sink)
        .await
        .map_err(|e| e.to_string())
}

/// Best-effort static scan of the code that is about to run (§4.B, §4.G).
/// Project mode scans every submitted file's content, not just the entry
/// point — a banned call staged under a non-entry file is just as live as
/// one in `entry`. Workspace mode still only reads `entry` off disk: the
/// rest of the workspace is pre-existing, not part of this submission.
fn find_first_violation(mode: &ExecMode) -> Option<SecurityViolation> {
    match mode {
        ExecMode::Inline { code } => check_code_safety(code).into_iter().next(),
        ExecMode::Project { files, .. } => files
            .iter()
            .find_map(|f| check_code_safety(&f.content).into_iter().next()),
        ExecMode::Workspace { workspace_root, entry } => {
            let entry_path = std::path::Path::new(workspace_root).join(entry);
            std::fs::read_to_string(entry_path)
                .ok()
                .and_then(|source| check_code_safety(&source).into_iter().next())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kd_core::{FakeClock, SequentialIdGen};
    use kd_core::frame::ExecFiles;
    use tokio::sync::mpsc;

    fn coordinator() -> Coordinator<SequentialIdGen, FakeClock> {
        Coordinator::new(SequentialIdGen::new("run"), FakeClock::new())
    }

    fn python_exe() -> String {
        std::env::var("KD_TEST_PYTHON").unwrap_or_else(|_| "python3".to_string())
    }

    #[tokio::test]
    async fn malformed_exec_frame_reports_unsupported_message() {
        let coordinator = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frame = Frame::Exec {
            code: None,
            files: None,
            entry: None,
            workspace_root: None,
            timeout_s: None,
            python_exe: None,
        };
        coordinator.submit(frame, tx, &python_exe()).await;
        match rx.try_recv().unwrap() {
            Event::Error { message, run_id } => {
                assert_eq!(message, "Unsupported message");
                assert!(run_id.is_none());
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsafe_code_is_rejected_before_a_run_starts() {
        let coordinator = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frame = Frame::Exec {
            code: Some("import os\nos.system('ls')".to_string()),
            files: None,
            entry: None,
            workspace_root: None,
            timeout_s: None,
            python_exe: None,
        };
        coordinator.submit(frame, tx, &python_exe()).await;
        match rx.try_recv().unwrap() {
            Event::Error { message, run_id } => {
                assert!(message.contains("os.system"));
                assert!(run_id.is_none());
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_submit_while_busy_reports_kernel_is_busy() {
        let coordinator = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let long_running = Frame::Exec {
            code: Some("import time\ntime.sleep(5)".to_string()),
            files: None,
            entry: None,
            workspace_root: None,
            timeout_s: Some(30),
            python_exe: None,
        };
        coordinator.submit(long_running, tx.clone(), &python_exe()).await;
        assert!(matches!(rx.try_recv().unwrap(), Event::Start { .. }));

        let second = Frame::Exec {
            code: Some("print(1)".to_string()),
            files: None,
            entry: None,
            workspace_root: None,
            timeout_s: None,
            python_exe: None,
        };
        coordinator.submit(second, tx, &python_exe()).await;
        match rx.try_recv().unwrap() {
            Event::Error { message, run_id } => {
                assert_eq!(message, "Kernel is busy");
                assert!(run_id.is_some());
            }
            other => panic!("expected busy error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_unknown_run_id_reports_no_running_task() {
        let coordinator = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator
            .request_cancel("550e8400-e29b-41d4-a716-446655440000", &tx)
            .await;
        match rx.try_recv().unwrap() {
            Event::Error { message, run_id } => {
                assert_eq!(message, "No running task");
                assert!(run_id.is_some());
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_with_invalid_run_id_reports_missing_or_invalid() {
        let coordinator = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.request_cancel("not-a-uuid", &tx).await;
        match rx.try_recv().unwrap() {
            Event::Error { message, run_id } => {
                assert_eq!(message, "Missing or invalid run_id");
                assert!(run_id.is_none());
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn project_mode_scans_every_file_not_just_the_entry() {
        let coordinator = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frame = Frame::Exec {
            code: None,
            files: Some(vec![
                ExecFiles {
                    path: "main.py".into(),
                    content: "print('hi')".into(),
                },
                ExecFiles {
                    path: "helper.py".into(),
                    content: "import os\nos.system('ls')".into(),
                },
            ]),
            entry: Some("main.py".into()),
            workspace_root: None,
            timeout_s: Some(10),
            python_exe: None,
        };
        coordinator.submit(frame, tx, &python_exe()).await;
        match rx.try_recv().unwrap() {
            Event::Error { message, run_id } => {
                assert!(message.contains("os.system"));
                assert!(run_id.is_none());
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }
}
