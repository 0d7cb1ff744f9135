// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! End-to-end scenarios against a full `Session` over an in-process
//! duplex transport, matching each concrete scenario and invariant in
//! spec.md's Testable Properties.

use std::sync::Arc;
use std::time::Duration;

use kd_core::Event;
use kd_hw::FakeProbe;
use kd_session::Session;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn python_exe() -> String {
    std::env::var("KD_TEST_PYTHON").unwrap_or_else(|_| "python3".to_string())
}

/// Wires a `Session` to one end of an in-process duplex pair and hands
/// back the client's reader/writer half plus the session's join handle.
fn spawn_session() -> (
    BufReader<tokio::io::DuplexStream>,
    tokio::io::DuplexStream,
    tokio::task::JoinHandle<()>,
) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let (client_read, client_write) = tokio::io::split(client);
    let session = Session::with_defaults(Arc::new(FakeProbe::healthy()), python_exe());
    let handle = tokio::spawn(async move {
        session.run(server_read, server_write).await;
    });
    (BufReader::new(client_read), client_write, handle)
}

async fn send(writer: &mut (impl tokio::io::AsyncWrite + Unpin), frame: Value) {
    let mut line = frame.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.unwrap();
}

async fn next_event(reader: &mut (impl AsyncBufReadExt + Unpin)) -> Event {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.unwrap();
    assert!(n > 0, "connection closed before expected event");
    serde_json::from_str(line.trim_end()).unwrap()
}

async fn next_event_timeout(reader: &mut (impl AsyncBufReadExt + Unpin), secs: u64) -> Event {
    tokio::time::timeout(Duration::from_secs(secs), next_event(reader))
        .await
        .expect("timed out waiting for event")
}

/// Like `next_event_timeout`, but skips interleaved `hw` heartbeat events
/// — every scenario but the heartbeat one cares about the run's own
/// event sequence, not whichever tick the Publisher happens to land on.
async fn next_run_event(reader: &mut (impl AsyncBufReadExt + Unpin), secs: u64) -> Event {
    loop {
        match next_event_timeout(reader, secs).await {
            Event::Hw { .. } => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn scenario_1_smoke() {
    let (mut reader, mut writer, _handle) = spawn_session();

    assert!(matches!(next_event(&mut reader).await, Event::Hello { .. }));
    assert!(matches!(
        next_event(&mut reader).await,
        Event::SystemInfo { .. }
    ));

    send(
        &mut writer,
        json!({
            "type": "exec",
            "code": "print('OK')\nimport sys;print('ERR',file=sys.stderr)"
        }),
    )
    .await;

    assert!(matches!(
        next_run_event(&mut reader, 10).await,
        Event::Start { .. }
    ));
    match next_run_event(&mut reader, 10).await {
        Event::Stdout { data, .. } => assert_eq!(data, "OK\n"),
        other => panic!("expected stdout, got {other:?}"),
    }
    match next_run_event(&mut reader, 10).await {
        Event::Stderr { data, .. } => assert_eq!(data, "ERR\n"),
        other => panic!("expected stderr, got {other:?}"),
    }
    match next_run_event(&mut reader, 10).await {
        Event::Done {
            exit_code,
            timed_out,
            cancelled,
            ..
        } => {
            assert_eq!(exit_code, Some(0));
            assert!(!timed_out);
            assert!(!cancelled);
        }
        other => panic!("expected done, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_2_metric_sentinel() {
    let (mut reader, mut writer, _handle) = spawn_session();
    let _ = next_event(&mut reader).await; // hello
    let _ = next_event(&mut reader).await; // system_info

    send(
        &mut writer,
        json!({
            "type": "exec",
            "code": "print('__METRIC__ {\"name\":\"loss\",\"value\":0.42,\"step\":1}')\nprint(\"after\")"
        }),
    )
    .await;

    assert!(matches!(
        next_run_event(&mut reader, 10).await,
        Event::Start { .. }
    ));
    match next_run_event(&mut reader, 10).await {
        Event::Metric {
            name, value, step, ..
        } => {
            assert_eq!(name, "loss");
            assert_eq!(value, json!(0.42));
            assert_eq!(step, 1);
        }
        other => panic!("expected metric, got {other:?}"),
    }
    match next_run_event(&mut reader, 10).await {
        Event::Stdout { data, .. } => assert_eq!(data, "after\n"),
        other => panic!("expected stdout, got {other:?}"),
    }
    assert!(matches!(
        next_run_event(&mut reader, 10).await,
        Event::Done {
            exit_code: Some(0),
            ..
        }
    ));
}

#[tokio::test]
async fn scenario_3_cancel() {
    let (mut reader, mut writer, _handle) = spawn_session();
    let _ = next_event(&mut reader).await;
    let _ = next_event(&mut reader).await;

    send(
        &mut writer,
        json!({
            "type": "exec",
            "code": "import time;print('start');time.sleep(30)",
            "timeout_s": 60
        }),
    )
    .await;

    let run_id = match next_run_event(&mut reader, 10).await {
        Event::Start { run_id } => run_id,
        other => panic!("expected start, got {other:?}"),
    };
    match next_run_event(&mut reader, 10).await {
        Event::Stdout { data, .. } => assert_eq!(data, "start\n"),
        other => panic!("expected stdout, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    send(
        &mut writer,
        json!({"type": "cancel", "run_id": run_id.as_str()}),
    )
    .await;

    match next_run_event(&mut reader, 3).await {
        Event::Done {
            cancelled,
            timed_out,
            ..
        } => {
            assert!(cancelled);
            assert!(!timed_out);
        }
        other => panic!("expected done, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_4_oom() {
    let (mut reader, mut writer, _handle) = spawn_session();
    let _ = next_event(&mut reader).await;
    let _ = next_event(&mut reader).await;

    send(
        &mut writer,
        json!({
            "type": "exec",
            "code": "raise RuntimeError('CUDA out of memory. Tried to allocate 1234 MiB')"
        }),
    )
    .await;

    assert!(matches!(
        next_run_event(&mut reader, 10).await,
        Event::Start { .. }
    ));

    let mut oom_count = 0;
    loop {
        match next_run_event(&mut reader, 10).await {
            Event::Stderr { .. } => {}
            Event::Oom { message, .. } => {
                oom_count += 1;
                assert!(message.contains("CUDA out of memory"));
            }
            Event::Done { exit_code, .. } => {
                assert_ne!(exit_code, Some(0));
                break;
            }
            other => panic!("unexpected event during oom scenario: {other:?}"),
        }
    }
    assert_eq!(oom_count, 1);
}

#[tokio::test]
async fn scenario_5_safety_violation() {
    let (mut reader, mut writer, _handle) = spawn_session();
    let _ = next_event(&mut reader).await;
    let _ = next_event(&mut reader).await;

    send(
        &mut writer,
        json!({"type": "exec", "code": "import os;os.system('echo hi')"}),
    )
    .await;

    match next_run_event(&mut reader, 5).await {
        Event::Error { message, .. } => assert!(message.contains("os.system")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_6_project_import() {
    let (mut reader, mut writer, _handle) = spawn_session();
    let _ = next_event(&mut reader).await;
    let _ = next_event(&mut reader).await;

    send(
        &mut writer,
        json!({
            "type": "exec",
            "entry": "main.py",
            "files": [
                {"path": "main.py", "content": "from utils.math import add;print(add(1,2))"},
                {"path": "utils/__init__.py", "content": ""},
                {"path": "utils/math.py", "content": "def add(a,b):return a+b"}
            ]
        }),
    )
    .await;

    assert!(matches!(
        next_run_event(&mut reader, 10).await,
        Event::Start { .. }
    ));
    match next_run_event(&mut reader, 10).await {
        Event::Stdout { data, .. } => assert_eq!(data, "3\n"),
        other => panic!("expected stdout, got {other:?}"),
    }
    assert!(matches!(
        next_run_event(&mut reader, 10).await,
        Event::Done {
            exit_code: Some(0),
            ..
        }
    ));
}

#[tokio::test]
async fn scenario_7_hw_heartbeat_within_five_events_of_hello() {
    let (mut reader, _writer, _handle) = spawn_session();

    let mut events = Vec::new();
    for _ in 0..5 {
        events.push(next_event_timeout(&mut reader, 5).await);
    }
    assert!(
        events.iter().any(|e| matches!(e, Event::Hw { .. })),
        "expected at least one hw event within the first 5 events, got {events:?}"
    );
}

#[tokio::test]
async fn repeated_cancel_after_done_has_no_additional_effect() {
    let (mut reader, mut writer, _handle) = spawn_session();
    let _ = next_event(&mut reader).await;
    let _ = next_event(&mut reader).await;

    send(&mut writer, json!({"type": "exec", "code": "print('hi')"})).await;
    let run_id = match next_run_event(&mut reader, 10).await {
        Event::Start { run_id } => run_id,
        other => panic!("expected start, got {other:?}"),
    };
    let _ = next_run_event(&mut reader, 10).await; // stdout
    assert!(matches!(
        next_run_event(&mut reader, 10).await,
        Event::Done { .. }
    ));

    send(
        &mut writer,
        json!({"type": "cancel", "run_id": run_id.as_str()}),
    )
    .await;
    match next_run_event(&mut reader, 5).await {
        Event::Error { message, .. } => assert!(message.contains("No running task")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn request_system_info_repeated_calls_each_produce_one_event() {
    let (mut reader, mut writer, _handle) = spawn_session();
    let _ = next_event(&mut reader).await; // hello
    let _ = next_event(&mut reader).await; // initial system_info

    for _ in 0..3 {
        send(&mut writer, json!({"type": "request_system_info"})).await;
        assert!(matches!(
            next_run_event(&mut reader, 5).await,
            Event::SystemInfo { .. }
        ));
    }
}
