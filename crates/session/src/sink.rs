// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Applies the Output Classifier (§4.D) to a single run's line stream,
//! turning raw stdout/stderr into typed events. One instance per run;
//! `saw_oom`/`last_traceback_locus` are this run's observer state (§3).

use kd_core::{Event, RunId};
use kd_supervisor::classifier;
use kd_supervisor::LineSink;
use tokio::sync::mpsc::UnboundedSender;

pub struct EventSink {
    run_id: RunId,
    outbound: UnboundedSender<Event>,
    saw_oom: bool,
    last_traceback_locus: Option<String>,
}

impl EventSink {
    pub fn new(run_id: RunId, outbound: UnboundedSender<Event>) -> Self {
        Self {
            run_id,
            outbound,
            saw_oom: false,
            last_traceback_locus: None,
        }
    }
}

impl LineSink for EventSink {
    fn on_stdout(&mut self, line: String) {
        let event = match classifier::classify_stdout_line(&line) {
            Some(metric) => Event::Metric {
                run_id: self.run_id.clone(),
                name: metric.name,
                value: metric.value,
                step: metric.step,
            },
            None => Event::Stdout {
                run_id: self.run_id.clone(),
                data: line,
            },
        };
        let _ = self.outbound.send(event);
    }

    fn on_stderr(&mut self, line: String) {
        if let Some(locus) = classifier::traceback_locus(&line) {
            self.last_traceback_locus = Some(locus);
        }

        if !self.saw_oom && classifier::is_oom_line(&line) {
            self.saw_oom = true;
            let _ = self.outbound.send(Event::Oom {
                run_id: self.run_id.clone(),
                message: line,
                likely_location: self.last_traceback_locus.clone(),
                suggestions: classifier::oom_suggestions(),
            });
            return;
        }

        let _ = self.outbound.send(Event::Stderr {
            run_id: self.run_id.clone(),
            data: line,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn run_id() -> RunId {
        RunId::from_generated("550e8400-e29b-41d4-a716-446655440000".into())
    }

    #[test]
    fn metric_sentinel_line_emits_metric_not_stdout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = EventSink::new(run_id(), tx);
        sink.on_stdout(r#"__METRIC__:{"name":"loss","value":1.0,"step":1}"#.to_string());
        match rx.try_recv().unwrap() {
            Event::Metric { name, .. } => assert_eq!(name, "loss"),
            other => panic!("expected metric event, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ordinary_line_emits_stdout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = EventSink::new(run_id(), tx);
        sink.on_stdout("hello".to_string());
        match rx.try_recv().unwrap() {
            Event::Stdout { data, .. } => assert_eq!(data, "hello"),
            other => panic!("expected stdout event, got {other:?}"),
        }
    }

    #[test]
    fn first_oom_line_emits_oom_event_with_last_traceback_locus() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = EventSink::new(run_id(), tx);
        sink.on_stderr(r#"  File "main.py", line 10, in <module>"#.to_string());
        sink.on_stderr("RuntimeError: CUDA out of memory.".to_string());

        // traceback line forwarded as ordinary stderr
        match rx.try_recv().unwrap() {
            Event::Stderr { data, .. } => assert!(data.contains("main.py")),
            other => panic!("expected stderr event, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            Event::Oom {
                likely_location,
                suggestions,
                ..
            } => {
                assert_eq!(likely_location.as_deref(), Some("main.py:10"));
                assert!(!suggestions.is_empty());
            }
            other => panic!("expected oom event, got {other:?}"),
        }
    }

    #[test]
    fn subsequent_oom_lines_forward_as_ordinary_stderr() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = EventSink::new(run_id(), tx);
        sink.on_stderr("out of memory".to_string());
        sink.on_stderr("out of memory again".to_string());

        assert!(matches!(rx.try_recv().unwrap(), Event::Oom { .. }));
        match rx.try_recv().unwrap() {
            Event::Stderr { data, .. } => assert_eq!(data, "out of memory again"),
            other => panic!("expected stderr event, got {other:?}"),
        }
    }
}
