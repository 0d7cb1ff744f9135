// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound event union (§3, §6): the typed messages streamed back to a
//! connected front-end.

use crate::run::RunId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One GPU telemetry sample (§4.E).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub index: u32,
    pub name: String,
    pub utilization_gpu: u32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub temperature_c: u32,
}

/// CPU telemetry sample (§4.E).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub utilization: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f32>,
}

/// The fixed, ordered OOM remediation suggestions delivered verbatim (§6).
pub const OOM_SUGGESTIONS: &[&str] = &[
    "reduce batch size",
    "enable mixed precision",
    "gradient accumulation",
    "reduce input resolution/sequence length",
    "activation checkpointing",
    "free unused tensors and cache",
    "offload/chunk large tensors",
];

/// The outbound event union. Every data-carrying event except `Hello`,
/// `Hw`, and `SystemInfo` carries the owning `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Hello {
        python: String,
        executable: String,
    },
    SystemInfo {
        data: Value,
    },
    Start {
        run_id: RunId,
    },
    Stdout {
        run_id: RunId,
        data: String,
    },
    Stderr {
        run_id: RunId,
        data: String,
    },
    Metric {
        run_id: RunId,
        name: String,
        value: Value,
        step: i64,
    },
    Hw {
        ts_ms: u64,
        gpus: Vec<GpuSnapshot>,
        cpu: CpuSnapshot,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Oom {
        run_id: RunId,
        message: String,
        likely_location: Option<String>,
        suggestions: Vec<String>,
    },
    Done {
        run_id: RunId,
        exit_code: Option<i32>,
        timed_out: bool,
        cancelled: bool,
    },
    Error {
        message: String,
        run_id: Option<RunId>,
    },
}

impl Event {
    pub fn oom_suggestions() -> Vec<String> {
        OOM_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_event_round_trips_with_run_id_field() {
        let run_id = RunId::from_generated("550e8400-e29b-41d4-a716-446655440000".into());
        let event = Event::Start {
            run_id: run_id.clone(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["run_id"], run_id.as_str());
    }

    #[test]
    fn error_event_allows_null_run_id() {
        let event = Event::Error {
            message: "Unsupported message".into(),
            run_id: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["run_id"], Value::Null);
    }

    #[test]
    fn non_ascii_literal_is_preserved_not_escaped() {
        let event = Event::Error {
            message: "安全检查未通过".into(),
            run_id: None,
        };
        let encoded = serde_json::to_string(&event).unwrap();
        assert!(encoded.contains("安全检查未通过"));
    }
}
