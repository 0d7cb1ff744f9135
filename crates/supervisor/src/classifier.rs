// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output Classifier (§4.D): applied inside the Supervisor's line
//! callbacks to turn raw stdout/stderr lines into typed events.

use kd_core::event::OOM_SUGGESTIONS;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const METRIC_PREFIX: &str = "__METRIC__";

const OOM_NEEDLES: &[&str] = &[
    "out of memory",
    "cuda out of memory",
    "cublas_status_alloc_failed",
    "resource exhausted",
];

/// A decoded metric sentinel line.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: Value,
    pub step: i64,
}

/// Try to parse a stdout line as a `__METRIC__` sentinel. On any failure
/// the caller should forward the original line as ordinary stdout.
pub fn classify_stdout_line(line: &str) -> Option<Metric> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix(METRIC_PREFIX)?;
    let rest = rest.strip_prefix(':').unwrap_or(rest);
    let value: Value = serde_json::from_str(rest.trim()).ok()?;
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.to_string();
    let metric_value = obj.get("value")?.clone();
    let step = obj
        .get("step")
        .and_then(coerce_step)
        .unwrap_or(0);
    Some(Metric {
        name,
        value: metric_value,
        step,
    })
}

fn coerce_step(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

/// True if the line matches one of the fixed OOM needles, case-insensitively.
pub fn is_oom_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    OOM_NEEDLES.iter().any(|needle| lower.contains(needle))
}

pub fn oom_suggestions() -> Vec<String> {
    OOM_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
}

fn traceback_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r#"^\s*File "(?P<path>[^"]+)", line (?P<line>\d+), in "#)
            .expect("traceback regex is a fixed, valid pattern")
    })
}

/// Extract a `path:line` traceback locus from a stderr line, if it has
/// the shape `  File "<path>", line <n>, in <...>`.
pub fn traceback_locus(line: &str) -> Option<String> {
    let caps = traceback_regex().captures(line)?;
    let path = &caps["path"];
    let lineno = &caps["line"];
    Some(format!("{path}:{lineno}"))
}

/// Strip the staging/workspace root prefix from a `File "<root>..."`
/// stderr line (§4.C traceback path rewrite).
pub fn strip_root_prefix(line: &str, root: &str) -> String {
    if !line.contains("File \"") {
        return line.to_string();
    }
    let root = root.trim_end_matches(['/', '\\']);
    line.replace(&format!("File \"{root}/"), "File \"")
        .replace(&format!("File \"{root}\\"), "File \"")
}
