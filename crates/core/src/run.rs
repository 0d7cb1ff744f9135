// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run identifier and run record (§3).

use std::fmt;
use std::time::Instant;
use thiserror::Error;

use crate::cancel::CancelSignal;

/// A run identifier: a 128-bit UUID in canonical hyphenated form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("not a canonical UUID: {0}")]
pub struct NotUuid(pub String);

impl RunId {
    /// Wrap an id already known to have been produced by `IdGen::next`.
    pub fn from_generated(id: String) -> Self {
        Self(id)
    }

    /// Parse a client-supplied string, rejecting anything that isn't a
    /// canonical UUID. Used by the Coordinator to reject malformed
    /// `cancel` frames (§3, §4.G).
    pub fn parse(raw: &str) -> Result<Self, NotUuid> {
        uuid::Uuid::parse_str(raw)
            .map(|_| Self(raw.to_string()))
            .map_err(|_| NotUuid(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observer state accumulated over the lifetime of a run: has an OOM
/// already been reported, and where was the last traceback frame seen.
#[derive(Debug, Clone, Default)]
pub struct ObserverState {
    pub saw_oom: bool,
    pub last_traceback_locus: Option<String>,
}

/// A run record, existing only while a child lives (§3).
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: RunId,
    pub started_at: Instant,
    pub timeout_secs: u64,
    pub cancel_signal: CancelSignal,
    pub observer: ObserverState,
}

/// Default client-supplied timeout, in seconds (§6 Defaults).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

impl RunRecord {
    pub fn new(run_id: RunId, started_at: Instant, timeout_secs: u64) -> Self {
        Self {
            run_id,
            started_at,
            timeout_secs,
            cancel_signal: CancelSignal::new(),
            observer: ObserverState::default(),
        }
    }
}
