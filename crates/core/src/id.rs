// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run identifier generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generates run identifiers. Swappable so tests get deterministic ids.
pub trait IdGen: Clone + Send + Sync + 'static {
    fn next(&self) -> String;
}

/// UUID v4-based generator; the canonical hyphenated form is what
/// the wire protocol requires for `run_id`.
#[derive(Clone, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn next(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Sequential, non-UUID generator for tests that need predictable ids.
///
/// Never wire this into a real session: `run.rs`'s `RunId::parse` rejects
/// anything that isn't a canonical UUID, so code exercising the coordinator
/// against a live cancel/submit flow must still construct `RunId` values
/// from `UuidIdGen` or a fixed UUID literal.
#[derive(Clone)]
pub struct SequentialIdGen {
    prefix: String,
    counter: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl IdGen for SequentialIdGen {
    fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_id_gen_produces_unique_canonical_uuids() {
        let gen = UuidIdGen;
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn sequential_id_gen_increments() {
        let gen = SequentialIdGen::new("run");
        assert_eq!(gen.next(), "run-1");
        assert_eq!(gen.next(), "run-2");
    }
}
