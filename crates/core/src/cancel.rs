// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot cancel signal (§3): set once by the Coordinator on
//! `request_cancel`, observed by the Supervisor's termination race.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Idempotent: a second call is a no-op.
    pub fn trigger(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelSignal::trigger`] has been called. Resolves
    /// immediately if it already has been.
    pub async fn wait(&self) {
        if self.is_set() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}
