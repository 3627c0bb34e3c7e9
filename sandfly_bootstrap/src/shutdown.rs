// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Cooperative Cancellation
//!
//! A process-wide cancel source that propagates a return code
//! (spec §5 "Cancellation semantics"). Every cancelable component
//! (Run Controller, File Rotator, Request Receiver, Batch Executor) holds
//! a [`CancelSource`] and observes it via timed waits so long waits notice
//! the cancel flag within one tick, instead of blocking unboundedly.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::sleep;

const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

/// Cheap, cloneable handle that observes whether the process has been
/// asked to cancel, and (once observed) waits for that cancellation to
/// actually happen.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// The process-wide cancel source. `cancel(code)` records the first
/// fatal-path return code and wakes every holder of the token.
pub struct CancelSource {
    token: CancellationToken,
    grace_period: Duration,
    shutdown_initiated: Arc<AtomicBool>,
    shutdown_complete: Arc<Notify>,
    return_code: Arc<AtomicI32>,
}

impl CancelSource {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace_period,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(Notify::new()),
            return_code: Arc::new(AtomicI32::new(0)),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelling(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    pub fn return_code(&self) -> i32 {
        self.return_code.load(Ordering::SeqCst)
    }

    /// Requests a process-wide cancel with the given return code. Only the
    /// first call's code is retained; later calls still wake waiters.
    pub fn cancel(&self, code: i32) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.return_code.store(code, Ordering::SeqCst);
        }
        self.token.cancel();
    }

    /// Signals that every long-lived component has finished unwinding.
    pub fn complete(&self) {
        self.shutdown_complete.notify_waiters();
    }

    /// Waits for `complete()` or the grace period, whichever comes first.
    pub async fn wait_for_complete(&self) {
        tokio::select! {
            _ = self.shutdown_complete.notified() => {}
            _ = sleep(self.grace_period) => {}
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS))
    }
}
