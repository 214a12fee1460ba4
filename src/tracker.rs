//! Pending-work counter that answers "is there outstanding async work".
//!
//! This module provides [`SettlementTracker`] and [`OperationGuard`].
//! Every instrumented asynchronous primitive (timer, request, image load,
//! document load, resource fetch) begins a tracked operation when it starts
//! and finishes it exactly once when it reaches a terminal event.
//!
//! # Zero signal
//!
//! ```text
//!            increment (0 → 1)
//!   Idle  ─────────────────────▶  Armed(watch::Sender)
//!    ▲                                  │
//!    └──────────────────────────────────┘
//!       decrement (1 → 0): send(true), back to Idle
//! ```
//!
//! Waiters subscribe to the armed sender, so every waiter registered during
//! one busy period observes the single resolution of that period.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use spa_prerender::tracker::{SettlementTracker, TerminalEvent};
//!
//! # tokio_test::block_on(async {
//! let tracker = Arc::new(SettlementTracker::new());
//! assert!(!tracker.wait_for_zero().await, "nothing was pending");
//!
//! let op = tracker.begin("fetch main.dart.js");
//! let waiter = tracker.wait_for_zero();
//! op.finish(TerminalEvent::Success);
//! assert!(waiter.await, "work happened and settled");
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::{RenderError, Result};

/// How a tracked operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalEvent {
    /// Completed normally.
    Success,
    /// Failed.
    Error,
    /// Aborted by the page.
    Abort,
    /// Timed out.
    Timeout,
    /// Cancelled or dropped before reaching any other terminal event.
    Cancelled,
}

impl fmt::Display for TerminalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminalEvent::Success => "success",
            TerminalEvent::Error => "error",
            TerminalEvent::Abort => "aborted",
            TerminalEvent::Timeout => "timeout",
            TerminalEvent::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The zero-reached signal: either nobody can be waiting, or a single-shot
/// broadcast is armed for the current busy period.
enum ZeroSignal {
    Idle,
    Armed(watch::Sender<bool>),
}

struct TrackerState {
    count: usize,
    signal: ZeroSignal,
    activity: bool,
}

/// Counter of outstanding tracked operations for one environment.
///
/// Lives as long as the environment and is shared by every render against
/// it; it is never reset between renders.
pub struct SettlementTracker {
    state: Mutex<TrackerState>,
    started: AtomicU64,
}

impl SettlementTracker {
    /// Create an idle tracker with no pending work.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                count: 0,
                signal: ZeroSignal::Idle,
                activity: false,
            }),
            started: AtomicU64::new(0),
        }
    }

    // Bookkeeping never leaves the state half-updated, so a poisoned lock
    // still holds consistent data.
    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark one more unit of outstanding work.
    ///
    /// Prefer [`begin`](Self::begin), which pairs the decrement for you.
    pub fn increment(&self) {
        let mut state = self.state();
        state.count += 1;
        state.activity = true;
        if state.count == 1 {
            let (tx, _rx) = watch::channel(false);
            state.signal = ZeroSignal::Armed(tx);
        }
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark one unit of work finished.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnpairedTracking`] if the counter is already
    /// zero. The counter is left untouched in that case.
    pub fn decrement(&self) -> Result<()> {
        let mut state = self.state();
        if state.count == 0 {
            return Err(RenderError::UnpairedTracking);
        }
        state.count -= 1;
        if state.count == 0 {
            if let ZeroSignal::Armed(tx) = std::mem::replace(&mut state.signal, ZeroSignal::Idle) {
                tx.send_replace(true);
            }
        }
        Ok(())
    }

    /// Wait until the counter returns to zero.
    ///
    /// Resolves to `true` once the current busy period ends, or immediately
    /// to `false` if nothing is pending right now. The subscription is taken
    /// synchronously when this method is called, not when the future is
    /// first polled.
    pub fn wait_for_zero(&self) -> impl Future<Output = bool> + Send + 'static {
        let receiver = match &self.state().signal {
            ZeroSignal::Idle => None,
            ZeroSignal::Armed(tx) => Some(tx.subscribe()),
        };
        async move {
            match receiver {
                None => false,
                Some(mut rx) => {
                    // A closed channel means the tracker itself is gone.
                    let _ = rx.wait_for(|reached| *reached).await;
                    true
                }
            }
        }
    }

    /// Number of operations currently outstanding.
    pub fn pending(&self) -> usize {
        self.state().count
    }

    /// Whether the tracker is idle (no busy period in progress).
    pub fn is_idle(&self) -> bool {
        matches!(self.state().signal, ZeroSignal::Idle)
    }

    /// Total number of operations ever started on this tracker.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Record that something observable happened without tracking it as
    /// pending work.
    pub fn mark_activity(&self) {
        self.state().activity = true;
    }

    /// Read and clear the activity flag.
    pub fn take_activity(&self) -> bool {
        std::mem::take(&mut self.state().activity)
    }

    /// Begin a tracked operation.
    ///
    /// The returned guard decrements exactly once: on
    /// [`finish`](OperationGuard::finish) or, failing that, on drop.
    pub fn begin(self: &Arc<Self>, label: impl Into<String>) -> OperationGuard {
        self.increment();
        OperationGuard {
            tracker: Arc::clone(self),
            label: label.into(),
            finished: false,
        }
    }
}

impl Default for SettlementTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SettlementTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("SettlementTracker")
            .field("pending", &state.count)
            .field("armed", &matches!(state.signal, ZeroSignal::Armed(_)))
            .field("activity", &state.activity)
            .finish()
    }
}

/// RAII handle for one tracked operation.
///
/// Holds one unit of the tracker's count. The unit is released exactly once,
/// either explicitly through [`finish`](Self::finish) or implicitly with
/// [`TerminalEvent::Cancelled`] when the guard is dropped. Because the
/// release lives in `Drop`, it also runs while unwinding from a panicking
/// callback.
pub struct OperationGuard {
    tracker: Arc<SettlementTracker>,
    label: String,
    finished: bool,
}

impl OperationGuard {
    /// What this operation is, for log lines.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// End the operation with the given terminal event.
    pub fn finish(mut self, event: TerminalEvent) {
        self.release(event);
    }

    fn release(&mut self, event: TerminalEvent) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self.tracker.decrement() {
            Ok(()) => log::trace!("Tracked operation finished ({}): {}", event, self.label),
            Err(e) => log::error!("{} while finishing '{}'", e, self.label),
        }
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.release(TerminalEvent::Cancelled);
    }
}

impl fmt::Debug for OperationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationGuard")
            .field("label", &self.label)
            .field("finished", &self.finished)
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
