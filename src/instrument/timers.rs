//! Tracked timers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{TimerDelay, TimerPolicy};
use crate::runtime::{IntervalTask, Task, TimerApi, TimerHandle};
use crate::tracker::{OperationGuard, SettlementTracker, TerminalEvent};

/// A scheduled timeout that has not fired or been cleared.
struct Pending {
    inner: Option<TimerHandle>,
    guard: OperationGuard,
}

/// [`TimerApi`] decorator making every scheduled timeout a tracked
/// operation.
///
/// Handles returned to page code are minted here and mapped to the inner
/// primitive's handles, so clearing a fired or unknown handle can be
/// recognised and never decrements twice.
pub struct TrackedTimers {
    inner: Arc<dyn TimerApi>,
    tracker: Arc<SettlementTracker>,
    policy: TimerPolicy,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, Pending>>>,
}

impl TrackedTimers {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn TimerApi>, tracker: Arc<SettlementTracker>, policy: TimerPolicy) -> Self {
        Self {
            inner,
            tracker,
            policy,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Timeouts scheduled but not yet fired or cleared.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Pending>> {
        lock(&self.pending)
    }

    fn mint(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn lock(pending: &Mutex<HashMap<u64, Pending>>) -> MutexGuard<'_, HashMap<u64, Pending>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TimerApi for TrackedTimers {
    fn set_timeout(&self, delay: Duration, callback: Task) -> TimerHandle {
        let id = self.mint();
        let delay = match self.policy.remap(delay) {
            TimerDelay::After(delay) => delay,
            TimerDelay::Never => {
                log::trace!("Timer {} ({:?}) deferred indefinitely", id, delay);
                return TimerHandle(id);
            }
        };

        let guard = self.tracker.begin(format!("Timer {}", id));
        self.lock().insert(id, Pending { inner: None, guard });

        let registry = Arc::downgrade(&self.pending);
        let inner = self.inner.set_timeout(
            delay,
            Box::new(move || {
                let entry = registry
                    .upgrade()
                    .and_then(|registry| lock(&registry).remove(&id));
                // A cleared timer must not run even if the runtime fires it.
                // The handler runs while the timer is still counted, so work
                // it schedules is tracked before this one is released.
                if let Some(entry) = entry {
                    callback();
                    entry.guard.finish(TerminalEvent::Success);
                }
            }),
        );
        // Absent if the runtime already fired it synchronously.
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.inner = Some(inner);
        }
        TimerHandle(id)
    }

    fn clear_timeout(&self, handle: TimerHandle) {
        let entry = self.lock().remove(&handle.0);
        if let Some(entry) = entry {
            if let Some(inner) = entry.inner {
                self.inner.clear_timeout(inner);
            }
            entry.guard.finish(TerminalEvent::Cancelled);
        }
    }

    fn set_interval(&self, period: Duration, _callback: IntervalTask) -> TimerHandle {
        let id = self.mint();
        log::trace!("Interval {} ({:?}) accepted but never run", id, period);
        TimerHandle(id)
    }

    fn clear_interval(&self, _handle: TimerHandle) {}
}
