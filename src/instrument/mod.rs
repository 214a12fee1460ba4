//! Instrumentation of the runtime's asynchronous primitives.
//!
//! Every primitive that can keep a page busy is wrapped so each unit of
//! work becomes a tracked operation on the environment's
//! [`SettlementTracker`]:
//!
//! | Primitive | Wrapper | Operation starts | Operation ends |
//! |-----------|---------|------------------|----------------|
//! | Timers | [`TrackedTimers`] | `set_timeout` | handler returned, or `clear_timeout` |
//! | Network | [`TrackedNetwork`] | `open` | first of `loadend` / `error` / `abort` / `timeout` handled |
//! | Images | [`TrackedImages`] | each `set_src` | load / error callback returned |
//! | Document | [`track_document_load`] | environment construction | `load` listeners run |
//!
//! Handlers run while their operation is still counted, so anything they
//! schedule is tracked before the operation that triggered it ends.
//!
//! The wrappers are plain decorators over the trait objects in
//! [`WindowSetup`]; [`install`] applies all of them from an init hook.

pub mod document;
pub mod images;
pub mod network;
pub mod timers;

use std::sync::Arc;
use std::time::Duration;

pub use document::track_document_load;
pub use images::TrackedImages;
pub use network::TrackedNetwork;
pub use timers::TrackedTimers;

use crate::logging::RenderLog;
use crate::runtime::WindowSetup;
use crate::tracker::SettlementTracker;

/// What a requested timer delay becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDelay {
    /// Schedule after this delay.
    After(Duration),
    /// Accept the timer but never run it.
    Never,
}

/// Remaps delays requested by page code.
///
/// Long timers (polling, session keep-alives, animations far in the
/// future) would otherwise hold every render open until they fire.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use spa_prerender::instrument::{TimerDelay, TimerPolicy};
///
/// let policy = TimerPolicy {
///     defer_threshold: Some(Duration::from_secs(10)),
///     max_delay: Some(Duration::from_millis(100)),
/// };
/// assert_eq!(policy.remap(Duration::from_millis(5)), TimerDelay::After(Duration::from_millis(5)));
/// assert_eq!(policy.remap(Duration::from_secs(2)), TimerDelay::After(Duration::from_millis(100)));
/// assert_eq!(policy.remap(Duration::from_secs(30)), TimerDelay::Never);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerPolicy {
    /// Delays at or above this are never scheduled.
    pub defer_threshold: Option<Duration>,
    /// Remaining delays are capped at this.
    pub max_delay: Option<Duration>,
}

impl TimerPolicy {
    /// Pass every delay through unchanged.
    pub const fn passthrough() -> Self {
        Self {
            defer_threshold: None,
            max_delay: None,
        }
    }

    /// Apply the policy to `requested`.
    pub fn remap(&self, requested: Duration) -> TimerDelay {
        if self.defer_threshold.is_some_and(|threshold| requested >= threshold) {
            return TimerDelay::Never;
        }
        match self.max_delay {
            Some(max) => TimerDelay::After(requested.min(max)),
            None => TimerDelay::After(requested),
        }
    }
}

/// Wrap every primitive in `window` and begin tracking the document load.
///
/// Must run from the init hook, before page code can obtain the natives.
pub fn install(
    window: &mut WindowSetup,
    tracker: &Arc<SettlementTracker>,
    log: Arc<dyn RenderLog>,
    policy: TimerPolicy,
) {
    window.timers = Arc::new(TrackedTimers::new(
        Arc::clone(&window.timers),
        Arc::clone(tracker),
        policy,
    ));
    window.network = Arc::new(TrackedNetwork::new(
        Arc::clone(&window.network),
        Arc::clone(tracker),
        log,
    ));
    window.images = Arc::new(TrackedImages::new(
        Arc::clone(&window.images),
        Arc::clone(tracker),
    ));
    track_document_load(window, tracker);
    log::trace!("Instrumentation installed");
}
