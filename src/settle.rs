//! Quiescence detection.
//!
//! [`settle`] decides when a page has stopped doing things. A single
//! "counter is zero" check is not enough: a timer that fires, starts a
//! request, whose completion schedules another timer, can bring the counter
//! to zero between every step while new work is queued in the same tick. So
//! each pass asks two questions:
//!
//! 1. Was tracked work outstanding (did we have to wait for zero)?
//! 2. Did anything new begin during the pass (the tracker's activity flag)?
//!
//! The loop ends after the first pass where both answers are no.

use std::time::Instant;

use crate::abort::AbortSignal;
use crate::error::{RenderError, Result};
use crate::runtime::EventLoop;
use crate::tracker::SettlementTracker;

/// Outcome of a successful [`settle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Number of passes run, including the final quiet one.
    pub passes: usize,
    /// Passes that had to wait for outstanding work.
    pub waited: usize,
}

/// Drive the event loop until the page is quiet.
///
/// Checks `signal` at the start of every pass and while waiting, failing
/// with [`RenderError::Aborted`] once it fires. Aborting never touches the
/// tracker: operations in flight keep running and settle it later.
///
/// # Example
///
/// ```rust,ignore
/// let settlement = settle(&*runtime, &tracker, Some(&signal)).await?;
/// log::debug!("settled after {} passes", settlement.passes);
/// ```
pub async fn settle<E>(
    event_loop: &E,
    tracker: &SettlementTracker,
    signal: Option<&AbortSignal>,
) -> Result<Settlement>
where
    E: EventLoop + ?Sized,
{
    let started = Instant::now();
    let mut settlement = Settlement {
        passes: 0,
        waited: 0,
    };

    loop {
        if signal.is_some_and(AbortSignal::is_aborted) {
            log::debug!(
                "Settle aborted after {} passes ({} operations pending)",
                settlement.passes,
                tracker.pending()
            );
            return Err(RenderError::Aborted);
        }

        event_loop.run_pending().await;

        let zero = tracker.wait_for_zero();
        let waited = match signal {
            Some(signal) => tokio::select! {
                waited = zero => waited,
                _ = signal.aborted() => {
                    log::debug!(
                        "Settle aborted while waiting ({} operations pending)",
                        tracker.pending()
                    );
                    return Err(RenderError::Aborted);
                }
            },
            None => zero.await,
        };
        let activity = tracker.take_activity();

        settlement.passes += 1;
        if waited {
            settlement.waited += 1;
        }
        log::trace!(
            "Settle pass {}: waited={}, activity={}",
            settlement.passes,
            waited,
            activity
        );

        if !waited && !activity {
            break;
        }
    }

    log::debug!(
        "Page settled after {} passes in {:?}",
        settlement.passes,
        started.elapsed()
    );
    Ok(settlement)
}

// ============================================================================
// Unit Tests
// ============================================================================
