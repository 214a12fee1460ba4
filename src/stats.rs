//! Renderer statistics for monitoring and health checks.
//!
//! This module provides [`RendererStats`], a snapshot of the renderer's
//! counters.
//!
//! # Example
//!
//! ```rust,ignore
//! let stats = renderer.stats();
//! println!("{} environments, {} renders", stats.environments, stats.renders_total());
//! ```

/// Snapshot of renderer statistics at a point in time.
///
/// # Fields
///
/// | Field | Description |
/// |-------|-------------|
/// | `environments` | Environments currently cached (ready) |
/// | `constructions` | Environment constructions attempted, including failures |
/// | `renders_succeeded` | Renders that returned markup |
/// | `renders_failed` | Renders that returned an error |
/// | `renders_in_flight` | Renders queued or running right now |
///
/// # Example
///
/// ```rust
/// use spa_prerender::RendererStats;
///
/// let stats = RendererStats {
///     environments: 2,
///     constructions: 2,
///     renders_succeeded: 10,
///     renders_failed: 1,
///     renders_in_flight: 0,
/// };
///
/// assert_eq!(stats.renders_total(), 11);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    /// Number of environments currently cached.
    ///
    /// Environments still under construction are not counted.
    pub environments: usize,

    /// Number of environment constructions attempted.
    ///
    /// A failed construction is counted and retried by the next render for
    /// the same identity, so this can exceed `environments`.
    pub constructions: u64,

    /// Number of renders that produced markup.
    pub renders_succeeded: u64,

    /// Number of renders that failed for any reason (closed, aborted,
    /// timed out, construction errors).
    pub renders_failed: u64,

    /// Renders waiting in a queue or running.
    ///
    /// # Note
    ///
    /// This value can change immediately after reading.
    pub renders_in_flight: usize,
}

impl RendererStats {
    /// Total completed renders.
    #[inline]
    pub fn renders_total(&self) -> u64 {
        self.renders_succeeded + self.renders_failed
    }

    /// Whether the renderer is doing nothing right now.
    ///
    /// ```rust
    /// use spa_prerender::RendererStats;
    ///
    /// assert!(RendererStats::default().is_idle());
    /// ```
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.renders_in_flight == 0
    }
}

impl std::fmt::Display for RendererStats {
    /// Format stats for logging.
    ///
    /// # Example
    ///
    /// ```rust
    /// use spa_prerender::RendererStats;
    ///
    /// let stats = RendererStats {
    ///     environments: 1,
    ///     constructions: 1,
    ///     renders_succeeded: 3,
    ///     renders_failed: 0,
    ///     renders_in_flight: 1,
    /// };
    ///
    /// assert_eq!(
    ///     stats.to_string(),
    ///     "RendererStats { environments: 1, constructions: 1, succeeded: 3, failed: 0, in_flight: 1 }"
    /// );
    /// ```
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RendererStats {{ environments: {}, constructions: {}, succeeded: {}, failed: {}, in_flight: {} }}",
            self.environments,
            self.constructions,
            self.renders_succeeded,
            self.renders_failed,
            self.renders_in_flight
        )
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies the renders_total() convenience method.
    #[test]
    fn test_renders_total() {
        let stats = RendererStats {
            renders_succeeded: 7,
            renders_failed: 2,
            ..Default::default()
        };
        assert_eq!(stats.renders_total(), 9);
    }

    /// Verifies is_idle() method.
    #[test]
    fn test_is_idle() {
        let busy = RendererStats {
            renders_in_flight: 2,
            ..Default::default()
        };
        assert!(!busy.is_idle());
        assert!(RendererStats::default().is_idle());
    }

    /// Verifies Display implementation.
    #[test]
    fn test_display() {
        let stats = RendererStats {
            environments: 2,
            constructions: 3,
            renders_succeeded: 4,
            renders_failed: 1,
            renders_in_flight: 0,
        };

        assert_eq!(
            stats.to_string(),
            "RendererStats { environments: 2, constructions: 3, succeeded: 4, failed: 1, in_flight: 0 }"
        );
    }
}
