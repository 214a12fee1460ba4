//! Tracked image loads.

use std::sync::Arc;

use crate::runtime::{ImageApi, ImageCallback, ImageElement, ImageOutcome};
use crate::tracker::{SettlementTracker, TerminalEvent};

/// [`ImageApi`] decorator whose elements track every `src` assignment.
pub struct TrackedImages {
    inner: Arc<dyn ImageApi>,
    tracker: Arc<SettlementTracker>,
}

impl TrackedImages {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn ImageApi>, tracker: Arc<SettlementTracker>) -> Self {
        Self { inner, tracker }
    }
}

impl ImageApi for TrackedImages {
    fn create_image(&self) -> Box<dyn ImageElement> {
        Box::new(TrackedImage {
            inner: self.inner.create_image(),
            tracker: Arc::clone(&self.tracker),
        })
    }
}

struct TrackedImage {
    inner: Box<dyn ImageElement>,
    tracker: Arc<SettlementTracker>,
}

impl ImageElement for TrackedImage {
    fn set_src(&mut self, src: &str, on_settled: ImageCallback) {
        let guard = self.tracker.begin(format!("Image {}", src));
        self.inner.set_src(
            src,
            Box::new(move |outcome: ImageOutcome| {
                let event = match &outcome {
                    ImageOutcome::Loaded => TerminalEvent::Success,
                    ImageOutcome::Failed(_) => TerminalEvent::Error,
                };
                on_settled(outcome);
                guard.finish(event);
            }),
        );
    }

    fn src(&self) -> Option<String> {
        self.inner.src()
    }
}
