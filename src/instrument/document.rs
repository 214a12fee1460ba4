//! Tracking of the initial document load.

use std::sync::Arc;

use crate::runtime::WindowSetup;
use crate::tracker::{SettlementTracker, TerminalEvent};

/// Count the document load as one operation.
///
/// Begins immediately and ends when the runtime runs the window's `load`
/// listeners. If the runtime drops the listeners without running them
/// (construction failed), the operation is released as cancelled.
pub fn track_document_load(window: &mut WindowSetup, tracker: &Arc<SettlementTracker>) {
    let guard = tracker.begin("Document load");
    window.on_load(Box::new(move || guard.finish(TerminalEvent::Success)));
}
