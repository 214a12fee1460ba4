//! Tracked network requests.

use std::sync::Arc;

use crate::logging::RenderLog;
use crate::runtime::{NetworkApi, RequestEvent, RequestListener};
use crate::tracker::{OperationGuard, SettlementTracker, TerminalEvent};

/// [`NetworkApi`] decorator making every request a tracked operation.
///
/// The operation ends on the first of `loadend`, `error`, `abort` or
/// `timeout`, after page code has handled that event. `load` itself does not
/// end it: handlers usually finish their work on `loadend`. Runtimes report
/// `error` and then `loadend` for the same failure; only the first one
/// counts, the rest are still forwarded to page code.
pub struct TrackedNetwork {
    inner: Arc<dyn NetworkApi>,
    tracker: Arc<SettlementTracker>,
    log: Arc<dyn RenderLog>,
}

impl TrackedNetwork {
    /// Wrap `inner`, reporting BEGIN/END lines to `log`.
    pub fn new(inner: Arc<dyn NetworkApi>, tracker: Arc<SettlementTracker>, log: Arc<dyn RenderLog>) -> Self {
        Self { inner, tracker, log }
    }
}

impl NetworkApi for TrackedNetwork {
    fn open(&self, method: &str, url: &str, listener: Box<dyn RequestListener>) {
        let guard = self.tracker.begin(format!("Request {} {}", method, url));
        self.log.trace(&format!("Request BEGIN: {}", url), None);
        self.inner.open(
            method,
            url,
            Box::new(TrackedListener {
                url: url.to_string(),
                guard: Some(guard),
                log: Arc::clone(&self.log),
                inner: listener,
            }),
        );
    }
}

struct TrackedListener {
    url: String,
    guard: Option<OperationGuard>,
    log: Arc<dyn RenderLog>,
    inner: Box<dyn RequestListener>,
}

impl TrackedListener {
    fn finish(&mut self, event: &RequestEvent) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let (terminal, suffix) = match event {
            RequestEvent::Abort => (TerminalEvent::Abort, Some("aborted")),
            RequestEvent::Error(_) => (TerminalEvent::Error, Some("error")),
            RequestEvent::Timeout => (TerminalEvent::Timeout, Some("timeout")),
            _ => (TerminalEvent::Success, None),
        };
        guard.finish(terminal);
        match suffix {
            Some(suffix) => self
                .log
                .error(&format!("Request END:   {} ({})", self.url, suffix), None),
            None => self.log.trace(&format!("Request END:   {}", self.url), None),
        }
    }
}

impl RequestListener for TrackedListener {
    fn on_event(&mut self, event: &RequestEvent) {
        self.inner.on_event(event);
        if event.is_terminal() && !matches!(event, RequestEvent::Load { .. }) {
            self.finish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use bytes::Bytes;

    use crate::logging::MemoryLog;

    /// Keeps listeners so tests can drive them.
    #[derive(Default)]
    struct HeldRequests {
        listeners: Mutex<Vec<Box<dyn RequestListener>>>,
    }

    impl NetworkApi for HeldRequests {
        fn open(&self, _method: &str, _url: &str, listener: Box<dyn RequestListener>) {
            self.listeners.lock().unwrap().push(listener);
        }
    }

    impl HeldRequests {
        fn emit(&self, index: usize, event: RequestEvent) {
            self.listeners.lock().unwrap()[index].on_event(&event);
        }
    }

    fn setup() -> (Arc<HeldRequests>, Arc<SettlementTracker>, Arc<MemoryLog>, TrackedNetwork) {
        let native = Arc::new(HeldRequests::default());
        let tracker = Arc::new(SettlementTracker::new());
        let log = Arc::new(MemoryLog::new());
        let network = TrackedNetwork::new(native.clone(), tracker.clone(), log.clone());
        (native, tracker, log, network)
    }

    fn recorder() -> (Arc<Mutex<Vec<RequestEvent>>>, Box<dyn RequestListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |event: &RequestEvent| sink.lock().unwrap().push(event.clone())))
    }

    #[test]
    fn test_successful_request() {
        let (native, tracker, log, network) = setup();
        let (seen, listener) = recorder();
        network.open("GET", "http://localhost/api/items", listener);
        assert_eq!(tracker.pending(), 1);

        native.emit(0, RequestEvent::Progress { loaded: 3 });
        assert_eq!(tracker.pending(), 1, "progress is not terminal");
        native.emit(0, RequestEvent::Load { status: 200, body: Bytes::from_static(b"[]") });
        assert_eq!(tracker.pending(), 1, "held until loadend");
        native.emit(0, RequestEvent::LoadEnd);
        assert_eq!(tracker.pending(), 0);

        assert_eq!(seen.lock().unwrap().len(), 3, "every event reaches page code");
        assert!(log.contains("Request BEGIN: http://localhost/api/items"));
        assert!(log.contains("Request END:   http://localhost/api/items"));
        assert!(log.error_free());
    }

    #[test]
    fn test_error_then_loadend_counts_once() {
        let (native, tracker, log, network) = setup();
        let (seen, listener) = recorder();
        network.open("GET", "http://localhost/api/broken", listener);

        native.emit(0, RequestEvent::Error("connection refused".into()));
        native.emit(0, RequestEvent::LoadEnd);
        assert_eq!(tracker.pending(), 0);
        assert!(tracker.decrement().is_err(), "nothing left to release");
        assert!(log.contains("Request END:   http://localhost/api/broken (error)"));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_abort_and_timeout_log_errors() {
        let (native, tracker, log, network) = setup();
        network.open("GET", "http://localhost/a", recorder().1);
        network.open("GET", "http://localhost/b", recorder().1);
        assert_eq!(tracker.pending(), 2);

        native.emit(0, RequestEvent::Abort);
        native.emit(1, RequestEvent::Timeout);
        assert_eq!(tracker.pending(), 0);
        assert!(log.contains("(aborted)"));
        assert!(log.contains("(timeout)"));
    }

    #[test]
    fn test_handler_runs_before_request_is_released() {
        let (native, tracker, _log, network) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let inside = tracker.clone();
        network.open(
            "GET",
            "http://localhost/api/items",
            Box::new(move |event: &RequestEvent| {
                if !matches!(event, RequestEvent::Progress { .. }) {
                    sink.lock().unwrap().push(inside.pending());
                }
            }),
        );
        native.emit(0, RequestEvent::Error("reset".into()));
        native.emit(0, RequestEvent::LoadEnd);

        assert_eq!(*seen.lock().unwrap(), vec![1, 0], "error handled while counted, loadend after release");
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_dropped_listener_releases() {
        let (native, tracker, _log, network) = setup();
        network.open("GET", "http://localhost/forgotten", recorder().1);
        assert_eq!(tracker.pending(), 1);
        native.listeners.lock().unwrap().clear();
        assert_eq!(tracker.pending(), 0);
    }
}
