//! Cooperative cancellation for renders.
//!
//! An [`AbortController`] owns the right to cancel; the [`AbortSignal`]s it
//! hands out are cheap to clone and can be checked synchronously or awaited.
//! Cancellation only stops *waiting*: tracked operations already in flight
//! keep running and still settle the tracker.
//!
//! ```rust
//! use spa_prerender::AbortController;
//!
//! let controller = AbortController::new();
//! let signal = controller.signal();
//! assert!(!signal.is_aborted());
//! controller.abort();
//! assert!(signal.is_aborted());
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Owner side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct AbortController {
    sender: Arc<watch::Sender<bool>>,
}

impl AbortController {
    /// Create a controller that has not been aborted.
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// A signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Abort. Idempotent.
    pub fn abort(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    receiver: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that aborts itself after `duration`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime context.
    pub fn timeout(duration: Duration) -> AbortSignal {
        let controller = AbortController::new();
        let signal = controller.signal();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            log::debug!("Abort signal fired after {:?}", duration);
            controller.abort();
        });
        signal
    }

    /// Whether the signal has fired.
    pub fn is_aborted(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once the signal fires.
    ///
    /// Never resolves if the controller is dropped without aborting.
    pub async fn aborted(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
