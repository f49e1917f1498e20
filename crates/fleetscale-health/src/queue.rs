//! Inbound health event queue.
//!
//! A bounded tokio channel of raw text payloads. Publishers are cheap to
//! clone and may live on any task; the single receiver belongs to the
//! dispatcher, and `take()` is the loop's only suspension point.

use tokio::sync::mpsc;
use tracing::warn;

/// Constructor for the publisher/receiver pair.
pub struct HealthEventQueue;

impl HealthEventQueue {
    /// Create a queue holding at most `capacity` undelivered payloads.
    pub fn bounded(capacity: usize) -> (HealthEventPublisher, HealthEventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (HealthEventPublisher { tx }, HealthEventReceiver { rx })
    }
}

/// Sending half of the queue.
#[derive(Clone)]
pub struct HealthEventPublisher {
    tx: mpsc::Sender<String>,
}

impl HealthEventPublisher {
    /// Enqueue a payload, waiting for room if the queue is full.
    /// Returns false once the receiver has gone away.
    pub async fn publish(&self, payload: impl Into<String>) -> bool {
        self.tx.send(payload.into()).await.is_ok()
    }

    /// Enqueue a payload without waiting. Returns false if the queue is
    /// full or closed.
    pub fn try_publish(&self, payload: impl Into<String>) -> bool {
        match self.tx.try_send(payload.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("health event queue full, payload dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Receiving half of the queue.
pub struct HealthEventReceiver {
    rx: mpsc::Receiver<String>,
}

impl HealthEventReceiver {
    /// Wait for the next payload. `None` once every publisher is dropped
    /// and the queue has drained.
    pub async fn take(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
