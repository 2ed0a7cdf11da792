//! Bounded queue subscriber.
//!
//! Both transports attach a [`QueueSubscriber`] to their session and drain
//! the paired [`QueueReceiver`] from their own task. Delivery never blocks
//! the session. A subscriber whose queue is full is closed rather than
//! skipped, so a slow consumer sees a prefix of the stream followed by one
//! `error` event, never a stream with holes in it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use protocol::StreamEvent;
use tokio::sync::mpsc;

use crate::session::Subscriber;

/// Message of the error event that ends an overflowed queue.
pub const OVERFLOW_MESSAGE: &str = "output queue overflowed; consumer too slow";

/// A subscriber backed by a bounded channel.
///
/// `close` drops the sending half, so the receiver yields the queued events
/// and then ends.
pub struct QueueSubscriber {
    /// Transport name for logs.
    label: &'static str,
    tx: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    sent: AtomicU64,
    overflowed: Arc<AtomicBool>,
}

/// Receiving half of a [`QueueSubscriber`].
pub struct QueueReceiver {
    rx: mpsc::Receiver<StreamEvent>,
    overflowed: Arc<AtomicBool>,
    finished: bool,
}

impl QueueSubscriber {
    /// Creates a subscriber and the receiver its transport drains.
    pub fn new(label: &'static str, capacity: usize) -> (Arc<Self>, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let overflowed = Arc::new(AtomicBool::new(false));
        let subscriber = Arc::new(Self {
            label,
            tx: Mutex::new(Some(tx)),
            sent: AtomicU64::new(0),
            overflowed: Arc::clone(&overflowed),
        });
        let receiver = QueueReceiver {
            rx,
            overflowed,
            finished: false,
        };
        (subscriber, receiver)
    }

    /// Returns this subscriber as a trait object for the gateway.
    pub fn as_subscriber(self: &Arc<Self>) -> Arc<dyn Subscriber> {
        self.clone()
    }

    /// Returns the number of events queued so far.
    pub fn events_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Returns whether the subscriber was closed because its queue filled up.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }
}

impl Subscriber for QueueSubscriber {
    fn enqueue(&self, event: StreamEvent) {
        let mut guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflowed.store(true, Ordering::Release);
                guard.take();
                tracing::warn!(
                    transport = self.label,
                    events_sent = self.sent.load(Ordering::Relaxed),
                    "Subscriber queue overflowed, closing subscriber"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!(transport = self.label, "Subscriber receiver gone");
            }
        }
    }

    fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl QueueReceiver {
    /// Receives the next event.
    ///
    /// After the subscriber is closed this yields the queued events, then
    /// one `error` event if the queue overflowed, then `None`.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => Some(event),
            None => {
                self.finished = true;
                self.overflowed
                    .load(Ordering::Acquire)
                    .then(|| StreamEvent::error(OVERFLOW_MESSAGE))
            }
        }
    }
}
