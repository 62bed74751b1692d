//! # Session Events
//!
//! Lifecycle and error signals for one session, fanned out over a
//! `tokio::sync::broadcast` channel.
//!
//! Each subscriber sees every event published after it subscribed, once.
//! Callback observers run on their own task, so a slow observer never
//! stalls frame processing.
//!
//! Closing the hub drops the sender: subscribers drain whatever is already
//! queued and then see the end of the stream.

use crate::domain::error::RpcError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Signal observable by the embedding application
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Transport opened; the session can carry calls
    Connected,
    /// Transport closed; the session is being torn down
    Disconnected,
    /// Recoverable failure (decode error, orphan response, transport hiccup)
    Error(Arc<RpcError>),
}

/// Broadcast hub for [`SessionEvent`]s
pub struct EventHub {
    sender: Mutex<Option<broadcast::Sender<SessionEvent>>>,
    events_published: AtomicU64,
    capacity: usize,
}

impl EventHub {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            events_published: AtomicU64::new(0),
            capacity,
        }
    }

    /// Publish an event.
    ///
    /// Returns the number of subscribers that will receive it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let Some(sender) = self.sender.lock().clone() else {
            debug!(event = ?event, "Event dropped (hub closed)");
            return 0;
        };

        self.events_published.fetch_add(1, Ordering::Relaxed);
        match sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(event = ?event, "Event dropped (no subscribers)");
                0
            }
        }
    }

    /// Subscribe to events published from now on.
    ///
    /// Subscribing to a closed hub yields a subscription that ends immediately.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        let receiver = match self.sender.lock().as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        };
        EventSubscription { receiver }
    }

    /// Run `observer` for every event on a dedicated task.
    pub fn spawn_observer<F>(&self, mut observer: F) -> JoinHandle<()>
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                observer(event);
            }
        })
    }

    /// Stop accepting events. Idempotent.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Receiving side of an [`EventHub`]
pub struct EventSubscription {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl EventSubscription {
    /// Receive the next event.
    ///
    /// Returns `None` once the hub is closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(lagged = count, "Event subscriber lagged, some events dropped");
                    continue;
                }
            }
        }
    }

    /// Try to receive the next event without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
