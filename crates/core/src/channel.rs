//! Bounded, lossy frame channel.
//!
//! A [`FrameChannel`] carries [`FrameMessage`]s from one producer to the
//! consumers attached to it. It never holds more than `capacity` pending
//! messages. A producer that finds the channel full waits at most its
//! enqueue timeout and then drops the new message; recency wins over
//! completeness, and the drop is reported as an [`EnqueueOutcome`], never
//! as an error.
//!
//! Consumers dequeue with a bounded wait and can tell "nothing yet"
//! ([`Dequeued::Empty`]) apart from "this channel has been removed"
//! ([`Dequeued::Gone`]).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::frame::FrameMessage;

/// Default number of pending messages a channel holds.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 30;

/// Default producer wait before a message is dropped.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Result of a producer's enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// The channel stayed full (or was closed) for the whole wait.
    Dropped,
}

/// Result of a consumer's dequeue attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued {
    Message(FrameMessage),
    /// Nothing arrived within the wait.
    Empty,
    /// The channel was closed; nothing will ever arrive.
    Gone,
}

/// Bounded single-producer channel of frame messages.
#[derive(Debug)]
pub struct FrameChannel {
    tx: mpsc::Sender<FrameMessage>,
    rx: Mutex<mpsc::Receiver<FrameMessage>>,
    capacity: usize,
    closed: CancellationToken,
    subscribers: AtomicUsize,
    dropped: AtomicU64,
}

impl FrameChannel {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
            closed: CancellationToken::new(),
            subscribers: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of messages waiting to be consumed.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total messages dropped by this channel since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Offer a message, waiting at most `timeout` for a free slot.
    pub async fn enqueue(&self, msg: FrameMessage, timeout: Duration) -> EnqueueOutcome {
        if self.closed.is_cancelled() {
            return self.drop_one();
        }
        match self.tx.send_timeout(msg, timeout).await {
            Ok(()) => EnqueueOutcome::Enqueued,
            Err(_) => self.drop_one(),
        }
    }

    /// Take the oldest pending message, waiting at most `timeout`.
    ///
    /// Closure is checked first: once [`close`](Self::close) has been
    /// called every consumer observes [`Dequeued::Gone`], even if messages
    /// are still pending.
    pub async fn dequeue(&self, timeout: Duration) -> Dequeued {
        if self.closed.is_cancelled() {
            return Dequeued::Gone;
        }

        let recv = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Dequeued::Gone,
            result = tokio::time::timeout(timeout, recv) => match result {
                Ok(Some(msg)) => Dequeued::Message(msg),
                Ok(None) => Dequeued::Gone,
                Err(_) => Dequeued::Empty,
            },
        }
    }

    /// Mark the channel as removed and wake every waiting consumer.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the channel has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Attach a consumer. The count drops again when the guard is dropped.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        Subscription {
            channel: Arc::clone(self),
        }
    }

    /// Number of currently attached consumers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    fn drop_one(&self) -> EnqueueOutcome {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        EnqueueOutcome::Dropped
    }
}

impl Default for FrameChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Guard for one attached consumer of a [`FrameChannel`].
#[derive(Debug)]
pub struct Subscription {
    channel: Arc<FrameChannel>,
}

impl Subscription {
    pub fn channel(&self) -> &Arc<FrameChannel> {
        &self.channel
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}
