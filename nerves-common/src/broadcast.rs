//! Non-blocking one-to-many fan-out.
//!
//! A [`Source`] delivers every message to each registered [`Sink`] with a
//! single `try_send`. A sink whose inbox is full misses that message; the
//! other sinks and the sender are unaffected.
//!
//! ```ignore
//! let source = Source::new();
//! let mut sink = source.new_sink();
//!
//! source.send_message(update);
//! let received = sink.recv().await;
//!
//! sink.close();
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_stream::Stream;

/// Inbox capacity of every sink.
pub const SINK_CAPACITY: usize = 10;

/// Identifier of a sink within its source.
pub type SinkId = u64;

/// Sending side of the fan-out.
///
/// Cloning is cheap and every clone feeds the same set of sinks.
#[derive(Debug)]
pub struct Source<T> {
    shared: Arc<Shared<T>>,
}

#[derive(Debug)]
struct Shared<T> {
    registry: Mutex<Registry<T>>,
}

#[derive(Debug)]
struct Registry<T> {
    next_id: SinkId,
    sinks: HashMap<SinkId, mpsc::Sender<T>>,
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone> Default for Source<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Source<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry {
                    next_id: 0,
                    sinks: HashMap::new(),
                }),
            }),
        }
    }

    /// Register a new subscriber with a bounded inbox of [`SINK_CAPACITY`].
    pub fn new_sink(&self) -> Sink<T> {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);

        let mut registry = self.shared.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.sinks.insert(id, tx);
        drop(registry);

        tracing::trace!(sink = id, "Sink registered");

        Sink {
            id,
            rx,
            source: Arc::downgrade(&self.shared),
        }
    }

    /// Offer `msg` to every registered sink without waiting on any of them.
    pub fn send_message(&self, msg: T) -> DeliveryStats {
        let mut stats = DeliveryStats::default();
        let registry = self.shared.registry.lock();

        for (id, tx) in &registry.sinks {
            match tx.try_send(msg.clone()) {
                Ok(()) => stats.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    stats.dropped += 1;
                    tracing::debug!(sink = id, "Sink inbox full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    stats.dropped += 1;
                    tracing::debug!(sink = id, "Sink inbox closed, message dropped");
                }
            }
        }

        stats
    }

    /// Number of currently registered sinks.
    pub fn sink_count(&self) -> usize {
        self.shared.registry.lock().sinks.len()
    }
}

impl<T> Shared<T> {
    fn remove(&self, id: SinkId) {
        if self.registry.lock().sinks.remove(&id).is_some() {
            tracing::trace!(sink = id, "Sink removed");
        }
    }
}

/// Outcome of one [`Source::send_message`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Sinks that accepted the message.
    pub delivered: usize,
    /// Sinks that missed it because their inbox was full.
    pub dropped: usize,
}

impl DeliveryStats {
    pub fn total(&self) -> usize {
        self.delivered + self.dropped
    }
}

/// Receiving side of the fan-out.
///
/// Dropping the sink (or calling [`Sink::close`]) removes it from the source
/// before its inbox is released. Once the source is gone the sink drains what
/// is buffered and then reports end of stream.
#[derive(Debug)]
pub struct Sink<T> {
    id: SinkId,
    rx: mpsc::Receiver<T>,
    source: Weak<Shared<T>>,
}

impl<T> Sink<T> {
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Wait for the next message. `None` means the source is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take a buffered message without waiting.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }

    /// De-register from the source and release the inbox.
    pub fn close(self) {
        drop(self);
    }
}

impl<T> Drop for Sink<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.source.upgrade() {
            shared.remove(self.id);
        }
        self.rx.close();
    }
}

impl<T> Stream for Sink<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    #[test]
    fn test_sink_ids_are_unique() {
        let source = Source::<u32>::new();
        let a = source.new_sink();
        let b = source.new_sink();
        assert_ne!(a.id(), b.id());
        assert_eq!(source.sink_count(), 2);
    }

    #[tokio::test]
    async fn test_delivers_to_every_sink_in_order() {
        let source = Source::new();
        let mut a = source.new_sink();
        let mut b = source.new_sink();

        for i in 0..5 {
            let stats = source.send_message(i);
            assert_eq!(stats.delivered, 2);
        }

        for sink in [&mut a, &mut b] {
            let mut got = Vec::new();
            while let Ok(m) = sink.try_recv() {
                got.push(m);
            }
            assert_eq!(got, vec![0, 1, 2, 3, 4]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attach() {
        let source = Source::<String>::new();

        let handles: Vec<_> = (0..1000)
            .map(|_| {
                let source = source.clone();
                tokio::spawn(async move { source.new_sink() })
            })
            .collect();

        let mut sinks = Vec::new();
        for handle in handles {
            sinks.push(handle.await.unwrap());
        }

        assert_eq!(source.sink_count(), 1000);
        drop(sinks);
        assert_eq!(source.sink_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attach_and_close_during_traffic() {
        let source = Source::<u64>::new();

        let sender = {
            let source = source.clone();
            tokio::spawn(async move {
                for i in 0..10_000u64 {
                    source.send_message(i);
                    if i % 100 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let handles: Vec<_> = (0..1000)
            .map(|_| {
                let source = source.clone();
                tokio::spawn(async move {
                    let sink = source.new_sink();
                    tokio::task::yield_now().await;
                    sink.close();
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        sender.await.unwrap();

        assert_eq!(source.sink_count(), 0);
        let stats = source.send_message(0);
        assert_eq!(stats.total(), 0);
    }

    #[tokio::test]
    async fn test_full_inbox_drops_without_blocking() {
        let source = Source::new();
        let mut slow = source.new_sink();
        let mut fast = source.new_sink();

        let sending = tokio::time::timeout(Duration::from_millis(100), async {
            let mut dropped_at = Vec::new();
            for i in 0..11 {
                let stats = source.send_message(i);
                if stats.dropped > 0 {
                    dropped_at.push(i);
                }
                // Keep the fast sink drained so only the slow one overflows.
                assert_eq!(fast.try_recv().unwrap(), i);
            }
            dropped_at
        })
        .await
        .expect("send_message must not block");

        assert_eq!(sending, vec![10]);

        let mut received = Vec::new();
        while let Ok(m) = slow.try_recv() {
            received.push(m);
        }
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_closed_sink_is_not_delivered_to() {
        let source = Source::new();
        let sink = source.new_sink();
        let mut other = source.new_sink();

        sink.close();
        let stats = source.send_message("hello");

        assert_eq!(stats, DeliveryStats { delivered: 1, dropped: 0 });
        assert_eq!(other.recv().await, Some("hello"));
    }

    #[test]
    fn test_recv_wakes_on_send() {
        let source = Source::new();
        let mut sink = source.new_sink();

        let mut recv = tokio_test::task::spawn(sink.recv());
        tokio_test::assert_pending!(recv.poll());

        source.send_message(42);
        assert!(recv.is_woken());
        tokio_test::assert_ready_eq!(recv.poll(), Some(42));
    }

    #[tokio::test]
    async fn test_sink_ends_when_source_dropped() {
        let source = Source::new();
        let mut sink = source.new_sink();
        source.send_message(7);
        drop(source);

        assert_eq!(sink.next().await, Some(7));
        assert_eq!(sink.next().await, None);
    }
}
