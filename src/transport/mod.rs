pub mod rpc;
pub mod websocket;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::metrics::Metrics;
use crate::models::errors::{IndexerError, TransportError};
use crate::models::event::Event;

pub use rpc::JsonRpcTransport;

/// Connection to the node that feeds the pipeline.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Opens a log subscription for `address` and returns once the node has
    /// acknowledged it. Events then arrive on the returned stream until the
    /// connection closes or the stream is dropped.
    async fn open_stream(&self, address: &str) -> Result<EventStream, TransportError>;

    /// Latest block number as reported by the node.
    async fn current_block(&self) -> Result<u64, IndexerError>;
}

/// Outcome of a non-blocking push onto an event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Dropped,
    Closed,
}

/// Creates a bounded queue with drop-newest overflow.
///
/// The producer never waits: when the queue is full the arriving event is
/// discarded, counted, and reported.
pub fn event_queue(
    address: &str,
    capacity: usize,
    metrics: Option<Metrics>,
) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    let sender = EventSender {
        address: address.to_string(),
        tx,
        dropped: dropped.clone(),
        metrics,
    };
    let stream = EventStream {
        rx,
        dropped,
    };
    (sender, stream)
}

/// Producer half, owned by the transport's drain path.
pub struct EventSender {
    address: String,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
    metrics: Option<Metrics>,
}

impl EventSender {
    pub fn push(&self, event: Event) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(event)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Event queue full for {}, dropped event from tx {} ({} dropped so far)",
                    self.address, event.transaction_hash, total
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_drop(&self.address);
                }
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Resolves once the consuming stream has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Consumer half handed to a watcher. Dropping it closes the subscription.
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Next queued event. `None` once the producer is gone and the queue has
    /// been drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// True once the producer has gone away. Events may still be queued.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }

    /// Events waiting in the queue.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::event;

    #[tokio::test]
    async fn test_overflow_drops_newest_without_blocking() {
        let capacity = 4;
        let extra = 3;
        let (sender, mut stream) = event_queue("0xabc", capacity, None);

        let outcomes: Vec<Delivery> = (0..capacity + extra)
            .map(|i| sender.push(event(&format!("e{i}"))))
            .collect();

        assert_eq!(
            outcomes.iter().filter(|d| **d == Delivery::Queued).count(),
            capacity
        );
        assert_eq!(stream.dropped(), extra as u64);

        // The retained events are the oldest ones.
        drop(sender);
        let mut retained = Vec::new();
        while let Some(event) = stream.recv().await {
            retained.push(event.data);
        }
        assert_eq!(retained, vec!["e0", "e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn test_push_after_stream_dropped_reports_closed() {
        let (sender, stream) = event_queue("0xabc", 4, None);
        drop(stream);

        assert_eq!(sender.push(event("late")), Delivery::Closed);
        // closed() must resolve immediately once the consumer is gone
        sender.closed().await;
    }

    #[tokio::test]
    async fn test_drops_are_reported_to_metrics() {
        let metrics = Metrics::new().unwrap();
        let (sender, _stream) = event_queue("0xabc", 1, Some(metrics.clone()));

        sender.push(event("kept"));
        assert_eq!(sender.push(event("lost")), Delivery::Dropped);
        assert!(metrics.render().unwrap().contains("watcher_events_dropped"));
    }
}
