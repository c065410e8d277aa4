use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::models::event::Event;
use crate::storage::Storage;
use crate::transport::EventStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Running,
    // Producer is gone, finishing what is already queued
    Draining,
    Terminated,
}

/// Why a watcher stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherExit {
    Cancelled,
    StreamClosed,
}

/// Drains one address's event stream into the store.
pub struct Watcher {
    stream: EventStream,
    registration: Registration,
    state: WatcherState,
}

// Deregisters the address however the watcher ends, including abort before
// the first poll.
struct Registration {
    address: String,
    store: Arc<dyn Storage>,
    metrics: Option<Metrics>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.store.mark_inactive(&self.address);
        if let Some(metrics) = &self.metrics {
            metrics.active_subscriptions.add(-1, &[]);
        }
        info!("Stopped watching {}", self.address);
    }
}

impl Watcher {
    /// Takes over the registration of `address`: whenever the watcher is
    /// dropped, the address leaves the active set.
    pub fn new(
        address: String,
        stream: EventStream,
        store: Arc<dyn Storage>,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            stream,
            registration: Registration {
                address,
                store,
                metrics,
            },
            state: WatcherState::Running,
        }
    }

    fn transition(&mut self, next: WatcherState) {
        if self.state != next {
            debug!(
                "Watcher for {} {:?} -> {:?}",
                self.registration.address, self.state, next
            );
            self.state = next;
        }
    }

    /// Runs until the stream ends or `shutdown` fires, then removes the
    /// address from the active set.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> WatcherExit {
        let address = self.registration.address.clone();

        info!("Watching for events on {}", address);
        let exit = loop {
            tokio::select! {
                res = shutdown.recv() => {
                    match res {
                        Ok(_) => info!("Watcher for {} received shutdown signal", address),
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Watcher for {} shutdown channel closed", address)
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => warn!(
                            "Watcher for {} lagged and missed {} shutdown signals. Proceeding with shutdown.",
                            address, n
                        ),
                    }
                    break WatcherExit::Cancelled;
                }
                event = self.stream.recv() => {
                    let Some(event) = event else {
                        info!("Event stream for {} closed", address);
                        break WatcherExit::StreamClosed;
                    };

                    self.detect_draining();
                    self.store_event(&address, event);
                }
            }
        };

        if self.stream.dropped() > 0 {
            warn!(
                "Watcher for {} exiting with {} events dropped on a full queue",
                address,
                self.stream.dropped()
            );
        }
        self.transition(WatcherState::Terminated);
        exit
    }

    // The producer closing while events are still queued moves the watcher
    // into Draining until the queue is empty.
    fn detect_draining(&mut self) {
        if self.state == WatcherState::Running && self.stream.is_closed() {
            info!(
                "Connection for {} gone, draining {} queued events",
                self.registration.address,
                self.stream.queued()
            );
            self.transition(WatcherState::Draining);
        }
    }

    fn store_event(&self, address: &str, event: Event) {
        let Registration { store, metrics, .. } = &self.registration;

        debug!("Got event for {} in tx {}", address, event.transaction_hash);
        match store.append(address, event) {
            Ok(()) => {
                if let Some(metrics) = metrics {
                    metrics.record_event(address);
                }
            }
            Err(e) => error!("Failed to store event for {}: {}", address, e),
        }
    }
}
