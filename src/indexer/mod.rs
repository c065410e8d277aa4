pub mod watcher;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::indexer::watcher::{Watcher, WatcherExit};
use crate::metrics::Metrics;
use crate::models::errors::IndexerError;
use crate::models::event::Event;
use crate::storage::Storage;
use crate::transport::EventTransport;

/// Registers addresses, opens their streams and runs one watcher per address.
///
/// Watchers are tied to the coordinator's shutdown signal rather than to the
/// request that created them, so ingestion outlives the subscribe call.
pub struct SubscriptionCoordinator {
    transport: Arc<dyn EventTransport>,
    store: Arc<dyn Storage>,
    metrics: Option<Metrics>,
    shutdown: broadcast::Sender<()>,
    shutting_down: AtomicBool,
    watchers: Mutex<JoinSet<WatcherExit>>,
}

// Holds an address in the active set while its stream is being opened.
// Released on drop unless committed, so a failed or abandoned subscribe
// leaves nothing behind.
struct PendingSubscription<'a> {
    store: &'a dyn Storage,
    address: &'a str,
    committed: bool,
}

impl PendingSubscription<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingSubscription<'_> {
    fn drop(&mut self) {
        if !self.committed {
            debug!("Releasing pending subscription for {}", self.address);
            self.store.mark_inactive(self.address);
        }
    }
}

impl SubscriptionCoordinator {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        store: Arc<dyn Storage>,
        metrics: Option<Metrics>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            transport,
            store,
            metrics,
            shutdown,
            shutting_down: AtomicBool::new(false),
            watchers: Mutex::new(JoinSet::new()),
        }
    }

    /// Starts watching `address`. Returns once the node has acknowledged the
    /// subscription; events are ingested in the background from then on.
    pub async fn subscribe(&self, address: &str) -> Result<(), IndexerError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(IndexerError::ShuttingDown);
        }

        if !self.store.try_mark_active(address) {
            return Err(IndexerError::AlreadySubscribed {
                address: address.to_string(),
            });
        }
        let pending = PendingSubscription {
            store: self.store.as_ref(),
            address,
            committed: false,
        };

        let stream = self.transport.open_stream(address).await.map_err(|e| {
            warn!("Failed to open stream for {}: {}", address, e);
            e
        })?;

        // Subscribe to shutdown before spawning so the watcher cannot miss it
        let shutdown_rx = self.shutdown.subscribe();
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(IndexerError::ShuttingDown);
        }

        let watcher = Watcher::new(
            address.to_string(),
            stream,
            self.store.clone(),
            self.metrics.clone(),
        );
        pending.commit();
        if let Some(metrics) = &self.metrics {
            metrics.active_subscriptions.add(1, &[]);
        }

        let mut watchers = self.watchers.lock();
        // Reap watchers that already finished
        while let Some(finished) = watchers.try_join_next() {
            log_watcher_exit(finished);
        }
        watchers.spawn(watcher.run(shutdown_rx));

        info!("Subscribed to {}", address);
        Ok(())
    }

    pub async fn get_current_block(&self) -> Result<u64, IndexerError> {
        self.transport.current_block().await.map_err(|e| {
            warn!("Failed to get current block: {}", e);
            e
        })
    }

    /// Events recorded for `address` in arrival order. An empty result is not
    /// an error here.
    pub fn get_transactions(&self, address: &str) -> Result<Vec<Event>, IndexerError> {
        Ok(self.store.read(address)?)
    }

    pub fn is_subscribed(&self, address: &str) -> bool {
        self.store.is_active(address)
    }

    pub fn active_addresses(&self) -> Vec<String> {
        self.store.active_addresses()
    }

    /// Signals every watcher to stop and waits up to `timeout` for them to
    /// exit. New subscriptions are refused from here on.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);

        // No receivers just means no watcher is running
        if self.shutdown.send(()).is_err() {
            debug!("No watchers running at shutdown");
        }

        let mut watchers = std::mem::take(&mut *self.watchers.lock());
        let deadline = Instant::now() + timeout;

        while !watchers.is_empty() {
            match tokio::time::timeout_at(deadline, watchers.join_next()).await {
                Ok(Some(finished)) => log_watcher_exit(finished),
                Ok(None) => break,
                Err(_) => {
                    let remaining = watchers.len();
                    watchers.abort_all();
                    return Err(anyhow!(
                        "Shutdown timeout: {} watchers still running, aborted",
                        remaining
                    ));
                }
            }
        }

        info!("All watchers stopped");
        Ok(())
    }
}

fn log_watcher_exit(finished: Result<WatcherExit, tokio::task::JoinError>) {
    match finished {
        Ok(exit) => debug!("Watcher exited: {:?}", exit),
        Err(e) if e.is_cancelled() => debug!("Watcher aborted"),
        Err(e) => error!("Watcher task failed: {}", e),
    }
}
