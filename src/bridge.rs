//! ==============================================================================
//! bridge.rs - reconciliation loop
//! ==============================================================================
//!
//! purpose:
//!     connects a discovery feed to the synchronizer and runs until stopped.
//!
//! architecture:
//!
//! ```text
//!     ┌──────────────┐   bounded, ordered   ┌──────────────────────────┐
//!     │ ingest task  │ ───── mpsc ────────> │ dispatch loop            │
//!     │ feed.next()  │                      │ Idle -> Dispatching      │
//!     │ allow-list   │                      │ synchronizer.dispatch()  │
//!     └──────────────┘                      └──────────────────────────┘
//!
//!     the ingest task keeps pulling from the feed while a slow write is in
//!     flight. the dispatch loop is the only owner of the synchronizer, so
//!     resolve-or-create is serialized globally and pairs complete in arrival
//!     order. the stop signal is only observed while idle: a pair that has
//!     started dispatching always runs to completion.
//!
//!     feed errors travel through the same queue. the dispatch loop judges
//!     them only after every pair ahead of them has been dispatched, so
//!     "before the first subtree" means before in arrival order.
//! ```
//!
//! ==============================================================================

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::feed::{DiscoveryFeed, FeedItem, IdentityFilter};
use crate::sync::{SyncStats, Synchronizer};

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// pairs buffered between feed and dispatch
    pub queue_capacity: usize,
    /// pause after a transient feed error
    pub restart_delay: Duration,
    /// log every reading at info instead of debug
    pub show_sensor_data: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            restart_delay: Duration::from_secs(1),
            show_sensor_data: false,
        }
    }
}

/// why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// the stop signal fired
    Stopped,
    /// the feed reported end of stream and the queue drained
    FeedEnded,
}

pub struct Bridge {
    synchronizer: Synchronizer,
    filter: IdentityFilter,
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(synchronizer: Synchronizer, filter: IdentityFilter, settings: BridgeSettings) -> Self {
        Self {
            synchronizer,
            filter,
            settings,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    pub fn stats(&self) -> Arc<SyncStats> {
        self.synchronizer.stats()
    }

    /// run until `shutdown` resolves or the feed ends
    ///
    /// a feed error that arrives before any subtree exists is returned as
    /// fatal; later feed errors are logged and the feed is polled again
    /// after the restart delay.
    pub async fn run<F>(&mut self, feed: Box<dyn DiscoveryFeed>, shutdown: F) -> Result<LoopExit>
    where
        F: Future<Output = ()> + Send,
    {
        let stats = self.synchronizer.stats();
        let (tx, mut rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let ingest = tokio::spawn(ingest(
            feed,
            tx,
            self.filter.clone(),
            stats.clone(),
            self.settings.restart_delay,
        ));

        tokio::pin!(shutdown);
        let exit = loop {
            // idle
            let item = tokio::select! {
                biased;
                _ = &mut shutdown => break Ok(LoopExit::Stopped),
                item = rx.recv() => item,
            };
            let item = match item {
                Some(Ok(item)) => item,
                Some(Err(e)) => {
                    SyncStats::bump(&stats.feed_errors);
                    if self.synchronizer.registry().is_empty() {
                        error!(error = %e, "feed failed before any sensor was seen");
                        break Err(e);
                    }
                    warn!(error = %e, "feed error, continuing");
                    continue;
                }
                None => break Ok(LoopExit::FeedEnded),
            };

            // dispatching
            stats.dispatching.store(true, Ordering::Relaxed);
            self.dispatch(item).await;
            stats.dispatching.store(false, Ordering::Relaxed);
        };

        match exit {
            Ok(LoopExit::Stopped) => {
                info!("stop signal received, reconciliation loop finished");
                ingest.abort();
                Ok(LoopExit::Stopped)
            }
            Ok(LoopExit::FeedEnded) => match ingest.await {
                Ok(()) => {
                    info!("feed ended, reconciliation loop finished");
                    Ok(LoopExit::FeedEnded)
                }
                Err(e) => Err(BridgeError::Feed(format!("ingest task failed: {e}"))),
            },
            Err(e) => {
                ingest.abort();
                Err(e)
            }
        }
    }

    async fn dispatch(&mut self, item: FeedItem) {
        if self.settings.show_sensor_data {
            info!(identity = %item.identity, reading = ?item.reading, "received reading");
        } else {
            debug!(identity = %item.identity, reading = ?item.reading, "received reading");
        }

        let report = self
            .synchronizer
            .dispatch(&item.identity, &item.reading)
            .await;
        debug!(
            identity = %item.identity,
            written = report.written.len(),
            failed = report.failed.len(),
            subtree_created = report.subtree_created,
            "dispatch complete"
        );
    }
}

/// pull pairs and feed errors into the queue until the feed ends or the
/// loop stops listening
async fn ingest(
    mut feed: Box<dyn DiscoveryFeed>,
    tx: mpsc::Sender<Result<FeedItem>>,
    filter: IdentityFilter,
    stats: Arc<SyncStats>,
    restart_delay: Duration,
) {
    loop {
        match feed.next().await {
            Ok(Some(item)) => {
                if !filter.allows(&item.identity) {
                    SyncStats::bump(&stats.readings_filtered);
                    debug!(identity = %item.identity, "identity not in allow-list, skipped");
                    continue;
                }
                if tx.send(Ok(item)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                if tx.send(Err(e)).await.is_err() {
                    return;
                }
                // restartable feed: poll again after a pause
                tokio::time::sleep(restart_delay).await;
            }
        }
    }
}
