//! Periodic TTL sweep
//!
//! Forwards expired keys to whatever schedules re-discovery. The sweeper
//! does not rediscover anything itself since that needs a live page.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::store::SelectorStore;
use crate::types::RecordKey;

pub struct Sweeper {
    store: Arc<SelectorStore>,
    ttl: chrono::Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(store: Arc<SelectorStore>, ttl: chrono::Duration, interval: Duration) -> Self {
        Self {
            store,
            ttl,
            interval,
        }
    }

    /// Send every currently expired key; returns how many were sent
    ///
    /// Stops early, without error, if the receiver has gone away.
    pub async fn sweep_once(&self, tx: &mpsc::Sender<RecordKey>) -> usize {
        let mut sent = 0;
        for key in self.store.list_expired(self.ttl) {
            if tx.send(key).await.is_err() {
                debug!("Sweep receiver closed");
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            info!("Sweep found {} expired record(s)", sent);
        }
        sent
    }

    /// Run [`Sweeper::sweep_once`] every interval until `cancel` fires or the receiver closes
    pub fn spawn(self, tx: mpsc::Sender<RecordKey>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_once(&tx).await;
                        if tx.is_closed() {
                            break;
                        }
                    }
                }
            }
            debug!("Sweeper stopped");
        })
    }
}
