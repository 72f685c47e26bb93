use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::contract::GiftReader;
use crate::discovery::{DiscoverySnapshot, GiftDiscovery};

const REFETCH_QUEUE_DEPTH: usize = 8;

/// Caller side of a running [`GiftWatcher`].
#[derive(Clone)]
pub struct WatcherHandle {
    refetch: mpsc::Sender<()>,
    snapshots: watch::Receiver<DiscoverySnapshot>,
}

impl WatcherHandle {
    /// Queues a full refetch. Returns false when the watcher is gone or
    /// already has requests queued.
    pub fn refetch(&self) -> bool {
        self.refetch.try_send(()).is_ok()
    }

    pub fn snapshots(&self) -> watch::Receiver<DiscoverySnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> DiscoverySnapshot {
        self.snapshots.borrow().clone()
    }
}

/// Keeps a [`GiftDiscovery`] current: polls `nextGiftId`, refetches every
/// record a settle delay after it grows, right after the endpoint recovers
/// from failed polls, and whenever a caller asks.
pub struct GiftWatcher<R> {
    discovery: GiftDiscovery<R>,
    poll_interval: Duration,
    settle_delay: Duration,
    refetch_rx: mpsc::Receiver<()>,
}

impl<R: GiftReader + 'static> GiftWatcher<R> {
    pub fn new(discovery: GiftDiscovery<R>, config: &DiscoveryConfig) -> (Self, WatcherHandle) {
        let (refetch_tx, refetch_rx) = mpsc::channel(REFETCH_QUEUE_DEPTH);
        let handle = WatcherHandle {
            refetch: refetch_tx,
            snapshots: discovery.subscribe(),
        };
        let watcher = Self {
            discovery,
            poll_interval: config.poll_interval(),
            settle_delay: config.settle_delay(),
            refetch_rx,
        };
        (watcher, handle)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            settle_ms = self.settle_delay.as_millis() as u64,
            "Starting gift watcher loop"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let settle = sleep(self.settle_delay);
        tokio::pin!(settle);
        let mut settle_armed = false;

        let mut loaded = false;
        let mut failed_polls = 0u32;
        let mut refetch_open = true;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Gift watcher shutting down");
                        break;
                    }
                }
                request = self.refetch_rx.recv(), if refetch_open => {
                    match request {
                        Some(()) => {
                            settle_armed = false;
                            if !self.refetch("requested", &mut shutdown).await {
                                break;
                            }
                        }
                        None => {
                            debug!("All refetch senders dropped");
                            refetch_open = false;
                        }
                    }
                }
                () = &mut settle, if settle_armed => {
                    settle_armed = false;
                    if !self.refetch("new gifts settled", &mut shutdown).await {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.discovery.poll_next_gift_id().await {
                        Ok(increased) => {
                            let recovered = failed_polls > 0;
                            if recovered {
                                info!(failed_polls, "RPC endpoint reachable again");
                            }
                            failed_polls = 0;

                            if !loaded || recovered {
                                loaded = true;
                                settle_armed = false;
                                let reason = if recovered { "reconnected" } else { "initial load" };
                                if !self.refetch(reason, &mut shutdown).await {
                                    break;
                                }
                            } else if increased {
                                debug!(
                                    next_gift_id = self.discovery.next_gift_id(),
                                    "Scheduling refetch after settle delay"
                                );
                                settle.as_mut().reset(Instant::now() + self.settle_delay);
                                settle_armed = true;
                            }
                        }
                        Err(err) => {
                            failed_polls = failed_polls.saturating_add(1);
                            warn!(failed_polls, "Gift counter poll failed: {err}");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Runs one refetch unless shutdown is requested first, in which case the
    /// in-flight reads are dropped. Returns false when the loop must stop.
    async fn refetch(&mut self, reason: &'static str, shutdown: &mut watch::Receiver<bool>) -> bool {
        debug!(reason, "Refetching gifts");
        tokio::select! {
            result = self.discovery.refetch() => {
                if let Err(err) = result {
                    warn!(reason, "Gift refetch failed: {err}");
                }
                true
            }
            () = stop_requested(shutdown) => {
                info!(reason, "Gift watcher shutting down; abandoning in-flight reads");
                false
            }
        }
    }
}

/// Resolves once shutdown is signalled or its sender is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::discovery::testing::*;
    use crate::models::gift::RawGift;
    use crate::session::WalletSession;

    const ONE_ETH: &str = "1000000000000000000";

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            poll_interval_ms: 1_000,
            settle_delay_ms: 3_000,
            read_concurrency: 2,
            ..DiscoveryConfig::default()
        }
    }

    fn spawn_watcher<R: GiftReader + 'static>(
        reader: Arc<R>,
    ) -> (
        WatcherHandle,
        watch::Sender<bool>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let session = WalletSession::connected(BOB).unwrap();
        let discovery = GiftDiscovery::new(reader, session, config());
        let (watcher, handle) = GiftWatcher::new(discovery, &config());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(watcher.run(shutdown_rx));
        (handle, shutdown_tx, task)
    }

    /// Knows about gifts but never answers a read.
    struct StalledReader;

    impl GiftReader for StalledReader {
        async fn next_gift_id(&self) -> Result<u64> {
            Ok(3)
        }

        async fn get_gift(&self, _id: u64) -> Result<Option<RawGift>> {
            sleep(Duration::from_secs(600)).await;
            Ok(None)
        }
    }

    fn claimed(gift: RawGift) -> RawGift {
        match gift {
            RawGift::Named(mut named) => {
                named.claimed = Some(serde_json::Value::Bool(true));
                RawGift::Named(named)
            }
            other => other,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn new_gifts_appear_after_settle_delay() {
        let reader = Arc::new(MemoryReader::with_gifts(vec![named_gift(
            ALICE,
            BOB,
            ONE_ETH,
            1_700_000_000,
        )]));
        let (handle, shutdown, task) = spawn_watcher(Arc::clone(&reader));
        let mut snapshots = handle.snapshots();

        snapshots
            .wait_for(|snapshot| snapshot.gifts.len() == 1 && !snapshot.is_loading)
            .await
            .unwrap();

        let added_at = Instant::now();
        reader.push(named_gift(CAROL, BOB, ONE_ETH, 1_700_000_000));
        snapshots
            .wait_for(|snapshot| snapshot.gifts.len() == 2 && !snapshot.is_loading)
            .await
            .unwrap();
        assert!(added_at.elapsed() >= Duration::from_millis(3_000));

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_refetch_picks_up_changed_records() {
        let gift = named_gift(ALICE, BOB, ONE_ETH, 1_700_000_000);
        let reader = Arc::new(MemoryReader::with_gifts(vec![gift.clone()]));
        let (handle, shutdown, task) = spawn_watcher(Arc::clone(&reader));
        let mut snapshots = handle.snapshots();

        snapshots
            .wait_for(|snapshot| snapshot.gifts.len() == 1)
            .await
            .unwrap();
        assert!(!handle.latest().gifts[0].claimed);

        reader.replace(0, claimed(gift));
        assert!(handle.refetch());
        snapshots
            .wait_for(|snapshot| snapshot.gifts.first().is_some_and(|gift| gift.claimed))
            .await
            .unwrap();

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_after_failed_polls_refetches() {
        let gift = named_gift(ALICE, BOB, ONE_ETH, 1_700_000_000);
        let reader = Arc::new(MemoryReader::with_gifts(vec![gift.clone()]));
        let (handle, shutdown, task) = spawn_watcher(Arc::clone(&reader));
        let mut snapshots = handle.snapshots();

        snapshots
            .wait_for(|snapshot| snapshot.gifts.len() == 1)
            .await
            .unwrap();
        let reads_after_load = reader.read_count();

        reader.fail_counter(2);
        reader.replace(0, claimed(gift));
        snapshots
            .wait_for(|snapshot| snapshot.gifts.first().is_some_and(|gift| gift.claimed))
            .await
            .unwrap();
        assert!(reader.read_count() > reads_after_load);

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_counter_does_not_refetch() {
        let reader = Arc::new(MemoryReader::with_gifts(vec![named_gift(
            ALICE,
            BOB,
            ONE_ETH,
            1_700_000_000,
        )]));
        let (handle, shutdown, task) = spawn_watcher(Arc::clone(&reader));
        let mut snapshots = handle.snapshots();
        snapshots
            .wait_for(|snapshot| snapshot.gifts.len() == 1)
            .await
            .unwrap();
        let reads_after_load = reader.read_count();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(reader.read_count(), reads_after_load);

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_slow_refetch() {
        let (handle, shutdown, task) = spawn_watcher(Arc::new(StalledReader));
        let mut snapshots = handle.snapshots();
        snapshots
            .wait_for(|snapshot| snapshot.is_loading && snapshot.stats.total == 3)
            .await
            .unwrap();

        shutdown.send(true).unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(stopped.is_ok(), "watcher kept waiting on in-flight reads");
        stopped.unwrap().unwrap().unwrap();
        assert!(handle.latest().is_loading);
    }
}
