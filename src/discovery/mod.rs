use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::contract::GiftReader;
use crate::models::gift::{GiftRecord, RawGift, UserGift};
use crate::session::WalletSession;

pub mod watcher;

pub use watcher::GiftWatcher;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to read nextGiftId: {0}")]
    NextGiftId(String),
    #[error(
        "contract reports {observed} gifts which exceeds the discovery scan bound of {limit}"
    )]
    ScanBoundExceeded { observed: u64, limit: u64 },
}

/// Per-id read status. `Pending` means the read has never settled.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadState {
    Pending,
    Failed(String),
    Loaded(Option<RawGift>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GiftRead {
    pub id: u64,
    pub state: ReadState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryStats {
    pub next_gift_id: u64,
    pub total: usize,
    pub with_data: usize,
    pub loading: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySnapshot {
    pub gifts: Vec<UserGift>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub stats: DiscoveryStats,
}

/// Gifts among `reads` that exist and are addressed to the session wallet.
/// Unsettled, failed and empty reads are skipped.
pub fn collect_user_gifts(
    reads: &[GiftRead],
    session: &WalletSession,
    token_decimals: u8,
) -> Vec<UserGift> {
    let Some(address) = session.address() else {
        return Vec::new();
    };

    let mut gifts = Vec::new();
    for read in reads {
        let raw = match &read.state {
            ReadState::Pending => {
                debug!(gift_id = read.id, "Gift read still pending");
                continue;
            }
            ReadState::Failed(err) => {
                debug!(gift_id = read.id, "Skipping gift with read error: {err}");
                continue;
            }
            ReadState::Loaded(None) => {
                debug!(gift_id = read.id, "Gift read returned no data");
                continue;
            }
            ReadState::Loaded(Some(raw)) => raw,
        };

        let record = GiftRecord::from_raw(read.id, raw);
        if !record.exists() {
            debug!(gift_id = read.id, "Skipping nonexistent gift record");
            continue;
        }
        if !record.is_addressed_to(address) {
            continue;
        }
        gifts.push(UserGift::from_record(&record, token_decimals));
    }
    gifts
}

pub fn build_snapshot(
    reads: &[GiftRead],
    next_gift_id: u64,
    session: &WalletSession,
    token_decimals: u8,
) -> DiscoverySnapshot {
    let mut stats = DiscoveryStats {
        next_gift_id,
        total: reads.len(),
        ..DiscoveryStats::default()
    };
    let mut error = None;
    for read in reads {
        match &read.state {
            ReadState::Pending => stats.loading += 1,
            ReadState::Failed(message) => {
                stats.errored += 1;
                if error.is_none() {
                    error = Some(message.clone());
                }
            }
            ReadState::Loaded(Some(_)) => stats.with_data += 1,
            ReadState::Loaded(None) => {}
        }
    }

    DiscoverySnapshot {
        gifts: collect_user_gifts(reads, session, token_decimals),
        is_loading: stats.loading > 0,
        error,
        stats,
    }
}

/// Owns the per-id read table for one wallet and publishes a snapshot after
/// every settled read.
pub struct GiftDiscovery<R> {
    reader: Arc<R>,
    session: WalletSession,
    config: DiscoveryConfig,
    next_gift_id: u64,
    reads: Vec<GiftRead>,
    scan_error: Option<String>,
    snapshots: watch::Sender<DiscoverySnapshot>,
}

impl<R: GiftReader + 'static> GiftDiscovery<R> {
    pub fn new(reader: Arc<R>, session: WalletSession, config: DiscoveryConfig) -> Self {
        assert!(
            config.read_concurrency > 0,
            "Read concurrency must be positive"
        );
        let (snapshots, _) = watch::channel(DiscoverySnapshot::default());
        Self {
            reader,
            session,
            config,
            next_gift_id: 0,
            reads: Vec::new(),
            scan_error: None,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DiscoverySnapshot> {
        self.snapshots.subscribe()
    }

    pub fn next_gift_id(&self) -> u64 {
        self.next_gift_id
    }

    pub fn snapshot(&self) -> DiscoverySnapshot {
        let mut snapshot = build_snapshot(
            &self.reads,
            self.next_gift_id,
            &self.session,
            self.config.token_decimals,
        );
        if snapshot.error.is_none() {
            snapshot.error = self.scan_error.clone();
        }
        snapshot
    }

    /// Reads the contract's gift counter. Returns whether it grew.
    pub async fn poll_next_gift_id(&mut self) -> Result<bool, DiscoveryError> {
        let observed = self
            .reader
            .next_gift_id()
            .await
            .map_err(|err| DiscoveryError::NextGiftId(format!("{err:#}")))?;

        let previous = self.next_gift_id;
        if observed < previous {
            warn!(previous, observed, "nextGiftId moved backwards");
        }
        self.next_gift_id = observed;
        if observed > previous {
            debug!(previous, observed, "nextGiftId increased");
        }
        Ok(observed > previous)
    }

    /// Re-issues every read in `[0, nextGiftId)`. Settled reads keep their
    /// last value until the new result lands.
    pub async fn refetch(&mut self) -> Result<(), DiscoveryError> {
        if !self.session.is_connected() || self.next_gift_id == 0 {
            self.reads.clear();
            self.scan_error = None;
            self.publish();
            return Ok(());
        }

        if self.next_gift_id > self.config.max_scan {
            let err = DiscoveryError::ScanBoundExceeded {
                observed: self.next_gift_id,
                limit: self.config.max_scan,
            };
            self.scan_error = Some(err.to_string());
            self.publish();
            return Err(err);
        }
        self.scan_error = None;

        let count = usize::try_from(self.next_gift_id)
            .map_err(|_| DiscoveryError::ScanBoundExceeded {
                observed: self.next_gift_id,
                limit: self.config.max_scan,
            })?;
        self.reads.truncate(count);
        let known = self.reads.len() as u64;
        self.reads.extend((known..self.next_gift_id).map(|id| GiftRead {
            id,
            state: ReadState::Pending,
        }));
        assert_eq!(self.reads.len(), count, "Read table must cover every id");
        self.publish();

        let reader = Arc::clone(&self.reader);
        let mut results = stream::iter(0..self.next_gift_id)
            .map(|id| {
                let reader = Arc::clone(&reader);
                async move { (id, reader.get_gift(id).await) }
            })
            .buffer_unordered(self.config.read_concurrency);

        let mut settled = 0usize;
        while let Some((id, result)) = results.next().await {
            let state = match result {
                Ok(data) => ReadState::Loaded(data),
                Err(err) => {
                    warn!(gift_id = id, "Gift read failed: {err:#}");
                    ReadState::Failed(format!("{err:#}"))
                }
            };
            self.reads[id as usize].state = state;
            settled += 1;
            self.publish();
        }

        let snapshot = self.snapshots.borrow().clone();
        info!(
            reads = settled,
            matched = snapshot.gifts.len(),
            errored = snapshot.stats.errored,
            "Gift discovery pass complete"
        );
        Ok(())
    }

    /// One full pass: refresh the counter, then read every gift.
    pub async fn discover(&mut self) -> Result<DiscoverySnapshot, DiscoveryError> {
        self.poll_next_gift_id().await?;
        self.refetch().await?;
        Ok(self.snapshot())
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{Result, anyhow};
    use serde_json::json;

    use crate::contract::GiftReader;
    use crate::models::gift::{RawGift, ZERO_ADDRESS};

    pub const ALICE: &str = "0x1111111111111111111111111111111111111111";
    pub const BOB: &str = "0x2222222222222222222222222222222222222222";
    pub const CAROL: &str = "0x3333333333333333333333333333333333333333";

    pub fn named_gift(sender: &str, recipient: &str, amount_wei: &str, unlock: u64) -> RawGift {
        serde_json::from_value(json!({
            "sender": sender,
            "recipient": recipient,
            "unlockTime": unlock.to_string(),
            "assetType": 0,
            "token": ZERO_ADDRESS,
            "amount": amount_wei,
            "encryptedMessageURI": "ipfs://",
            "claimed": false
        }))
        .expect("named gift")
    }

    pub fn positional_gift(sender: &str, recipient: &str, amount_wei: &str, unlock: u64) -> RawGift {
        serde_json::from_value(json!([
            sender,
            recipient,
            unlock,
            0,
            ZERO_ADDRESS,
            amount_wei,
            "ipfs://",
            false
        ]))
        .expect("positional gift")
    }

    #[derive(Default)]
    struct MemoryState {
        gifts: Vec<Option<RawGift>>,
        failing: HashSet<u64>,
        counter_failures: u32,
    }

    /// In-memory stand-in for the gift contract.
    #[derive(Default)]
    pub struct MemoryReader {
        state: Mutex<MemoryState>,
        reads: AtomicUsize,
    }

    impl MemoryReader {
        pub fn with_gifts(gifts: Vec<RawGift>) -> Self {
            let reader = Self::default();
            reader.state.lock().unwrap().gifts = gifts.into_iter().map(Some).collect();
            reader
        }

        pub fn push(&self, gift: RawGift) {
            self.state.lock().unwrap().gifts.push(Some(gift));
        }

        pub fn replace(&self, id: u64, gift: RawGift) {
            self.state.lock().unwrap().gifts[id as usize] = Some(gift);
        }

        pub fn push_empty(&self) {
            self.state.lock().unwrap().gifts.push(None);
        }

        pub fn fail_reads_for(&self, id: u64) {
            self.state.lock().unwrap().failing.insert(id);
        }

        pub fn fail_counter(&self, times: u32) {
            self.state.lock().unwrap().counter_failures = times;
        }

        pub fn read_count(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl GiftReader for MemoryReader {
        async fn next_gift_id(&self) -> Result<u64> {
            let mut state = self.state.lock().unwrap();
            if state.counter_failures > 0 {
                state.counter_failures -= 1;
                return Err(anyhow!("connection refused"));
            }
            Ok(state.gifts.len() as u64)
        }

        async fn get_gift(&self, id: u64) -> Result<Option<RawGift>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let state = self.state.lock().unwrap();
            if state.failing.contains(&id) {
                return Err(anyhow!("getGift({id}) timed out"));
            }
            Ok(state.gifts.get(id as usize).cloned().flatten())
        }
    }
}
