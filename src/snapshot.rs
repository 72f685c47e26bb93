use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::info;

use crate::contract::GiftReader;
use crate::models::gift::RawGift;

/// Offline gift source backed by a JSON export of the contract state:
/// `{ "nextGiftId": n, "gifts": [record | null, ...] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftSnapshotFile {
    #[serde(default)]
    next_gift_id: Option<u64>,
    gifts: Vec<Option<RawGift>>,
}

impl GiftSnapshotFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read gift snapshot {}", path.display()))?;
        let snapshot = Self::parse(&contents)
            .with_context(|| format!("Invalid gift snapshot {}", path.display()))?;
        info!(
            path = %path.display(),
            next_gift_id = snapshot.count(),
            "Loaded gift snapshot"
        );
        Ok(snapshot)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(contents).context("Failed to decode gift snapshot JSON")?;
        if let Some(next) = snapshot.next_gift_id {
            if next < snapshot.gifts.len() as u64 {
                return Err(anyhow!(
                    "nextGiftId {next} is smaller than the {} exported records",
                    snapshot.gifts.len()
                ));
            }
        }
        Ok(snapshot)
    }

    fn count(&self) -> u64 {
        self.next_gift_id.unwrap_or(self.gifts.len() as u64)
    }
}

impl GiftReader for GiftSnapshotFile {
    async fn next_gift_id(&self) -> Result<u64> {
        Ok(self.count())
    }

    /// Ids past the exported records read as absent, like a missing RPC result.
    async fn get_gift(&self, id: u64) -> Result<Option<RawGift>> {
        let index = usize::try_from(id).map_err(|_| anyhow!("Gift id {id} out of range"))?;
        Ok(self.gifts.get(index).cloned().flatten())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::discovery::GiftDiscovery;
    use crate::session::WalletSession;

    const EXPORT: &str = r#"{
        "nextGiftId": 4,
        "gifts": [
            {
                "sender": "0x1111111111111111111111111111111111111111",
                "recipient": "0x2222222222222222222222222222222222222222",
                "unlockTime": "1700000000",
                "assetType": 0,
                "token": "0x0000000000000000000000000000000000000000",
                "amount": "1000000000000000000",
                "encryptedMessageURI": "ipfs://",
                "claimed": false
            },
            null,
            [
                "0x3333333333333333333333333333333333333333",
                "0x2222222222222222222222222222222222222222",
                "0x6553f100",
                1,
                "0x4444444444444444444444444444444444444444",
                "2500000",
                "ipfs://bafyabc",
                true
            ]
        ]
    }"#;

    #[tokio::test]
    async fn reads_both_shapes_and_gaps() {
        let snapshot = GiftSnapshotFile::parse(EXPORT).unwrap();
        assert_eq!(snapshot.next_gift_id().await.unwrap(), 4);
        assert!(matches!(snapshot.get_gift(0).await.unwrap(), Some(RawGift::Named(_))));
        assert!(snapshot.get_gift(1).await.unwrap().is_none());
        assert!(matches!(
            snapshot.get_gift(2).await.unwrap(),
            Some(RawGift::Positional(_))
        ));
        assert!(snapshot.get_gift(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drives_discovery_offline() {
        let reader = Arc::new(GiftSnapshotFile::parse(EXPORT).unwrap());
        let session = WalletSession::connected("0x2222222222222222222222222222222222222222").unwrap();
        let config = DiscoveryConfig {
            token_decimals: 6,
            ..DiscoveryConfig::default()
        };
        let mut discovery = GiftDiscovery::new(reader, session, config);
        let result = discovery.discover().await.unwrap();

        let ids: Vec<u64> = result.gifts.iter().map(|gift| gift.id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(result.gifts[1].amount, "2.5");
        assert!(result.gifts[1].claimed);
        assert_eq!(result.stats.with_data, 2);
    }

    #[test]
    fn rejects_inconsistent_counter() {
        let err = GiftSnapshotFile::parse(r#"{"nextGiftId": 0, "gifts": [null]}"#).unwrap_err();
        assert!(err.to_string().contains("smaller"));
        assert!(GiftSnapshotFile::parse("not json").is_err());
    }

    #[test]
    fn counter_defaults_to_record_count() {
        let snapshot = GiftSnapshotFile::parse(r#"{"gifts": [null, null]}"#).unwrap();
        assert_eq!(snapshot.count(), 2);
    }
}
