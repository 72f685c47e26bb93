use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::TransactionConfig;
use crate::models::amount::{NATIVE_DECIMALS, parse_amount};
use crate::models::gift::{NamedGift, RawGift, normalize_address};
use crate::rpc::{RpcClient, TransactionRequest, describe_error, encode_hex_prefixed};

pub mod failure;

pub use failure::{Notice, NoticeLevel, WriteAction, WriteFailure};

pub mod abi {
    alloy::sol! {
        struct Gift {
            address sender;
            address recipient;
            uint256 unlockTime;
            uint8 assetType;
            address token;
            uint256 amount;
            string encryptedMessageURI;
            bool claimed;
        }

        function createEthGift(address recipient, uint256 unlockTime, string encryptedMessageURI) external payable returns (uint256 giftId);
        function createErc20Gift(address recipient, uint256 unlockTime, address token, uint256 amount, string encryptedMessageURI) external returns (uint256 giftId);
        function claim(uint256 giftId) external;
        function getGift(uint256 giftId) external view returns (Gift memory gift);
        function nextGiftId() external view returns (uint256);
    }
}

impl From<abi::Gift> for RawGift {
    fn from(gift: abi::Gift) -> Self {
        RawGift::Named(NamedGift {
            sender: Some(Value::String(gift.sender.to_string())),
            recipient: Some(Value::String(gift.recipient.to_string())),
            unlock_time: Some(Value::String(gift.unlockTime.to_string())),
            asset_type: Some(json!(gift.assetType)),
            token: Some(Value::String(gift.token.to_string())),
            amount: Some(Value::String(gift.amount.to_string())),
            encrypted_message_uri: Some(Value::String(gift.encryptedMessageURI)),
            claimed: Some(Value::Bool(gift.claimed)),
        })
    }
}

/// Read side of the gift contract, as consumed by discovery.
pub trait GiftReader: Send + Sync {
    /// Exclusive upper bound of populated gift ids.
    fn next_gift_id(&self) -> impl Future<Output = Result<u64>> + Send;

    /// `Ok(None)` means the source answered without data for this id.
    fn get_gift(&self, id: u64) -> impl Future<Output = Result<Option<RawGift>>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriteState {
    #[default]
    Idle,
    Submitting,
    Confirming {
        hash: String,
    },
    Confirmed {
        hash: String,
        block_number: Option<u64>,
    },
    Failed(WriteFailure),
}

impl WriteState {
    pub fn is_pending(&self) -> bool {
        matches!(self, WriteState::Submitting | WriteState::Confirming { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WriteState::Confirmed { .. })
    }

    pub fn error(&self) -> Option<&WriteFailure> {
        match self {
            WriteState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            WriteState::Confirming { hash } | WriteState::Confirmed { hash, .. } => Some(hash),
            _ => None,
        }
    }
}

/// Observable pending → mined lifecycle of one write.
pub struct WriteTracker {
    state: watch::Sender<WriteState>,
}

impl Default for WriteTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(WriteState::Idle);
        Self { state }
    }

    pub fn subscribe(&self) -> watch::Receiver<WriteState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WriteState {
        self.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().is_pending()
    }

    pub fn is_success(&self) -> bool {
        self.state.borrow().is_success()
    }

    pub fn error(&self) -> Option<WriteFailure> {
        self.state.borrow().error().cloned()
    }

    pub fn reset(&self) {
        self.state.send_replace(WriteState::Idle);
    }

    pub(crate) fn transition(&self, next: WriteState) {
        self.state.send_replace(next);
    }

    /// Marks the write failed when a local check rejects it before submission.
    fn settle_check<T>(&self, checked: Result<T, WriteFailure>) -> Result<T, WriteFailure> {
        checked.inspect_err(|failure| self.transition(WriteState::Failed(failure.clone())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub hash: String,
    pub block_number: Option<u64>,
}

#[derive(Clone)]
pub struct ContractGateway {
    rpc: RpcClient,
    contract: String,
    sender: Option<String>,
    receipt_poll: Duration,
    receipt_timeout: Duration,
}

impl ContractGateway {
    pub fn new(
        rpc: RpcClient,
        contract_address: &str,
        transactions: &TransactionConfig,
    ) -> Result<Self> {
        let contract = normalize_address(contract_address)
            .ok_or_else(|| anyhow!("Invalid contract address {contract_address}"))?;
        assert!(
            transactions.receipt_timeout() >= transactions.receipt_poll(),
            "Receipt timeout must cover at least one poll"
        );
        Ok(Self {
            rpc,
            contract,
            sender: None,
            receipt_poll: transactions.receipt_poll(),
            receipt_timeout: transactions.receipt_timeout(),
        })
    }

    /// Account that signs writes; the RPC endpoint must hold its key.
    pub fn with_sender(mut self, sender: Option<&str>) -> Self {
        self.sender = sender.map(str::to_string);
        self
    }

    pub fn contract_address(&self) -> &str {
        &self.contract
    }

    pub async fn fetch_gift(&self, id: u64) -> Result<RawGift> {
        let call = abi::getGiftCall {
            giftId: U256::from(id),
        };
        let output = self
            .rpc
            .call(&self.contract, &call.abi_encode())
            .await
            .with_context(|| format!("getGift({id}) failed"))?;
        let decoded = abi::getGiftCall::abi_decode_returns(&output, true)
            .with_context(|| format!("Failed to decode getGift({id}) response"))?;
        Ok(RawGift::from(decoded.gift))
    }

    pub async fn fetch_next_gift_id(&self) -> Result<u64> {
        let call = abi::nextGiftIdCall {};
        let output = self
            .rpc
            .call(&self.contract, &call.abi_encode())
            .await
            .context("nextGiftId() failed")?;
        let decoded = abi::nextGiftIdCall::abi_decode_returns(&output, true)
            .context("Failed to decode nextGiftId() response")?;
        u64::try_from(decoded._0)
            .map_err(|_| anyhow!("nextGiftId {} exceeds u64 bounds", decoded._0))
    }

    /// Locks `native_amount` (decimal, 18-place scale) for `recipient` until
    /// `unlock_time` (Unix seconds).
    pub async fn create_eth_gift(
        &self,
        recipient: &str,
        unlock_time: u64,
        message_uri: &str,
        native_amount: &str,
        tracker: &WriteTracker,
    ) -> Result<WriteReceipt, WriteFailure> {
        let recipient = tracker.settle_check(parse_recipient(recipient))?;
        tracker.settle_check(ensure_future_unlock(unlock_time))?;
        let value = tracker.settle_check(
            parse_amount(native_amount, NATIVE_DECIMALS)
                .map_err(|err| WriteFailure::Other(format!("Invalid gift amount: {err}"))),
        )?;
        let call = abi::createEthGiftCall {
            recipient,
            unlockTime: U256::from(unlock_time),
            encryptedMessageURI: message_uri.to_string(),
        };
        info!(
            recipient = %recipient,
            unlock_time,
            amount = native_amount,
            "Submitting createEthGift"
        );
        self.submit(call.abi_encode(), Some(value), tracker).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_token_gift(
        &self,
        recipient: &str,
        unlock_time: u64,
        token: &str,
        amount: &str,
        decimals: u8,
        message_uri: &str,
        tracker: &WriteTracker,
    ) -> Result<WriteReceipt, WriteFailure> {
        let recipient = tracker.settle_check(parse_recipient(recipient))?;
        tracker.settle_check(ensure_future_unlock(unlock_time))?;
        let token: Address = tracker.settle_check(
            token
                .trim()
                .parse()
                .map_err(|err| WriteFailure::Other(format!("Invalid token address {token}: {err}"))),
        )?;
        let amount_units = tracker.settle_check(
            parse_amount(amount, decimals)
                .map_err(|err| WriteFailure::Other(format!("Invalid gift amount: {err}"))),
        )?;
        let call = abi::createErc20GiftCall {
            recipient,
            unlockTime: U256::from(unlock_time),
            token,
            amount: amount_units,
            encryptedMessageURI: message_uri.to_string(),
        };
        info!(
            recipient = %recipient,
            token = %token,
            unlock_time,
            amount,
            decimals,
            "Submitting createErc20Gift"
        );
        self.submit(call.abi_encode(), None, tracker).await
    }

    pub async fn claim(
        &self,
        gift_id: u64,
        tracker: &WriteTracker,
    ) -> Result<WriteReceipt, WriteFailure> {
        let call = abi::claimCall {
            giftId: U256::from(gift_id),
        };
        info!(gift_id, "Submitting claim");
        self.submit(call.abi_encode(), None, tracker).await
    }

    async fn submit(
        &self,
        data: Vec<u8>,
        value: Option<U256>,
        tracker: &WriteTracker,
    ) -> Result<WriteReceipt, WriteFailure> {
        let Some(from) = self.sender.clone() else {
            let failure = WriteFailure::Other("No wallet connected".to_string());
            tracker.transition(WriteState::Failed(failure.clone()));
            return Err(failure);
        };

        tracker.transition(WriteState::Submitting);
        let request = TransactionRequest {
            from,
            to: self.contract.clone(),
            data: encode_hex_prefixed(&data),
            value: value.map(|value| format!("{value:#x}")),
        };

        let hash = match self.rpc.send_transaction(&request).await {
            Ok(hash) => hash,
            Err(err) => {
                let failure = WriteFailure::classify(&describe_error(&err));
                warn!("Transaction submission failed: {failure}");
                tracker.transition(WriteState::Failed(failure.clone()));
                return Err(failure);
            }
        };

        info!(tx_hash = %hash, "Transaction submitted, awaiting receipt");
        tracker.transition(WriteState::Confirming { hash: hash.clone() });

        match self.wait_for_receipt(&hash).await {
            Ok(receipt) => {
                info!(tx_hash = %hash, block = ?receipt.block_number, "Transaction confirmed");
                tracker.transition(WriteState::Confirmed {
                    hash: receipt.hash.clone(),
                    block_number: receipt.block_number,
                });
                Ok(receipt)
            }
            Err(failure) => {
                warn!(tx_hash = %hash, "Transaction failed: {failure}");
                tracker.transition(WriteState::Failed(failure.clone()));
                Err(failure)
            }
        }
    }

    async fn wait_for_receipt(&self, hash: &str) -> Result<WriteReceipt, WriteFailure> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            match self.rpc.transaction_receipt(hash).await {
                Ok(Some(receipt)) if receipt.succeeded() => {
                    return Ok(WriteReceipt {
                        hash: receipt.transaction_hash.clone(),
                        block_number: receipt.block_number(),
                    });
                }
                Ok(Some(_)) => return Err(WriteFailure::Reverted { reason: None }),
                Ok(None) => debug!(tx_hash = hash, "Receipt not yet available"),
                Err(err) => warn!(tx_hash = hash, "Receipt lookup failed: {err:#}"),
            }

            if Instant::now() + self.receipt_poll > deadline {
                return Err(WriteFailure::Other(format!(
                    "Timed out waiting for transaction {hash} to be mined"
                )));
            }
            sleep(self.receipt_poll).await;
        }
    }
}

impl GiftReader for ContractGateway {
    async fn next_gift_id(&self) -> Result<u64> {
        self.fetch_next_gift_id().await
    }

    async fn get_gift(&self, id: u64) -> Result<Option<RawGift>> {
        self.fetch_gift(id).await.map(Some)
    }
}

fn ensure_future_unlock(unlock_time: u64) -> Result<(), WriteFailure> {
    let now = chrono::Utc::now().timestamp();
    if i128::from(unlock_time) <= i128::from(now) {
        return Err(WriteFailure::Other(
            "Unlock time must be in the future".to_string(),
        ));
    }
    Ok(())
}

fn parse_recipient(recipient: &str) -> Result<Address, WriteFailure> {
    let normalized = normalize_address(recipient)
        .ok_or_else(|| WriteFailure::Other(format!("Invalid recipient address {recipient}")))?;
    normalized
        .parse()
        .map_err(|err| WriteFailure::Other(format!("Invalid recipient address {recipient}: {err}")))
}
