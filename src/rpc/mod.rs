use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonrpsee::core::ClientError;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone)]
pub struct RpcClient {
    inner: HttpClient,
}

impl RpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        assert!(!endpoint.is_empty(), "RPC endpoint must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );
        assert!(
            timeout <= Duration::from_secs(60),
            "Timeout exceeds maximum bound"
        );

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .with_context(|| format!("Failed to build RPC client for {endpoint}"))?;

        Ok(Self { inner: client })
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let response: String = self
            .inner
            .request("eth_chainId", rpc_params![])
            .await
            .context("RPC call eth_chainId failed")?;
        parse_quantity(&response)
    }

    pub async fn accounts(&self) -> Result<Vec<String>> {
        let accounts: Vec<String> = self
            .inner
            .request("eth_accounts", rpc_params![])
            .await
            .context("RPC call eth_accounts failed")?;
        assert!(accounts.len() <= 1_024, "Account list exceeded defensive limit");
        Ok(accounts)
    }

    pub async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>> {
        assert!(!to.is_empty(), "Call target must be provided");
        let request = json!({
            "to": to,
            "data": encode_hex_prefixed(data),
        });
        let response: String = self
            .inner
            .request("eth_call", rpc_params![request, "latest"])
            .await
            .context("RPC call eth_call failed")?;
        decode_hex_prefixed(&response)
    }

    pub async fn send_transaction(&self, request: &TransactionRequest) -> Result<String> {
        assert!(!request.from.is_empty(), "Sender address must be provided");
        assert!(!request.to.is_empty(), "Target address must be provided");
        let hash: String = self
            .inner
            .request("eth_sendTransaction", rpc_params![request])
            .await
            .context("RPC call eth_sendTransaction failed")?;
        if hash.len() != 66 {
            return Err(anyhow!("RPC returned malformed transaction hash {hash}"));
        }
        Ok(hash)
    }

    pub async fn transaction_receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>> {
        assert!(!hash.is_empty(), "Transaction hash must be provided");
        let receipt: Option<TransactionReceipt> = self
            .inner
            .request("eth_getTransactionReceipt", rpc_params![hash])
            .await
            .with_context(|| format!("RPC call eth_getTransactionReceipt failed for {hash}"))?;
        Ok(receipt)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub from: String,
    pub to: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TransactionReceipt {
    /// Pre-Byzantium receipts carry no status; those count as success.
    pub fn succeeded(&self) -> bool {
        match self.status.as_deref() {
            Some(status) => parse_quantity(status).map(|code| code == 1).unwrap_or(false),
            None => true,
        }
    }

    pub fn block_number(&self) -> Option<u64> {
        self.block_number
            .as_deref()
            .and_then(|number| parse_quantity(number).ok())
    }
}

/// Best-effort human text for a failed RPC call. JSON-RPC error objects are
/// reduced to their message, with an ABI-encoded `Error(string)` payload
/// decoded and appended when the message does not already carry it.
pub fn describe_error(err: &anyhow::Error) -> String {
    for cause in err.chain() {
        if let Some(ClientError::Call(object)) = cause.downcast_ref::<ClientError>() {
            let message = object.message().to_string();
            let reason = object
                .data()
                .and_then(|raw| serde_json::from_str::<String>(raw.get()).ok())
                .and_then(|data| decode_hex_prefixed(&data).ok())
                .and_then(|bytes| alloy::sol_types::decode_revert_reason(&bytes));
            return match reason {
                Some(reason) if !message.contains(&reason) => format!("{message}: {reason}"),
                _ => message,
            };
        }
    }
    format!("{err:#}")
}

pub fn encode_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn decode_hex_prefixed(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).map_err(|err| anyhow!("Failed to decode hex payload: {err}"))
}

pub fn parse_quantity(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("Quantity {trimmed} is missing the 0x prefix"))?;
    if digits.is_empty() {
        return Err(anyhow!("Quantity {trimmed} has no digits"));
    }
    u64::from_str_radix(digits, 16).map_err(|err| anyhow!("Invalid quantity {trimmed}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_parse_as_hex() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0xaa36a7").unwrap(), 11_155_111);
        assert!(parse_quantity("12").is_err());
        assert!(parse_quantity("0x").is_err());
    }

    #[test]
    fn hex_payloads_roundtrip() {
        let encoded = encode_hex_prefixed(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(encoded, "0xdeadbeef");
        assert_eq!(decode_hex_prefixed(&encoded).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decode_hex_prefixed("0x").unwrap(), Vec::<u8>::new());
        assert!(decode_hex_prefixed("0xzz").is_err());
    }

    #[test]
    fn receipt_status_decoding() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0xabc",
            "blockNumber": "0x10",
            "status": "0x1"
        }))
        .unwrap();
        assert!(receipt.succeeded());
        assert_eq!(receipt.block_number(), Some(16));

        let failed: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0xabc",
            "status": "0x0"
        }))
        .unwrap();
        assert!(!failed.succeeded());
        assert_eq!(failed.block_number(), None);
    }

    #[test]
    fn transaction_request_omits_missing_value() {
        let request = TransactionRequest {
            from: "0x01".to_string(),
            to: "0x02".to_string(),
            data: "0x".to_string(),
            value: None,
        };
        let encoded = serde_json::to_value(&request).unwrap();
        assert!(encoded.get("value").is_none());
        assert_eq!(encoded["from"], "0x01");
    }

    #[test]
    fn plain_errors_are_described_with_context() {
        let err = anyhow!("connection refused").context("RPC call eth_call failed");
        assert_eq!(describe_error(&err), "RPC call eth_call failed: connection refused");
    }
}
