use anyhow::{Result, anyhow};
use tracing::{info, warn};

use crate::models::gift::normalize_address;
use crate::rpc::RpcClient;

/// The wallet the client acts for. Passed explicitly to discovery and
/// validation instead of being read from ambient state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletSession {
    address: Option<String>,
    connected: bool,
}

impl WalletSession {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(address: &str) -> Result<Self> {
        let normalized = normalize_address(address)
            .ok_or_else(|| anyhow!("Invalid wallet address {address}"))?;
        Ok(Self {
            address: Some(normalized),
            connected: true,
        })
    }

    /// Uses the configured address when present, otherwise the first account
    /// the RPC endpoint manages.
    pub async fn resolve(rpc: &RpcClient, configured: Option<&str>) -> Result<Self> {
        if let Some(address) = configured {
            return Self::connected(address);
        }

        match rpc.accounts().await {
            Ok(accounts) => match accounts.first() {
                Some(account) => {
                    info!(account = %account, "Using first account exposed by the RPC endpoint");
                    Self::connected(account)
                }
                None => {
                    warn!("RPC endpoint exposes no accounts; continuing without a wallet");
                    Ok(Self::disconnected())
                }
            },
            Err(err) => {
                warn!("Unable to list RPC accounts: {err:#}");
                Ok(Self::disconnected())
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.address.is_some()
    }

    pub fn address(&self) -> Option<&str> {
        if self.connected {
            self.address.as_deref()
        } else {
            None
        }
    }

    pub fn is_own_address(&self, candidate: &str) -> bool {
        match self.address() {
            Some(own) => own == candidate.trim().to_ascii_lowercase(),
            None => false,
        }
    }
}
