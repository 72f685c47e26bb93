use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::contract::ContractGateway;
use crate::rpc::RpcClient;
use crate::session::WalletSession;

/// Everything a command needs, wired once from configuration.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub gateway: ContractGateway,
    pub session: WalletSession,
    pub start_time: Instant,
}

impl AppState {
    pub async fn connect(config: AppConfig, address_override: Option<&str>) -> Result<Self> {
        let rpc = RpcClient::new(&config.chain.rpc_url, config.chain.request_timeout())
            .context("Failed to initialize RPC client")?;

        if let Some(expected) = config.chain.chain_id {
            let actual = rpc
                .chain_id()
                .await
                .context("Failed to verify chain id")?;
            if actual != expected {
                return Err(anyhow!(
                    "RPC endpoint serves chain {actual}, configuration expects {expected}"
                ));
            }
            info!(chain_id = actual, "Connected to expected chain");
        }

        let configured = address_override.or(config.wallet.address.as_deref());
        let session = WalletSession::resolve(&rpc, configured)
            .await
            .context("Failed to resolve wallet session")?;
        if !session.is_connected() {
            warn!("No wallet connected; gift discovery will be empty and writes will fail");
        }

        let gateway = ContractGateway::new(
            rpc,
            &config.chain.contract_address,
            &config.transactions,
        )
        .context("Failed to initialize contract gateway")?
        .with_sender(session.address());

        info!(
            contract = gateway.contract_address(),
            wallet = session.address().unwrap_or("none"),
            "ChronoVault client ready"
        );

        Ok(Self {
            config,
            gateway,
            session,
            start_time: Instant::now(),
        })
    }
}
