use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::models::gift::is_address_syntax;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub chain: ChainConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub transactions: TransactionConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let configured_path = std::env::var("CHRONOVAULT_CONFIG")
            .unwrap_or_else(|_| "config/chronovault.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("CHRONOVAULT_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/chronovault.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CHRONOVAULT")
                .prefix_separator("__")
                .separator("__"),
        );

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize ChronoVault configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if self.chain.rpc_url.trim().is_empty() {
            return Err(anyhow!("chain.rpc_url must be specified"));
        }
        if !is_address_syntax(&self.chain.contract_address) {
            return Err(anyhow!(
                "chain.contract_address is not a valid address: {}",
                self.chain.contract_address
            ));
        }
        self.chain.contract_address = self.chain.contract_address.trim().to_ascii_lowercase();

        if let Some(address) = self.wallet.address.as_mut() {
            if !is_address_syntax(address) {
                return Err(anyhow!("wallet.address is not a valid address: {address}"));
            }
            *address = address.trim().to_ascii_lowercase();
        }

        self.chain.ensure_bounds()?;
        self.discovery.ensure_bounds()?;
        self.transactions.ensure_bounds()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub request_timeout_ms: Option<u64>,
    pub contract_address: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(3_000);
        assert!(millis >= 100, "RPC timeout must be at least 100ms");
        assert!(millis <= 60_000, "RPC timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }

    fn ensure_bounds(&self) -> Result<()> {
        if let Some(millis) = self.request_timeout_ms {
            if !(100..=60_000).contains(&millis) {
                return Err(anyhow!(
                    "chain.request_timeout_ms must be within 100..=60000, got {millis}"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "DiscoveryConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "DiscoveryConfig::default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "DiscoveryConfig::default_read_concurrency")]
    pub read_concurrency: usize,
    #[serde(default = "DiscoveryConfig::default_max_scan")]
    pub max_scan: u64,
    #[serde(default = "DiscoveryConfig::default_token_decimals")]
    pub token_decimals: u8,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval_ms(),
            settle_delay_ms: Self::default_settle_delay_ms(),
            read_concurrency: Self::default_read_concurrency(),
            max_scan: Self::default_max_scan(),
            token_decimals: Self::default_token_decimals(),
        }
    }
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        assert!(
            self.poll_interval_ms >= 100,
            "Poll interval must be >= 100ms"
        );
        assert!(
            self.poll_interval_ms <= 60_000,
            "Poll interval must be <= 60 seconds"
        );
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        assert!(
            self.settle_delay_ms <= 60_000,
            "Settle delay must be <= 60 seconds"
        );
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn ensure_bounds(&self) -> Result<()> {
        if !(100..=60_000).contains(&self.poll_interval_ms) {
            return Err(anyhow!(
                "discovery.poll_interval_ms must be within 100..=60000, got {}",
                self.poll_interval_ms
            ));
        }
        if self.settle_delay_ms > 60_000 {
            return Err(anyhow!(
                "discovery.settle_delay_ms must be <= 60000, got {}",
                self.settle_delay_ms
            ));
        }
        if !(1..=256).contains(&self.read_concurrency) {
            return Err(anyhow!(
                "discovery.read_concurrency must be within 1..=256, got {}",
                self.read_concurrency
            ));
        }
        if !(1..=1_000_000).contains(&self.max_scan) {
            return Err(anyhow!(
                "discovery.max_scan must be within 1..=1000000, got {}",
                self.max_scan
            ));
        }
        if self.token_decimals > 36 {
            return Err(anyhow!(
                "discovery.token_decimals must be <= 36, got {}",
                self.token_decimals
            ));
        }
        Ok(())
    }

    const fn default_poll_interval_ms() -> u64 {
        3_000
    }

    const fn default_settle_delay_ms() -> u64 {
        3_000
    }

    const fn default_read_concurrency() -> usize {
        16
    }

    const fn default_max_scan() -> u64 {
        10_000
    }

    const fn default_token_decimals() -> u8 {
        18
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    #[serde(default = "TransactionConfig::default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    #[serde(default = "TransactionConfig::default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            receipt_poll_ms: Self::default_receipt_poll_ms(),
            receipt_timeout_ms: Self::default_receipt_timeout_ms(),
        }
    }
}

impl TransactionConfig {
    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    fn ensure_bounds(&self) -> Result<()> {
        if !(100..=60_000).contains(&self.receipt_poll_ms) {
            return Err(anyhow!(
                "transactions.receipt_poll_ms must be within 100..=60000, got {}",
                self.receipt_poll_ms
            ));
        }
        if self.receipt_timeout_ms < self.receipt_poll_ms {
            return Err(anyhow!(
                "transactions.receipt_timeout_ms must be >= receipt_poll_ms"
            ));
        }
        if self.receipt_timeout_ms > 3_600_000 {
            return Err(anyhow!(
                "transactions.receipt_timeout_ms cannot exceed one hour"
            ));
        }
        Ok(())
    }

    const fn default_receipt_poll_ms() -> u64 {
        1_000
    }

    const fn default_receipt_timeout_ms() -> u64 {
        120_000
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_defaults_are_within_bounds() {
        let discovery = DiscoveryConfig::default();
        assert!(discovery.ensure_bounds().is_ok());
        assert_eq!(discovery.poll_interval(), Duration::from_secs(3));
        assert_eq!(discovery.settle_delay(), Duration::from_secs(3));
    }

    #[test]
    fn discovery_rejects_zero_concurrency() {
        let discovery = DiscoveryConfig {
            read_concurrency: 0,
            ..DiscoveryConfig::default()
        };
        assert!(discovery.ensure_bounds().is_err());
    }

    #[test]
    fn receipt_timeout_must_cover_poll() {
        let transactions = TransactionConfig {
            receipt_poll_ms: 2_000,
            receipt_timeout_ms: 1_000,
        };
        assert!(transactions.ensure_bounds().is_err());
    }

    #[test]
    fn validate_normalizes_addresses() {
        let mut config = AppConfig {
            chain: ChainConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                request_timeout_ms: None,
                contract_address: " 0x8D05dA559A196e715D36E2020E6288f9184C2750 ".to_string(),
                chain_id: Some(11_155_111),
            },
            wallet: WalletConfig {
                address: Some("0xAbCdEf0123456789aBcDeF0123456789AbCdEf01".to_string()),
            },
            discovery: DiscoveryConfig::default(),
            transactions: TransactionConfig::default(),
        };
        config.validate().expect("valid config");
        assert_eq!(
            config.chain.contract_address,
            "0x8d05da559a196e715d36e2020e6288f9184c2750"
        );
        assert_eq!(
            config.wallet.address.as_deref(),
            Some("0xabcdef0123456789abcdef0123456789abcdef01")
        );
    }

    #[test]
    fn validate_rejects_out_of_range_request_timeout() {
        for millis in [0, 99, 60_001] {
            let mut config = AppConfig {
                chain: ChainConfig {
                    rpc_url: "http://127.0.0.1:8545".to_string(),
                    request_timeout_ms: Some(millis),
                    contract_address: "0x8D05dA559A196e715D36E2020E6288f9184C2750".to_string(),
                    chain_id: None,
                },
                wallet: WalletConfig::default(),
                discovery: DiscoveryConfig::default(),
                transactions: TransactionConfig::default(),
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("request_timeout_ms"), "{millis}");
        }
    }

    #[test]
    fn validate_rejects_uppercase_hex_prefix() {
        let mut config = AppConfig {
            chain: ChainConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                request_timeout_ms: Some(3_000),
                contract_address: "0X8D05dA559A196e715D36E2020E6288f9184C2750".to_string(),
                chain_id: None,
            },
            wallet: WalletConfig::default(),
            discovery: DiscoveryConfig::default(),
            transactions: TransactionConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_contract_address() {
        let mut config = AppConfig {
            chain: ChainConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                request_timeout_ms: None,
                contract_address: "0x123".to_string(),
                chain_id: None,
            },
            wallet: WalletConfig::default(),
            discovery: DiscoveryConfig::default(),
            transactions: TransactionConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
