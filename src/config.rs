// src/config.rs
//! Service configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `anchor.toml` in the working directory, then `ANCHOR_`-prefixed
//! environment variables (`ANCHOR_LEDGER_ENDPOINT`, `ANCHOR_GAS_LIMIT`, ...).

use crate::blockchain::ethereum_client::{EthereumLedger, EthereumSettings};
use crate::blockchain::memory_ledger::MemoryLedger;
use crate::blockchain::{Ledger, TxParam};
use crate::error::{AnchorError, Result};
use crate::services::verification_code::VerificationCodeEncoder;
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default configuration file, looked up without extension.
pub const DEFAULT_CONFIG_FILE: &str = "anchor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// JSON-RPC node with a deployed anchor contract
    Ethereum,
    /// In-process ledger
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ledger_endpoint: String,
    /// Anchor contract address; required by the ethereum backend
    pub contract_address: String,
    pub wallet_project_id: String,
    pub ledger_backend: LedgerBackend,
    /// Origin used in verification URLs
    pub origin: String,
    pub listen_addr: String,
    pub application_name: String,
    pub did_method: String,
    /// Comma-separated hex private keys
    pub wallet_keys: String,
    pub gas_limit: TxParam,
    pub nonce: TxParam,
    pub qr_margin: u32,
    pub qr_width: u32,
    pub confirmation_poll_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ledger_endpoint: "http://127.0.0.1:8545".to_string(),
            contract_address: String::new(),
            wallet_project_id: String::new(),
            ledger_backend: LedgerBackend::Memory,
            origin: "http://127.0.0.1:3000".to_string(),
            listen_addr: "127.0.0.1:3000".to_string(),
            application_name: "W3b Stitch".to_string(),
            did_method: "w3bstitch".to_string(),
            wallet_keys: String::new(),
            gas_limit: TxParam::Auto,
            nonce: TxParam::Auto,
            qr_margin: 1,
            qr_width: 280,
            confirmation_poll_ms: 2000,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `anchor.toml` (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Some(DEFAULT_CONFIG_FILE))
    }

    /// Loads configuration, layering `path` over the defaults when given.
    ///
    /// # Errors
    /// `AnchorError::Config` if a source cannot be parsed or a value is invalid.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(config::Environment::with_prefix("ANCHOR"));

        let loaded: AppConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.ledger_endpoint)
            .map_err(|e| AnchorError::Config(format!("ledger_endpoint: {}", e)))?;
        Url::parse(&self.origin).map_err(|e| AnchorError::Config(format!("origin: {}", e)))?;
        self.listen_addr()?;
        if self.did_method.is_empty() || self.did_method.contains(':') {
            return Err(AnchorError::Config(format!(
                "did_method must be a non-empty name without ':', got {:?}",
                self.did_method
            )));
        }
        if self.qr_width == 0 {
            return Err(AnchorError::Config("qr_width must be positive".into()));
        }
        if self.confirmation_poll_ms == 0 {
            return Err(AnchorError::Config("confirmation_poll_ms must be positive".into()));
        }
        if self.ledger_backend == LedgerBackend::Ethereum && self.contract_address.is_empty() {
            return Err(AnchorError::Config(
                "contract_address is required for the ethereum backend".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|e| AnchorError::Config(format!("listen_addr {:?}: {}", self.listen_addr, e)))
    }

    /// Configured private keys, blanks removed.
    pub fn wallet_keys(&self) -> Vec<String> {
        self.wallet_keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn encoder(&self) -> VerificationCodeEncoder {
        VerificationCodeEncoder::new(&self.origin, self.qr_margin, self.qr_width)
    }

    pub fn ethereum_settings(&self) -> EthereumSettings {
        EthereumSettings {
            endpoint: self.ledger_endpoint.clone(),
            gas_limit: self.gas_limit,
            nonce: self.nonce,
            poll_interval: Duration::from_millis(self.confirmation_poll_ms),
            did_method: self.did_method.clone(),
        }
    }

    /// Builds the ledger selected by `ledger_backend`.
    pub fn build_ledger(&self) -> Result<Arc<dyn Ledger>> {
        match self.ledger_backend {
            LedgerBackend::Ethereum => {
                info!(
                    "using ethereum ledger at {} (contract {})",
                    self.ledger_endpoint, self.contract_address
                );
                Ok(Arc::new(EthereumLedger::new(
                    self.ethereum_settings(),
                    &self.contract_address,
                )?))
            }
            LedgerBackend::Memory => {
                info!("using in-memory ledger");
                Ok(Arc::new(MemoryLedger::new(&self.did_method)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "credential-anchor-config-{}-{}.toml",
            std::process::id(),
            rand::random::<u32>()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ledger_backend, LedgerBackend::Memory);
        assert_eq!(config.gas_limit, TxParam::Auto);
        assert_eq!(config.listen_addr().unwrap().port(), 3000);
        assert!(config.wallet_keys().is_empty());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = write_config(
            r#"
            ledger_backend = "ethereum"
            contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            gas_limit = "3000000"
            nonce = "auto"
            qr_width = 400
            wallet_keys = "0xaa, 0xbb ,"
            "#,
        );
        let config = AppConfig::load_from(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.ledger_backend, LedgerBackend::Ethereum);
        assert_eq!(config.gas_limit, TxParam::Fixed(3_000_000));
        assert_eq!(config.nonce, TxParam::Auto);
        assert_eq!(config.qr_width, 400);
        assert_eq!(config.qr_margin, 1);
        assert_eq!(config.wallet_keys(), vec!["0xaa", "0xbb"]);
        assert_eq!(config.ethereum_settings().poll_interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from(Some("/nonexistent/credential-anchor")).unwrap();
        assert_eq!(config.origin, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_invalid_values_fail() {
        let ethereum = AppConfig {
            ledger_backend: LedgerBackend::Ethereum,
            ..AppConfig::default()
        };
        assert!(matches!(ethereum.validate(), Err(AnchorError::Config(_))));

        let bad_addr = AppConfig { listen_addr: "nowhere".into(), ..AppConfig::default() };
        assert!(matches!(bad_addr.validate(), Err(AnchorError::Config(_))));

        let bad_method = AppConfig { did_method: "a:b".into(), ..AppConfig::default() };
        assert!(matches!(bad_method.validate(), Err(AnchorError::Config(_))));

        let path = write_config("gas_limit = \"lots\"\n");
        let result = AppConfig::load_from(path.to_str());
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(AnchorError::Config(_))));
    }

    #[tokio::test]
    async fn test_memory_backend_connects() {
        let ledger = AppConfig::default().build_ledger().unwrap();
        let mut connection = ledger.connect().await.unwrap();
        connection.disconnect().await.unwrap();
    }
}
