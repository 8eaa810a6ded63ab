// src/main.rs

//! # Credential Anchor - Main Entry Point
//!
//! Loads configuration, wires the wallet capability, ledger and services,
//! and starts the API server.
//!
//! ## Configuration
//! Read from `anchor.toml` and `ANCHOR_*` environment variables (a `.env`
//! file is honoured). Common settings:
//! - `ANCHOR_LEDGER_BACKEND`: `memory` (default) or `ethereum`
//! - `ANCHOR_LEDGER_ENDPOINT`: JSON-RPC endpoint for the ethereum backend
//! - `ANCHOR_CONTRACT_ADDRESS`: deployed anchor contract
//! - `ANCHOR_WALLET_KEYS`: comma-separated hex private keys
//! - `ANCHOR_ORIGIN`: origin embedded in verification URLs

use anyhow::Context;
use credential_anchor::config::{AppConfig, LedgerBackend};
use credential_anchor::services::api_server::ApiServer;
use credential_anchor::services::identity_binding::IdentityBinding;
use credential_anchor::wallet::key_management::KeyWallet;
use credential_anchor::wallet::session_storage::MemorySessionStore;
use credential_anchor::wallet::WalletExtension;
use dotenv::dotenv;
use log::{info, warn};
use std::sync::Arc;

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment and configuration
/// 2. Build the wallet capability and ledger
/// 3. Restore the session identity
/// 4. Start API server
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load().context("failed to load configuration")?;

    let keys = config.wallet_keys();
    let key_wallet = if keys.is_empty() && config.ledger_backend == LedgerBackend::Memory {
        warn!("no wallet keys configured, using an ephemeral key for the in-memory ledger");
        KeyWallet::ephemeral()
    } else {
        KeyWallet::from_keys(&keys, &config.wallet_project_id).context("invalid wallet keys")?
    };
    info!("wallet capability holds {} account(s)", key_wallet.account_count());
    let wallet: Arc<dyn WalletExtension> = Arc::new(key_wallet);

    let ledger = config.build_ledger().context("failed to initialize ledger")?;

    let identity = Arc::new(IdentityBinding::new(
        wallet.clone(),
        Arc::new(MemorySessionStore::new()),
        &config.application_name,
        &config.did_method,
    ));

    let api_server = ApiServer::new(
        identity,
        ledger,
        wallet,
        config.encoder(),
        &config.application_name,
    );

    let addr = config.listen_addr()?;
    info!("verification codes point at {}/verify", config.origin);
    api_server.run(addr).await.context("API server failed")?;
    Ok(())
}
