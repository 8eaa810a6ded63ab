// src/wallet/key_management.rs
//! Key-backed wallet capability.
//!
//! Provides the wallet-extension surface from locally configured secp256k1
//! private keys, so the service can sign anchor transactions without a
//! browser extension:
//! - Account listing (one account per key, in configuration order)
//! - Per-account transaction signing
//!
//! Uses `ethers` `LocalWallet` for key handling and EIP-155 signing.

use crate::error::{AnchorError, Result};
use crate::wallet::{TransactionSigner, WalletAccount, WalletExtension};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use log::{debug, info};
use std::sync::Arc;

/// Formats an address as a lowercase hex string with 0x prefix.
pub fn format_address(addr: Address) -> String {
    format!("0x{:x}", addr)
}

/// Signer for a single local key.
#[derive(Clone)]
pub struct KeySigner {
    wallet: LocalWallet,
}

#[async_trait]
impl TransactionSigner for KeySigner {
    fn address(&self) -> String {
        format_address(self.wallet.address())
    }

    async fn sign(&self, tx: &TypedTransaction) -> Result<Signature> {
        self.wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| AnchorError::Unknown(format!("signing failed: {}", e)))
    }
}

/// Wallet capability backed by a fixed set of private keys.
///
/// # Security Notes
/// - Keys are held in memory only for the lifetime of the process
/// - Secret material is never logged; only derived addresses are
#[derive(Clone)]
pub struct KeyWallet {
    wallets: Vec<LocalWallet>,
    project_id: String,
}

impl KeyWallet {
    /// Builds a wallet from hex-encoded private keys (with or without 0x prefix).
    ///
    /// # Arguments
    /// * `keys` - Private keys, one account each
    /// * `project_id` - Wallet relay project id; recorded for diagnostics
    ///
    /// # Errors
    /// Returns `AnchorError::Config` if any key fails to parse.
    pub fn from_keys<S: AsRef<str>>(keys: &[S], project_id: &str) -> Result<Self> {
        let wallets = keys
            .iter()
            .map(|key| {
                key.as_ref()
                    .trim()
                    .trim_start_matches("0x")
                    .parse::<LocalWallet>()
                    .map_err(|e| AnchorError::Config(format!("invalid wallet key: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            wallets,
            project_id: project_id.to_string(),
        })
    }

    /// Generates a wallet holding one fresh random key.
    pub fn ephemeral() -> Self {
        Self {
            wallets: vec![LocalWallet::new(&mut rand::thread_rng())],
            project_id: String::new(),
        }
    }

    pub fn account_count(&self) -> usize {
        self.wallets.len()
    }
}

#[async_trait]
impl WalletExtension for KeyWallet {
    async fn enable(&self, application_name: &str) -> Result<()> {
        if self.wallets.is_empty() {
            return Err(AnchorError::WalletConnection(
                "no wallet provider responded".into(),
            ));
        }
        debug!("wallet relay project id: {:?}", self.project_id);
        info!(
            "wallet enabled for {} ({} account(s))",
            application_name,
            self.wallets.len()
        );
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<WalletAccount>> {
        Ok(self
            .wallets
            .iter()
            .enumerate()
            .map(|(i, w)| WalletAccount {
                address: format_address(w.address()),
                name: Some(format!("key-{}", i)),
            })
            .collect())
    }

    async fn signer_for(&self, address: &str) -> Result<Arc<dyn TransactionSigner>> {
        self.wallets
            .iter()
            .find(|w| format_address(w.address()).eq_ignore_ascii_case(address))
            .map(|w| Arc::new(KeySigner { wallet: w.clone() }) as Arc<dyn TransactionSigner>)
            .ok_or_else(|| {
                AnchorError::WalletConnection(format!("no signer available for {}", address))
            })
    }
}
