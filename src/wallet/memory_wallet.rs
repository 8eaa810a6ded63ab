// src/wallet/memory_wallet.rs
//! Scripted wallet capability for tests.

use crate::error::{AnchorError, Result};
use crate::wallet::{TransactionSigner, WalletAccount, WalletExtension};
use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Signature, U256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) struct FixedSigner {
    address: String,
    pub(crate) signatures: AtomicUsize,
}

#[async_trait]
impl TransactionSigner for FixedSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign(&self, _tx: &TypedTransaction) -> Result<Signature> {
        self.signatures.fetch_add(1, Ordering::SeqCst);
        Ok(Signature { r: U256::one(), s: U256::one(), v: 27 })
    }
}

/// Wallet exposing a fixed account list.
///
/// `signer_override` makes `signer_for` hand back a signer for a different
/// account than the one requested, as a multi-account wallet might.
pub(crate) struct MemoryWallet {
    accounts: Vec<String>,
    signer_override: Option<String>,
    pub(crate) enables: AtomicUsize,
}

impl MemoryWallet {
    pub(crate) fn new(accounts: &[&str]) -> Self {
        Self {
            accounts: accounts.iter().map(|a| a.to_string()).collect(),
            signer_override: None,
            enables: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_signer_override(mut self, address: &str) -> Self {
        self.signer_override = Some(address.to_string());
        self
    }
}

#[async_trait]
impl WalletExtension for MemoryWallet {
    async fn enable(&self, _application_name: &str) -> Result<()> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        if self.accounts.is_empty() {
            return Err(AnchorError::WalletConnection("no wallet provider responded".into()));
        }
        Ok(())
    }

    async fn list_accounts(&self) -> Result<Vec<WalletAccount>> {
        Ok(self
            .accounts
            .iter()
            .map(|a| WalletAccount { address: a.clone(), name: None })
            .collect())
    }

    async fn signer_for(&self, address: &str) -> Result<Arc<dyn TransactionSigner>> {
        let address = self.signer_override.clone().unwrap_or_else(|| address.to_string());
        Ok(Arc::new(FixedSigner { address, signatures: AtomicUsize::new(0) }))
    }
}
