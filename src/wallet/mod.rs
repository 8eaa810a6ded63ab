// src/wallet/mod.rs
//! Wallet-extension capability surface.
//!
//! The anchoring core depends only on these traits, never on a concrete
//! extension: `enable` the capability for an application, list its accounts,
//! and obtain a signer for one account address.

pub mod key_management;
pub mod session_storage;

#[cfg(test)]
pub(crate) mod memory_wallet;

use crate::error::Result;
use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::Signature;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An account exposed by the wallet capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub address: String,
    /// Human label, if the wallet provides one.
    pub name: Option<String>,
}

/// Authorizes transactions on behalf of exactly one account.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Address this signer authorizes for.
    fn address(&self) -> String;

    /// Signs a fully-populated transaction.
    async fn sign(&self, tx: &TypedTransaction) -> Result<Signature>;
}

#[async_trait]
pub trait WalletExtension: Send + Sync {
    /// Engages the capability on behalf of `application_name`.
    ///
    /// # Errors
    /// `AnchorError::WalletConnection` if no provider responds.
    async fn enable(&self, application_name: &str) -> Result<()>;

    /// Accounts currently exposed, in the wallet's own order.
    async fn list_accounts(&self) -> Result<Vec<WalletAccount>>;

    /// Returns a signer for `address`.
    async fn signer_for(&self, address: &str) -> Result<Arc<dyn TransactionSigner>>;
}
