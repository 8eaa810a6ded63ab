// src/blockchain/mod.rs
//! Ledger client capability.
//!
//! A [`Ledger`] opens connections; each [`LedgerConnection`] serves exactly
//! one anchoring attempt or one verification page load and must be released
//! with [`LedgerConnection::disconnect`] once that operation reaches its
//! terminal outcome. Connections are never shared between the anchor and
//! verify paths.
//!
//! Two interchangeable implementations exist, selected by configuration:
//! - [`ethereum_client::EthereumLedger`]: JSON-RPC node with a deployed anchor contract
//! - [`memory_ledger::MemoryLedger`]: in-process ledger for tests and local runs

pub mod ethereum_client;
pub mod memory_ledger;

use crate::error::Result;
use crate::models::credential::ContentFingerprint;
use crate::models::did::Identity;
use crate::wallet::TransactionSigner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transaction parameter that is either left to the ledger or fixed.
///
/// Gas limit and nonce are configured with the `auto` sentinel by default and
/// passed through to the backend without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TxParam {
    Auto,
    Fixed(u64),
}

impl FromStr for TxParam {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "" | "auto" | "-1" => Ok(TxParam::Auto),
            other => other
                .parse::<u64>()
                .map(TxParam::Fixed)
                .map_err(|_| format!("expected \"auto\" or an unsigned integer, got {:?}", other)),
        }
    }
}

impl TryFrom<String> for TxParam {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TxParam> for String {
    fn from(value: TxParam) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TxParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxParam::Auto => f.write_str("auto"),
            TxParam::Fixed(n) => write!(f, "{}", n),
        }
    }
}

/// Status reported on a transaction's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Included in a block; not yet irreversible.
    InBlock { block: String },
    /// Irreversibly committed.
    Finalized { block: String },
    /// Dispatch-level rejection (reverted, invalid, insufficient balance).
    Rejected { reason: String },
    /// The stream can no longer follow the transaction.
    Lost { reason: String },
}

/// Handle to a transaction-status subscription.
///
/// The release hook runs exactly once: either through
/// [`Subscription::unsubscribe`], which consumes the handle, or on drop if the
/// handle was never released explicitly.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self { release: Some(Box::new(release)) }
    }

    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// A broadcast transaction and its status stream.
pub struct TransactionHandle {
    pub tx_hash: String,
    pub events: mpsc::UnboundedReceiver<TxStatus>,
    pub subscription: Subscription,
}

/// Factory for ledger connections.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Opens a fresh connection to the configured endpoint.
    ///
    /// # Errors
    /// `AnchorError::Connection` if the endpoint cannot be reached.
    async fn connect(&self) -> Result<Box<dyn LedgerConnection>>;
}

/// One connection, bound to the configured anchor contract.
#[async_trait]
pub trait LedgerConnection: Send + Sync {
    /// Signs and broadcasts `anchor(fingerprint)` from `signing_address`.
    ///
    /// # Errors
    /// `AnchorError::Dispatch` if the ledger refuses the transaction outright.
    async fn anchor(
        &self,
        fingerprint: &ContentFingerprint,
        signing_address: &str,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<TransactionHandle>;

    /// Read-only `verify(fingerprint)`; `caller_context` is passed as the call origin.
    ///
    /// # Returns
    /// The owner identity, or `None` if the fingerprint was never anchored.
    ///
    /// # Errors
    /// `AnchorError::VerificationQuery` if the query itself fails.
    async fn verify(
        &self,
        fingerprint: &ContentFingerprint,
        caller_context: &str,
    ) -> Result<Option<Identity>>;

    /// Releases the connection and anything still attached to it.
    async fn disconnect(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tx_param_parsing() {
        assert_eq!("auto".parse::<TxParam>().unwrap(), TxParam::Auto);
        assert_eq!("-1".parse::<TxParam>().unwrap(), TxParam::Auto);
        assert_eq!("3000000".parse::<TxParam>().unwrap(), TxParam::Fixed(3_000_000));
        assert!("lots".parse::<TxParam>().is_err());
    }

    #[test]
    fn test_subscription_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_subscription_is_released() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        drop(Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
