// src/blockchain/memory_ledger.rs
//! In-memory ledger.
//!
//! Behaves like the anchor contract (fingerprint → anchoring account) with
//! deterministic confirmation: every accepted transaction reports `InBlock`
//! followed by `Finalized`. Counters for connections, releases, broadcasts
//! and unsubscriptions make resource handling observable.

use crate::blockchain::{Ledger, LedgerConnection, Subscription, TransactionHandle, TxStatus};
use crate::error::{AnchorError, Result};
use crate::models::credential::ContentFingerprint;
use crate::models::did::Identity;
use crate::wallet::TransactionSigner;
use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Bytes, TransactionRequest};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

#[derive(Default)]
struct LedgerState {
    anchors: HashMap<String, String>,
    reject_reason: Option<String>,
    last_caller_context: Option<String>,
    block_height: u64,
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    broadcasts: AtomicUsize,
    unsubscribes: AtomicUsize,
}

/// Shared in-memory ledger. Clones see the same records.
#[derive(Clone)]
pub struct MemoryLedger {
    did_method: String,
    state: Arc<Mutex<LedgerState>>,
    counters: Arc<Counters>,
    unreachable: Arc<AtomicBool>,
    queries_fail: Arc<AtomicBool>,
    queries_stall: Arc<AtomicBool>,
}

impl MemoryLedger {
    /// Creates an empty ledger reporting owners under `did_method`.
    pub fn new(did_method: &str) -> Self {
        Self {
            did_method: did_method.to_string(),
            state: Arc::default(),
            counters: Arc::default(),
            unreachable: Arc::default(),
            queries_fail: Arc::default(),
            queries_stall: Arc::default(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent transaction fail dispatch with `reason`.
    pub fn reject_transactions(&self, reason: &str) {
        self.state().reject_reason = Some(reason.to_string());
    }

    /// Makes `connect` fail as if the endpoint were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes `verify` fail at the transport level.
    pub fn fail_queries(&self, fail: bool) {
        self.queries_fail.store(fail, Ordering::SeqCst);
    }

    /// Makes `verify` hang until its caller gives up.
    pub fn stall_queries(&self, stall: bool) {
        self.queries_stall.store(stall, Ordering::SeqCst);
    }

    /// Address recorded for `fingerprint`, if any.
    pub fn owner_of(&self, fingerprint: &ContentFingerprint) -> Option<String> {
        self.state().anchors.get(fingerprint.as_str()).cloned()
    }

    pub fn last_caller_context(&self) -> Option<String> {
        self.state().last_caller_context.clone()
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.counters.disconnects.load(Ordering::SeqCst)
    }

    pub fn broadcasts(&self) -> usize {
        self.counters.broadcasts.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.counters.unsubscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn connect(&self) -> Result<Box<dyn LedgerConnection>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AnchorError::Connection("memory ledger is unreachable".into()));
        }
        debug!("memory ledger connection opened");
        Ok(Box::new(MemoryConnection {
            ledger: self.clone(),
            released: false,
        }))
    }
}

struct MemoryConnection {
    ledger: MemoryLedger,
    released: bool,
}

impl MemoryConnection {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.ledger.counters.disconnects.fetch_add(1, Ordering::SeqCst);
            debug!("memory ledger connection released");
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl LedgerConnection for MemoryConnection {
    async fn anchor(
        &self,
        fingerprint: &ContentFingerprint,
        signing_address: &str,
        signer: Arc<dyn TransactionSigner>,
    ) -> Result<TransactionHandle> {
        if signer.address() != signing_address {
            return Err(AnchorError::Dispatch(format!(
                "signer {} cannot authorize for {}",
                signer.address(),
                signing_address
            )));
        }
        let tx: TypedTransaction = TransactionRequest::new()
            .data(Bytes::from(fingerprint.to_bytes().to_vec()))
            .into();
        signer.sign(&tx).await?;
        self.ledger.counters.broadcasts.fetch_add(1, Ordering::SeqCst);

        let (events, rx) = mpsc::unbounded_channel();
        let tx_hash = format!("0x{}", crate::utils::crypto::hash_hex(&tx.rlp()));
        {
            let mut state = self.ledger.state();
            if let Some(reason) = state.reject_reason.clone() {
                let _ = events.send(TxStatus::Rejected { reason });
            } else {
                state.block_height += 1;
                let block = state.block_height.to_string();
                state
                    .anchors
                    .entry(fingerprint.as_str().to_string())
                    .or_insert_with(|| signing_address.to_string());
                let _ = events.send(TxStatus::InBlock { block: block.clone() });
                let _ = events.send(TxStatus::Finalized { block });
            }
        }
        info!("memory ledger accepted {} for {}", tx_hash, fingerprint);

        let counters = self.ledger.counters.clone();
        Ok(TransactionHandle {
            tx_hash,
            events: rx,
            subscription: Subscription::new(move || {
                counters.unsubscribes.fetch_add(1, Ordering::SeqCst);
            }),
        })
    }

    async fn verify(
        &self,
        fingerprint: &ContentFingerprint,
        caller_context: &str,
    ) -> Result<Option<Identity>> {
        if self.ledger.queries_stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.ledger.queries_fail.load(Ordering::SeqCst) {
            return Err(AnchorError::VerificationQuery("contract query trapped".into()));
        }
        let mut state = self.ledger.state();
        state.last_caller_context = Some(caller_context.to_string());
        Ok(state
            .anchors
            .get(fingerprint.as_str())
            .map(|address| Identity::from_address(&self.ledger.did_method, address)))
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::memory_wallet::MemoryWallet;
    use crate::wallet::WalletExtension;

    fn fingerprint() -> ContentFingerprint {
        ContentFingerprint::from_digest(crate::utils::crypto::hash_data(b"abc"))
    }

    #[tokio::test]
    async fn test_anchor_then_verify() {
        let ledger = MemoryLedger::new("w3bstitch");
        let wallet = MemoryWallet::new(&["5F3s"]);
        let mut conn = ledger.connect().await.unwrap();

        let signer = wallet.signer_for("5F3s").await.unwrap();
        let mut handle = conn.anchor(&fingerprint(), "5F3s", signer).await.unwrap();
        assert!(matches!(handle.events.recv().await, Some(TxStatus::InBlock { .. })));
        assert!(matches!(handle.events.recv().await, Some(TxStatus::Finalized { .. })));
        handle.subscription.unsubscribe();

        let owner = conn.verify(&fingerprint(), "5F3s").await.unwrap();
        assert_eq!(owner.unwrap().as_str(), "did:w3bstitch:5F3s");
        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();

        assert_eq!(ledger.unsubscribes(), 1);
        assert_eq!(ledger.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_first_anchor_is_kept() {
        let ledger = MemoryLedger::new("w3bstitch");
        let conn = ledger.connect().await.unwrap();
        let wallet = MemoryWallet::new(&["alice", "bob"]);

        for who in ["alice", "bob"] {
            let signer = wallet.signer_for(who).await.unwrap();
            conn.anchor(&fingerprint(), who, signer).await.unwrap();
        }
        assert_eq!(ledger.owner_of(&fingerprint()).as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_rejection_is_reported_on_stream() {
        let ledger = MemoryLedger::new("w3bstitch");
        ledger.reject_transactions("insufficient balance");
        let conn = ledger.connect().await.unwrap();
        let signer = MemoryWallet::new(&["5F3s"]).signer_for("5F3s").await.unwrap();

        let mut handle = conn.anchor(&fingerprint(), "5F3s", signer).await.unwrap();
        assert_eq!(
            handle.events.recv().await,
            Some(TxStatus::Rejected { reason: "insufficient balance".into() })
        );
        assert!(ledger.owner_of(&fingerprint()).is_none());
    }

    #[tokio::test]
    async fn test_dropped_connection_is_released_once() {
        let ledger = MemoryLedger::new("w3bstitch");
        let mut conn = ledger.connect().await.unwrap();
        conn.disconnect().await.unwrap();
        drop(conn);
        drop(ledger.connect().await.unwrap());
        assert_eq!(ledger.connects(), 2);
        assert_eq!(ledger.disconnects(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_ledger() {
        let ledger = MemoryLedger::new("w3bstitch");
        ledger.set_unreachable(true);
        assert!(matches!(ledger.connect().await, Err(AnchorError::Connection(_))));
    }
}
