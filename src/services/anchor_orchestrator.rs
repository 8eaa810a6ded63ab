// src/services/anchor_orchestrator.rs
//! Anchor transaction state machine.
//!
//! Drives one anchoring attempt through
//!
//! ```text
//! Idle -> Connecting -> AwaitingSignature -> Submitting -> InBlock -> Finalized
//!   \________\_______________\__________________\____________\-----> Failed
//! ```
//!
//! Each orchestrator instance serves a single attempt; a retry is a fresh
//! instance starting from `Idle`. Nothing is retried automatically.
//!
//! Progress is published on a watch channel, so consumers can poll the
//! latest snapshot, subscribe to transitions, or await the terminal state.
//!
//! Resource rules:
//! - The ledger connection opened on `Connecting` is released on every exit path
//! - The transaction status subscription is released exactly once
//! - The verification code is produced optimistically on `InBlock`, before finality

use crate::blockchain::{Ledger, LedgerConnection, TransactionHandle, TxStatus};
use crate::error::{AnchorError, Result};
use crate::models::credential::ContentFingerprint;
use crate::models::did::Identity;
use crate::services::verification_code::{VerificationCode, VerificationCodeEncoder};
use crate::wallet::WalletExtension;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorState {
    Idle,
    Connecting,
    AwaitingSignature,
    Submitting,
    InBlock,
    Finalized,
    Failed,
}

impl AnchorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnchorState::Finalized | AnchorState::Failed)
    }

    /// Status line shown to the owner while the attempt runs.
    pub fn describe(self) -> &'static str {
        match self {
            AnchorState::Idle => "",
            AnchorState::Connecting => "Connecting to chain…",
            AnchorState::AwaitingSignature => "Awaiting wallet confirmation…",
            AnchorState::Submitting => "Anchoring hash on-chain…",
            AnchorState::InBlock => "Included in block",
            AnchorState::Finalized => "Finalized",
            AnchorState::Failed => "Failed",
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub state: AnchorState,
    pub at: DateTime<Utc>,
}

/// Snapshot of an attempt's progress.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorProgress {
    pub state: AnchorState,
    pub fingerprint: Option<ContentFingerprint>,
    pub identity: Option<Identity>,
    pub tx_hash: Option<String>,
    /// Block the transaction landed in
    pub block: Option<String>,
    pub code: Option<VerificationCode>,
    /// Human-readable failure reason, set only on `Failed`
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<AnchorError>,
    pub transitions: Vec<Transition>,
}

impl AnchorProgress {
    pub fn idle() -> Self {
        Self {
            state: AnchorState::Idle,
            fingerprint: None,
            identity: None,
            tx_hash: None,
            block: None,
            code: None,
            error: None,
            failure: None,
            transitions: vec![Transition { state: AnchorState::Idle, at: Utc::now() }],
        }
    }
}

/// Successful terminal outcome.
#[derive(Debug, Clone)]
pub struct AnchorOutcome {
    pub tx_hash: String,
    pub block: String,
    pub code: VerificationCode,
}

/// Session-wide busy flag. At most one attempt may hold it.
#[derive(Debug, Default)]
pub struct AnchorSlot {
    busy: Arc<AtomicBool>,
}

impl AnchorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot.
    ///
    /// # Errors
    /// `AnchorError::Busy` while another attempt holds it.
    pub fn try_begin(&self) -> Result<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AnchorError::Busy)?;
        Ok(BusyGuard { busy: self.busy.clone() })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Clears the busy flag when dropped, whatever the outcome.
#[derive(Debug)]
pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

pub struct AnchorOrchestrator {
    ledger: Arc<dyn Ledger>,
    wallet: Arc<dyn WalletExtension>,
    encoder: VerificationCodeEncoder,
    application_name: String,
    progress: watch::Sender<AnchorProgress>,
}

impl AnchorOrchestrator {
    /// Creates an orchestrator in `Idle`.
    ///
    /// # Arguments
    /// * `ledger` - Ledger used to open this attempt's connection
    /// * `wallet` - Wallet capability providing the signer
    /// * `encoder` - Verification code encoder used on block inclusion
    /// * `application_name` - Name presented to the wallet on `enable`
    pub fn new(
        ledger: Arc<dyn Ledger>,
        wallet: Arc<dyn WalletExtension>,
        encoder: VerificationCodeEncoder,
        application_name: &str,
    ) -> Self {
        let (progress, _) = watch::channel(AnchorProgress::idle());
        Self {
            ledger,
            wallet,
            encoder,
            application_name: application_name.to_string(),
            progress,
        }
    }

    /// Receiver for progress snapshots; take it before calling [`run`](Self::run).
    pub fn subscribe(&self) -> watch::Receiver<AnchorProgress> {
        self.progress.subscribe()
    }

    pub fn snapshot(&self) -> AnchorProgress {
        self.progress.borrow().clone()
    }

    /// Waits until `progress` reports a terminal state and returns that snapshot.
    pub async fn wait_terminal(progress: &mut watch::Receiver<AnchorProgress>) -> AnchorProgress {
        // An error means the sender is gone and the last value is final.
        let _ = progress.wait_for(|p| p.state.is_terminal()).await;
        progress.borrow().clone()
    }

    /// Records what the attempt will anchor, before it starts.
    pub fn stage(&self, fingerprint: &ContentFingerprint, identity: Option<&Identity>) {
        self.progress.send_modify(|p| {
            p.fingerprint = Some(fingerprint.clone());
            p.identity = identity.cloned();
        });
    }

    /// Runs the attempt to completion.
    ///
    /// # Arguments
    /// * `fingerprint` - Content fingerprint to anchor
    /// * `identity` - Identity bound in the session, if any
    ///
    /// # Errors
    /// - `NotLoggedIn` without an identity; no connection is attempted
    /// - `Connection` if the ledger cannot be reached
    /// - `WalletConnection` / `IdentityMismatch` while resolving the signer;
    ///   nothing is broadcast
    /// - `Dispatch` if the ledger rejects the transaction
    pub async fn run(
        self,
        fingerprint: &ContentFingerprint,
        identity: Option<&Identity>,
    ) -> Result<AnchorOutcome> {
        self.stage(fingerprint, identity);

        let Some(identity) = identity else {
            return Err(self.fail(AnchorError::NotLoggedIn));
        };

        self.transition(AnchorState::Connecting);
        let mut connection = match self.ledger.connect().await {
            Ok(connection) => connection,
            Err(e) => return Err(self.fail(e)),
        };

        let outcome = self.drive(connection.as_ref(), fingerprint, identity).await;

        match connection.disconnect().await {
            Ok(()) => debug!("anchor connection released"),
            Err(e) => warn!("failed to release anchor connection: {}", e),
        }

        outcome.map_err(|e| self.fail(e))
    }

    async fn drive(
        &self,
        connection: &dyn LedgerConnection,
        fingerprint: &ContentFingerprint,
        identity: &Identity,
    ) -> Result<AnchorOutcome> {
        self.wallet.enable(&self.application_name).await?;
        let address = identity.address();
        let accounts = self.wallet.list_accounts().await?;
        if !accounts.iter().any(|a| same_address(&a.address, address)) {
            return Err(AnchorError::IdentityMismatch(format!(
                "no wallet account for {}",
                address
            )));
        }
        let signer = self.wallet.signer_for(address).await?;
        let signing_address = signer.address();
        if !same_address(&signing_address, address) {
            return Err(AnchorError::IdentityMismatch(format!(
                "signer resolved to {}, expected {}",
                signing_address, address
            )));
        }
        self.transition(AnchorState::AwaitingSignature);

        let handle = connection.anchor(fingerprint, &signing_address, signer).await?;
        self.progress.send_modify(|p| p.tx_hash = Some(handle.tx_hash.clone()));
        self.transition(AnchorState::Submitting);

        self.follow(handle, fingerprint, identity).await
    }

    /// Consumes the status stream up to finality or rejection.
    async fn follow(
        &self,
        handle: TransactionHandle,
        fingerprint: &ContentFingerprint,
        identity: &Identity,
    ) -> Result<AnchorOutcome> {
        let TransactionHandle { tx_hash, mut events, subscription } = handle;
        let mut code: Option<VerificationCode> = None;

        let outcome = loop {
            match events.recv().await {
                Some(TxStatus::InBlock { block }) => {
                    info!("{} included in block {}", tx_hash, block);
                    match self.encoder.encode(identity, fingerprint) {
                        Ok(generated) => {
                            self.progress.send_modify(|p| {
                                p.block = Some(block.clone());
                                p.code = Some(generated.clone());
                            });
                            code = Some(generated);
                            self.transition(AnchorState::InBlock);
                        }
                        Err(e) => break Err(e),
                    }
                }
                Some(TxStatus::Finalized { block }) => {
                    let code = match code.take() {
                        Some(code) => code,
                        // Finality reported without a prior inclusion event.
                        None => match self.encoder.encode(identity, fingerprint) {
                            Ok(code) => code,
                            Err(e) => break Err(e),
                        },
                    };
                    break Ok(AnchorOutcome { tx_hash: tx_hash.clone(), block, code });
                }
                Some(TxStatus::Rejected { reason }) => break Err(AnchorError::Dispatch(reason)),
                Some(TxStatus::Lost { reason }) => break Err(AnchorError::Connection(reason)),
                None => {
                    break Err(AnchorError::Connection(
                        "status stream ended before finalization".into(),
                    ))
                }
            }
        };
        subscription.unsubscribe();

        if let Ok(done) = &outcome {
            self.progress.send_modify(|p| {
                p.block = Some(done.block.clone());
                p.code = Some(done.code.clone());
            });
            self.transition(AnchorState::Finalized);
        }
        outcome
    }

    fn transition(&self, state: AnchorState) {
        info!("anchor attempt -> {:?}", state);
        self.progress.send_modify(|p| {
            p.state = state;
            p.transitions.push(Transition { state, at: Utc::now() });
        });
    }

    fn fail(&self, e: AnchorError) -> AnchorError {
        error!("anchor attempt failed: {}", e);
        self.progress.send_modify(|p| {
            p.error = Some(e.to_string());
            p.failure = Some(e.clone());
        });
        self.transition(AnchorState::Failed);
        e
    }
}

/// Hex account addresses match regardless of checksum casing; others exactly.
fn same_address(a: &str, b: &str) -> bool {
    if a.starts_with("0x") && b.starts_with("0x") {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}
