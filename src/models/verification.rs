// src/models/verification.rs
//! Verification request and result types.
//!
//! Both are ephemeral: a request is rebuilt from the URL on every page load
//! and a result is recomputed per query, never cached across fingerprints.

use crate::models::did::Identity;
use serde::{Deserialize, Serialize};

/// Parameters extracted from a verification URL.
///
/// Absent parameters are empty strings, never errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// `did` query parameter (identity claimed by the code)
    pub did: String,
    /// `hash` query parameter (expected content fingerprint)
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    /// No fingerprint to check; no ledger query was made.
    Idle,
    Match,
    NoMatch,
}

/// Outcome of reconciling a request against ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    /// Owner recorded on the ledger, present only on `Match`.
    pub owner: Option<Identity>,
}

impl VerificationResult {
    pub fn idle() -> Self {
        Self { status: VerificationStatus::Idle, owner: None }
    }

    pub fn from_owner(owner: Option<Identity>) -> Self {
        match owner {
            Some(owner) => Self { status: VerificationStatus::Match, owner: Some(owner) },
            None => Self { status: VerificationStatus::NoMatch, owner: None },
        }
    }
}

/// What the verification page shows: the result plus the request it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub request: VerificationRequest,
    #[serde(flatten)]
    pub result: VerificationResult,
    /// The viewer's bound identity differs from the code's `did`.
    /// Informational only; never changes `result`.
    pub viewer_mismatch: bool,
}
