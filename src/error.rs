// src/error.rs
//! Error taxonomy for anchoring and verification.
//!
//! Every failure is terminal for the operation that raised it. The `Display`
//! text of each variant is what gets recorded on a failed anchor attempt and
//! what the HTTP layer hands back to the caller.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    /// Anchor requested without a bound identity.
    #[error("Login required")]
    NotLoggedIn,

    /// The wallet resolved a signer for a different account than the identity.
    #[error("Wallet does not match logged-in DID: {0}")]
    IdentityMismatch(String),

    #[error("Wallet connection failed: {0}")]
    WalletConnection(String),

    /// The ledger rejected the submitted transaction.
    #[error("Transaction rejected: {0}")]
    Dispatch(String),

    #[error("Ledger connection failed: {0}")]
    Connection(String),

    /// The read query itself failed. Never used for a legitimate "not anchored".
    #[error("Verification query failed: {0}")]
    VerificationQuery(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("An anchor attempt is already in progress")]
    Busy,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<config::ConfigError> for AnchorError {
    fn from(e: config::ConfigError) -> Self {
        AnchorError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnchorError>;
