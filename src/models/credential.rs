// src/models/credential.rs
//! Credential file and content fingerprint data model.
//!
//! A credential file lives only for the duration of a session and is never
//! persisted; only its fingerprint leaves the process.

use crate::error::{AnchorError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque credential bytes plus the display name chosen by the owner.
///
/// # Fields
/// - `name`: File name shown to the owner
/// - `bytes`: Complete file content
#[derive(Debug, Clone)]
pub struct CredentialFile {
    /// Display name (e.g. "diploma.pdf")
    pub name: String,

    /// Full file content. Hashing always covers all of it.
    pub bytes: Bytes,
}

impl CredentialFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// A 256-bit content digest rendered as 64 lowercase hex characters.
///
/// # Invariants
/// - Always exactly 64 characters from `[0-9a-f]`
/// - Identical bytes always produce an identical fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Parses a hex fingerprint, accepting upper or lower case and an optional `0x` prefix.
    ///
    /// # Errors
    /// Returns `AnchorError::InvalidFingerprint` if the input is not 32 bytes of hex.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let trimmed = hex.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AnchorError::InvalidFingerprint(format!(
                "expected 64 hex characters, got {:?}",
                hex
            )));
        }
        Ok(Self(digits.to_ascii_lowercase()))
    }

    /// Wraps a raw 32-byte digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(ethers::utils::hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw digest bytes, as passed to the ledger contract's `bytes32` argument.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            // from_hex/from_digest guarantee 64 hex digits
            *byte = u8::from_str_radix(&self.0[i * 2..i * 2 + 2], 16).unwrap_or_default();
        }
        out
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentFingerprint {
    type Error = AnchorError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<ContentFingerprint> for String {
    fn from(value: ContentFingerprint) -> Self {
        value.0
    }
}
