// src/utils/crypto.rs
//! Cryptographic utilities for content fingerprinting.
//!
//! Uses SHA-256 (via `ring`) so fingerprints match what a browser computes
//! with `crypto.subtle.digest("SHA-256", ...)` over the same bytes.

use ring::digest::{digest, SHA256};

/// Computes a SHA-256 digest of the input data.
///
/// # Arguments
/// * `data` - Binary data to hash (as bytes slice)
///
/// # Returns
/// Fixed-size 32-byte array (`[u8; 32]`) containing the digest.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest(&SHA256, data).as_ref());
    out
}

/// Computes the SHA-256 digest of `data` as 64 lowercase hex characters.
pub fn hash_hex(data: &[u8]) -> String {
    ethers::utils::hex::encode(hash_data(data))
}
