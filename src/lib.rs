// src/lib.rs
//! # Credential Anchor
//!
//! Anchors credential fingerprints on a ledger under the owner's identity
//! and verifies scanned verification codes against ledger state.
//!
//! ## Architecture Overview
//! 1. **Blockchain Layer**: ledger capability with ethereum and in-memory backends
//! 2. **Contracts Layer**: anchor contract ABI binding
//! 3. **Services Layer**: hashing, identity binding, anchoring, verification, API
//! 4. **Wallet Layer**: wallet-extension capability and session storage

// Module declarations (organized by functional domain)
pub mod blockchain; // Ledger clients
pub mod config; // Layered service configuration
pub mod contracts; // Contract ABI bindings
pub mod error; // Crate-wide error taxonomy
pub mod models; // Data structures
pub mod services; // Business logic and API
pub mod utils; // Helper functions
pub mod wallet; // Wallet capability and signing
