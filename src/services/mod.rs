// src/services/mod.rs
//! Anchoring workflow, verification and the HTTP surface.

pub mod anchor_orchestrator;
pub mod api_server;
pub mod content_hasher;
pub mod identity_binding;
pub mod verification_code;
pub mod verification_query;
