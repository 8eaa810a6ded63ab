// src/models/did.rs
//! Session identity derived from a wallet account.
//!
//! The identifier follows DID syntax but is not resolvable: the method is a
//! fixed placeholder and the method-specific id is the wallet address itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default placeholder method used in `did:<method>:<address>`.
pub const DEFAULT_DID_METHOD: &str = "w3bstitch";

/// A pseudo-DID bound to the wallet account that controls signing.
///
/// # DID Format
/// ```text
/// did:<method>:<address>
/// ```
/// Everything after the second `:` is the address, so addresses that contain
/// `:` themselves survive parsing intact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Derives the identity for a wallet address under `method`.
    pub fn from_address(method: &str, address: &str) -> Self {
        Identity(format!("did:{}:{}", method, address))
    }

    /// Parses a `did:<method>:<address>` string.
    ///
    /// # Returns
    /// `None` unless the scheme is `did` and both method and address are non-empty.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(address)) if !method.is_empty() && !address.is_empty() => {
                Some(Identity(value.to_string()))
            }
            _ => None,
        }
    }

    pub fn method(&self) -> &str {
        self.0.splitn(3, ':').nth(1).unwrap_or_default()
    }

    /// The wallet account address this identity signs with.
    pub fn address(&self) -> &str {
        self.0.splitn(3, ':').nth(2).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_address() {
        let id = Identity::from_address(DEFAULT_DID_METHOD, "5F3sa2TJAWMqDhXG6jhV4N8ko9SxwGy8TpaNS1repo5EYjQX");
        assert_eq!(id.as_str(), "did:w3bstitch:5F3sa2TJAWMqDhXG6jhV4N8ko9SxwGy8TpaNS1repo5EYjQX");
        assert_eq!(id.method(), "w3bstitch");
        assert_eq!(id.address(), "5F3sa2TJAWMqDhXG6jhV4N8ko9SxwGy8TpaNS1repo5EYjQX");
    }

    #[test]
    fn test_parse_keeps_colons_in_address() {
        let id = Identity::parse("did:w3bstitch:eip155:1:0xabc").unwrap();
        assert_eq!(id.address(), "eip155:1:0xabc");
    }

    #[test]
    fn test_parse_rejects_non_did() {
        assert!(Identity::parse("").is_none());
        assert!(Identity::parse("did:w3bstitch").is_none());
        assert!(Identity::parse("did::0xabc").is_none());
        assert!(Identity::parse("urn:w3bstitch:0xabc").is_none());
    }
}
