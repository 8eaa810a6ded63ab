// src/contracts/anchor_registry.rs
//! Anchor Registry smart contract interface.
//!
//! Binds the two entry points of the deployed anchor contract:
//! - `anchor(bytes32)`: records the fingerprint under the transaction sender
//! - `verify(bytes32) -> address`: returns the recorded owner, zero if none

use crate::error::{AnchorError, Result};
use crate::models::credential::ContentFingerprint;
use ethers_contract::BaseContract;
use ethers_core::abi::Abi;
use ethers_core::types::{Address, Bytes};
use std::str::FromStr;

/// Anchor Registry contract binding.
///
/// Encodes calldata and decodes return values; transport is left to the
/// ledger client that owns this binding.
#[derive(Debug, Clone)]
pub struct AnchorRegistry {
    /// Parsed contract ABI
    contract: BaseContract,
    /// Address of the deployed contract
    address: Address,
}

impl AnchorRegistry {
    /// Creates a binding for the contract deployed at `contract_address`.
    ///
    /// # Errors
    /// Returns `AnchorError::Config` if the address is malformed or the ABI
    /// cannot be loaded.
    pub fn new(contract_address: &str) -> Result<Self> {
        let address = Address::from_str(contract_address.trim()).map_err(|e| {
            AnchorError::Config(format!("invalid contract address {:?}: {}", contract_address, e))
        })?;
        let abi = Abi::load(&include_bytes!("abi/AnchorRegistry.json")[..])
            .map_err(|e| AnchorError::Config(format!("failed to load contract ABI: {}", e)))?;
        Ok(Self {
            contract: BaseContract::from(abi),
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Calldata for `anchor(fingerprint)`.
    pub fn encode_anchor(&self, fingerprint: &ContentFingerprint) -> Result<Bytes> {
        self.contract
            .encode("anchor", (fingerprint.to_bytes(),))
            .map_err(|e| AnchorError::Unknown(format!("failed to encode anchor call: {}", e)))
    }

    /// Calldata for `verify(fingerprint)`.
    pub fn encode_verify(&self, fingerprint: &ContentFingerprint) -> Result<Bytes> {
        self.contract
            .encode("verify", (fingerprint.to_bytes(),))
            .map_err(|e| AnchorError::VerificationQuery(format!("failed to encode verify call: {}", e)))
    }

    /// Decodes the `verify` return value.
    ///
    /// # Returns
    /// `None` for the zero address (fingerprint never anchored).
    pub fn decode_verify(&self, output: Bytes) -> Result<Option<Address>> {
        let owner: Address = self
            .contract
            .decode_output("verify", output)
            .map_err(|e| AnchorError::VerificationQuery(format!("malformed verify output: {}", e)))?;
        Ok(if owner.is_zero() { None } else { Some(owner) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";

    fn fingerprint() -> ContentFingerprint {
        ContentFingerprint::from_hex("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad").unwrap()
    }

    #[test]
    fn test_anchor_calldata_layout() {
        let registry = AnchorRegistry::new(CONTRACT).unwrap();
        let data = registry.encode_anchor(&fingerprint()).unwrap();
        // 4-byte selector followed by one 32-byte word
        assert_eq!(data.len(), 36);
        assert_eq!(&data[4..], &fingerprint().to_bytes()[..]);
    }

    #[test]
    fn test_decode_zero_owner_is_none() {
        let registry = AnchorRegistry::new(CONTRACT).unwrap();
        assert_eq!(registry.decode_verify(Bytes::from(vec![0u8; 32])).unwrap(), None);
    }

    #[test]
    fn test_decode_owner() {
        let registry = AnchorRegistry::new(CONTRACT).unwrap();
        let mut word = vec![0u8; 12];
        word.extend_from_slice(&[0x11; 20]);
        let owner = registry.decode_verify(Bytes::from(word)).unwrap().unwrap();
        assert_eq!(owner, Address::from([0x11; 20]));
    }

    #[test]
    fn test_rejects_bad_address() {
        assert!(matches!(AnchorRegistry::new("YOUR_CONTRACT_ADDRESS_HERE"), Err(AnchorError::Config(_))));
    }
}
