//! Cryptographic utilities for owner key management
//!
//! This module provides:
//! - secp256k1 owner keypair generation with BIP-39 mnemonics
//! - Ethereum address derivation (keccak256 of the public key)
//! - Recoverable ECDSA signing over 32-byte digests

pub mod keys;

pub use keys::{
    generate_local_owners, public_key_to_address, recover_signer, KeyError, OwnerKeyPair,
};
