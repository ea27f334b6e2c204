//! ECDSA key management for safe owners
//!
//! Provides owner keypair generation, signing, and recovery using
//! the secp256k1 elliptic curve, with Ethereum-style addresses and
//! BIP-39 mnemonic backup phrases.

use bip39::Mnemonic;
use ethers_core::types::Address;
use ethers_core::utils::{keccak256, to_checksum};
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

/// Entropy bytes drawn per keypair (24-word mnemonic)
const ENTROPY_BYTES: usize = 32;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("secure entropy source unavailable")]
    EntropyUnavailable,
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid mnemonic phrase")]
    InvalidMnemonic,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// An owner keypair: secp256k1 secret key, public key, and the BIP-39
/// mnemonic it derives from.
///
/// The secret key is `keccak256(bip39_seed)` — a single-key derivation
/// without a BIP-32 path, so the mnemonic alone is sufficient backup.
#[derive(Clone)]
pub struct OwnerKeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    mnemonic: String,
}

impl OwnerKeyPair {
    /// Generate a new random owner keypair.
    ///
    /// Entropy comes from the OS secure random source only; if that source
    /// cannot be read the error is fatal. There is no weaker fallback for
    /// key material.
    pub fn generate() -> Result<Self, KeyError> {
        // from_slice rejects ~2^-128 of candidate keys; retry on those.
        for _ in 0..4 {
            let mut entropy = [0u8; ENTROPY_BYTES];
            OsRng
                .try_fill_bytes(&mut entropy)
                .map_err(|_| KeyError::EntropyUnavailable)?;

            let mnemonic =
                Mnemonic::from_entropy(&entropy).map_err(|_| KeyError::InvalidMnemonic)?;
            if let Ok(pair) = Self::from_mnemonic_value(mnemonic) {
                return Ok(pair);
            }
        }
        Err(KeyError::InvalidPrivateKey)
    }

    /// Rederive a keypair from its mnemonic phrase
    pub fn from_mnemonic(phrase: &str) -> Result<Self, KeyError> {
        let mnemonic = phrase
            .parse::<Mnemonic>()
            .map_err(|_| KeyError::InvalidMnemonic)?;
        Self::from_mnemonic_value(mnemonic)
    }

    fn from_mnemonic_value(mnemonic: Mnemonic) -> Result<Self, KeyError> {
        let seed = mnemonic.to_seed("");
        let secret_key = SecretKey::from_slice(&keccak256(seed))
            .map_err(|_| KeyError::InvalidPrivateKey)?;

        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        Ok(Self {
            secret_key,
            public_key,
            mnemonic: mnemonic.to_string(),
        })
    }

    /// Create a keypair from a hex-encoded private key (no mnemonic)
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key.trim_start_matches("0x"))
            .map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;

        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        Ok(Self {
            secret_key,
            public_key,
            mnemonic: String::new(),
        })
    }

    /// Get the private key as a 0x-prefixed hex string
    pub fn private_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.secret_key.secret_bytes()))
    }

    /// Get the mnemonic backup phrase (empty for keys imported from raw hex)
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Ethereum address of this keypair
    pub fn address(&self) -> Address {
        public_key_to_address(&self.public_key)
    }

    /// EIP-55 checksummed address string
    pub fn address_checksummed(&self) -> String {
        to_checksum(&self.address(), None)
    }

    /// Sign a 32-byte digest, returning the 65-byte r || s || v signature
    /// with v in {27, 28}.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; 65], KeyError> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(digest)?;
        let signature = secp.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&compact);
        out[64] = 27 + recovery_id.to_i32() as u8;
        Ok(out)
    }
}

impl std::fmt::Debug for OwnerKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never prints secret material
        f.debug_struct("OwnerKeyPair")
            .field("address", &self.address())
            .finish()
    }
}

/// Generate the two independent local owner keypairs (owner1, owner2).
///
/// Each invocation draws fresh entropy for both pairs.
pub fn generate_local_owners() -> Result<(OwnerKeyPair, OwnerKeyPair), KeyError> {
    let owner1 = OwnerKeyPair::generate()?;
    let owner2 = OwnerKeyPair::generate()?;
    Ok((owner1, owner2))
}

/// Convert a secp256k1 public key to an Ethereum address
///
/// Address = last 20 bytes of keccak256(uncompressed pubkey without prefix)
pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the signer address from a 65-byte r || s || v signature over a
/// 32-byte digest.
pub fn recover_signer(digest: &[u8; 32], signature: &[u8; 65]) -> Result<Address, KeyError> {
    let v = signature[64];
    if v != 27 && v != 28 {
        return Err(KeyError::InvalidSignature);
    }
    let recovery_id = RecoveryId::from_i32((v - 27) as i32)?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|_| KeyError::InvalidSignature)?;

    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(digest)?;
    let public_key = secp
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| KeyError::InvalidSignature)?;

    Ok(public_key_to_address(&public_key))
}
