//! EIP-1559 transaction signing
//!
//! Builds the raw wire form of a typed transaction from a local owner key.
//! The recovery id is used directly as the yParity value; typed
//! transactions do not use the legacy 27/28 offsets.

use crate::crypto::{KeyError, OwnerKeyPair};
use ethers_core::types::transaction::eip1559::Eip1559TransactionRequest;
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{Bytes, Signature, H256, U256};
use ethers_core::utils::keccak256;
use secp256k1::{Message, Secp256k1};

/// Sign an EIP-1559 transaction request, returning the raw RLP bytes and
/// the transaction hash.
pub fn sign_eip1559(
    tx: Eip1559TransactionRequest,
    signer: &OwnerKeyPair,
) -> Result<(Bytes, H256), KeyError> {
    let typed = TypedTransaction::Eip1559(tx);
    let sighash = typed.sighash();

    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(sighash.as_bytes())?;
    let signature = secp.sign_ecdsa_recoverable(&message, &signer.secret_key);
    let (recovery_id, compact) = signature.serialize_compact();

    let signature = Signature {
        r: U256::from_big_endian(&compact[..32]),
        s: U256::from_big_endian(&compact[32..]),
        v: recovery_id.to_i32() as u64,
    };

    let raw = typed.rlp_signed(&signature);
    let tx_hash = H256::from(keccak256(&raw));
    Ok((raw, tx_hash))
}
