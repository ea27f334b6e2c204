//! Deterministic account address prediction
//!
//! Models the Safe v1.3.0 `SafeProxyFactory.createProxyWithNonce` CREATE2
//! convention:
//!
//! ```text
//! initializer = setup(owners, threshold, 0, "", fallback_handler, 0, 0, 0)
//! salt        = keccak256(keccak256(initializer) || uint256(salt_nonce))
//! init_code   = proxy_creation_code || abi.encode(singleton)
//! address     = keccak256(0xff || factory || salt || keccak256(init_code))[12..]
//! ```
//!
//! The convention is owner-order sensitive: the initializer encodes the
//! owner array in the order given, and the salt commits to the initializer
//! hash. `salt_nonce` is the chain id, so the same owner set maps to a
//! different address on every chain. These choices are pinned by tests and
//! must not change once accounts have been funded against a prediction.

use crate::safe::session::OwnerSet;
use ethers_core::abi::{encode, Token};
use ethers_core::types::{Address, Bytes, U256};
use ethers_core::utils::{get_create2_address_from_hash, id, keccak256};

/// Safe v1.3.0 canonical proxy factory
pub const PROXY_FACTORY: &str = "0xa6B71E26C5e0845f74c812102Ca7114b6a896AB2";

/// Safe v1.3.0 canonical L2 singleton
pub const SINGLETON: &str = "0x3E5c63644E683549055b9Be8653de26E0B4CD36E";

/// Safe v1.3.0 canonical compatibility fallback handler
pub const FALLBACK_HANDLER: &str = "0xf48f2B2d2a534e402487b3ee7C18c33Aec0Fe5e4";

/// Safe v1.3.0 proxy creation code (deployed bytecode preimage)
const PROXY_CREATION_CODE: &str = "608060405234801561001057600080fd5b506040516101e63803806101e68339818101604052602081101561003357600080fd5b8101908080519060200190929190505050600073ffffffffffffffffffffffffffffffffffffffff168173ffffffffffffffffffffffffffffffffffffffff16141561010a576040517f08c379a00000000000000000000000000000000000000000000000000000000081526004018080602001828103825260228152602001806101c46022913960400191505060405180910390fd5b806000806101000a81548173ffffffffffffffffffffffffffffffffffffffff021916908373ffffffffffffffffffffffffffffffffffffffff16021790555050603e806101866000396000f3fe608060405273ffffffffffffffffffffffffffffffffffffffff600054167fa619486e0000000000000000000000000000000000000000000000000000000060003514156050578060005260206000f35b3660008037600080366000845af43d6000803e60008114156070573d6000fd5b3d6000f3fea2646970667358221220d1429297349653a4918076d650332de1a1068c5f3e07c5c82360c277770b955264736f6c63430007060033496e76616c69642073696e676c65746f6e20616464726573732070726f7669646564";

fn parse_const_address(hex_address: &str) -> Address {
    hex_address
        .parse()
        .unwrap_or_else(|_| panic!("invalid built-in address constant {hex_address}"))
}

/// ABI-encoded `setup(...)` call that initializes a freshly deployed proxy
/// with the owner set and threshold.
pub fn setup_initializer(owners: &OwnerSet, threshold: u8) -> Bytes {
    let selector = id("setup(address[],uint256,address,bytes,address,address,uint256,address)");

    let owner_tokens = owners
        .as_array()
        .iter()
        .map(|owner| Token::Address(*owner))
        .collect();

    let args = encode(&[
        Token::Array(owner_tokens),
        Token::Uint(U256::from(threshold)),
        Token::Address(Address::zero()),
        Token::Bytes(Vec::new()),
        Token::Address(parse_const_address(FALLBACK_HANDLER)),
        Token::Address(Address::zero()),
        Token::Uint(U256::zero()),
        Token::Address(Address::zero()),
    ]);

    let mut calldata = selector.to_vec();
    calldata.extend_from_slice(&args);
    Bytes::from(calldata)
}

/// Calldata for `createProxyWithNonce(singleton, initializer, salt_nonce)`,
/// the one-time deployment transaction sent to the proxy factory.
pub fn deployment_calldata(owners: &OwnerSet, threshold: u8, chain_id: u64) -> Bytes {
    let selector = id("createProxyWithNonce(address,bytes,uint256)");
    let initializer = setup_initializer(owners, threshold);

    let args = encode(&[
        Token::Address(parse_const_address(SINGLETON)),
        Token::Bytes(initializer.to_vec()),
        Token::Uint(U256::from(chain_id)),
    ]);

    let mut calldata = selector.to_vec();
    calldata.extend_from_slice(&args);
    Bytes::from(calldata)
}

/// The factory address deployment transactions are sent to
pub fn factory_address() -> Address {
    parse_const_address(PROXY_FACTORY)
}

/// Predict the account address for an owner set, threshold, and chain id.
///
/// Pure and deterministic: the same inputs produce the same address across
/// processes and time, before and after deployment.
pub fn predict_address(owners: &OwnerSet, threshold: u8, chain_id: u64) -> Address {
    let initializer = setup_initializer(owners, threshold);

    let mut salt_preimage = [0u8; 64];
    salt_preimage[..32].copy_from_slice(&keccak256(&initializer));
    U256::from(chain_id).to_big_endian(&mut salt_preimage[32..]);
    let salt = keccak256(salt_preimage);

    let mut init_code =
        hex::decode(PROXY_CREATION_CODE).expect("invalid built-in proxy creation code");
    init_code.extend_from_slice(&encode(&[Token::Address(parse_const_address(SINGLETON))]));

    get_create2_address_from_hash(factory_address(), salt, keccak256(&init_code))
}
