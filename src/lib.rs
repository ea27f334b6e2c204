//! Safekit: lifecycle orchestration for a 2-of-3 threshold Safe account
//!
//! This crate provides:
//! - Local owner keypair generation (secp256k1 + BIP-39 mnemonics)
//! - Custody-server owner resolution with a documented fallback
//! - Deterministic CREATE2 account address prediction
//! - Deployment orchestration with explicit fees and partial-failure
//!   signaling (insufficient funds, pending, failed, duplicate)
//! - Background auto-funding decoupled from the deployment result
//! - The 2-of-3 spend approval protocol (compose, collect signatures,
//!   execute)
//!
//! # Example
//!
//! ```ignore
//! use safekit::chain::HttpChainClient;
//! use safekit::crypto::generate_local_owners;
//! use safekit::custody::ServerKeyResolver;
//! use safekit::safe::{DeploymentOrchestrator, OwnerSet, SafeSession};
//! use std::sync::Arc;
//!
//! let (owner1, owner2) = generate_local_owners()?;
//! let server = ServerKeyResolver::new("http://localhost:3000")
//!     .resolve_server_owner()
//!     .await;
//!
//! let owners = OwnerSet::new(owner1.address(), owner2.address(), server.address)?;
//! let mut session = SafeSession::predict(owners, &server, 11155111);
//!
//! let chain = Arc::new(HttpChainClient::new("https://rpc.example", 11155111)?);
//! DeploymentOrchestrator::new(chain).deploy(&mut session, &owner1).await?;
//! ```

pub mod chain;
pub mod cli;
pub mod crypto;
pub mod custody;
pub mod safe;
pub mod storage;

// Re-export commonly used types
pub use chain::{ChainError, ChainRpc, HttpChainClient};
pub use crypto::{KeyError, OwnerKeyPair};
pub use custody::{KeyProvenance, ResolvedOwner, ServerKeyResolver};
pub use safe::{
    AccountStatus, DeployError, DeploymentOrchestrator, FundingCoordinator, FundingOutcome,
    FundingPlan, OwnerSet, SafeSession, SpendState, SpendTransaction, TransactionComposer,
    THRESHOLD,
};
pub use storage::{ConfigStore, SecretExporter};
