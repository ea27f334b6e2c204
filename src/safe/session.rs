//! Safe session state
//!
//! All orchestration state for one account lives in an explicit
//! `SafeSession` value that is passed into each orchestrator call and
//! updated in place — there is no global mutable session.

use crate::custody::{KeyProvenance, ResolvedOwner};
use crate::safe::predictor;
use ethers_core::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed signing threshold for the 3-owner policy
pub const THRESHOLD: u8 = 2;

/// Errors building an owner set
#[derive(Error, Debug)]
pub enum OwnerSetError {
    #[error("Duplicate owner address: {0:#x}")]
    DuplicateOwner(Address),
}

/// The ordered 3-owner set: two local owners plus the custody server's
/// remote owner. The remote owner is never paired with a local secret key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSet {
    local1: Address,
    local2: Address,
    remote: Address,
}

impl OwnerSet {
    /// Build an owner set, rejecting duplicate addresses
    pub fn new(local1: Address, local2: Address, remote: Address) -> Result<Self, OwnerSetError> {
        if local1 == local2 {
            return Err(OwnerSetError::DuplicateOwner(local1));
        }
        if remote == local1 || remote == local2 {
            return Err(OwnerSetError::DuplicateOwner(remote));
        }
        Ok(Self {
            local1,
            local2,
            remote,
        })
    }

    /// Owners in their canonical order (local1, local2, remote)
    pub fn as_array(&self) -> [Address; 3] {
        [self.local1, self.local2, self.remote]
    }

    /// The two locally-held owner addresses
    pub fn local_owners(&self) -> [Address; 2] {
        [self.local1, self.local2]
    }

    /// The server-held owner address
    pub fn remote_owner(&self) -> Address {
        self.remote
    }

    /// Whether an address is one of the three owners
    pub fn contains(&self, address: Address) -> bool {
        address == self.local1 || address == self.local2 || address == self.remote
    }
}

/// Lifecycle status of the account
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Address predicted, nothing broadcast yet
    Predicted,
    /// Deployment transaction broadcast, confirmation not yet observed
    Broadcast,
    /// Contract code confirmed at the predicted address
    Deployed,
}

/// Immutable record of the broadcast deployment transaction
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub tx_hash: H256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// One logical session per account: owner set, threshold, chain id, the
/// predicted address derived from them, and deployment progress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafeSession {
    pub chain_id: u64,
    pub owners: OwnerSet,
    pub threshold: u8,
    pub predicted_address: Address,
    pub status: AccountStatus,
    pub deployment: Option<DeploymentRecord>,
    /// Where the remote owner address came from; `Fallback` means the
    /// documented fallback address is in use and the custody server does
    /// not hold the key.
    pub server_key_provenance: KeyProvenance,
}

impl SafeSession {
    /// Start a session by predicting the account address from the owner
    /// set and chain id. Pure; performs no I/O.
    pub fn predict(owners: OwnerSet, server_owner: &ResolvedOwner, chain_id: u64) -> Self {
        let predicted_address = predictor::predict_address(&owners, THRESHOLD, chain_id);
        Self {
            chain_id,
            owners,
            threshold: THRESHOLD,
            predicted_address,
            status: AccountStatus::Predicted,
            deployment: None,
            server_key_provenance: server_owner.provenance,
        }
    }

    /// True once contract code at the predicted address is confirmed
    pub fn is_deployed(&self) -> bool {
        self.status == AccountStatus::Deployed
    }

    /// True when the remote owner came from the live custody server.
    /// A degraded session (fallback owner) can deploy and fund, but the
    /// server can never co-sign for it.
    pub fn server_key_live(&self) -> bool {
        self.server_key_provenance == KeyProvenance::Live
    }
}
