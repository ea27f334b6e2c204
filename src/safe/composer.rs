//! Spend transaction composition and threshold signing
//!
//! Drives the 2-of-3 approval protocol for transactions from the deployed
//! account. Each spend moves through an explicit state machine:
//!
//! ```text
//! Draft -> PartiallySigned -> ThresholdMet -> Submitted -> Confirmed | Failed
//! ```
//!
//! Signatures are bound to a digest over the full payload (account, chain
//! id, recipient, value, calldata hash, nonce) so a signature can never be
//! replayed against a different payload or account. Adding a signature is
//! commutative and idempotent per owner: the two local owners may sign
//! from independent processes in either order, and re-signing is a no-op.

use crate::chain::{sign_eip1559, wait_for_receipt, ChainError, ChainRpc};
use crate::crypto::{recover_signer, KeyError, OwnerKeyPair};
use crate::safe::session::{OwnerSet, SafeSession};
use chrono::{DateTime, Utc};
use ethers_core::abi::{encode, Token};
use ethers_core::types::transaction::eip1559::Eip1559TransactionRequest;
use ethers_core::types::{Address, Bytes, H256, U256};
use ethers_core::utils::{id, keccak256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Domain tag mixed into every spend digest
const SPEND_DOMAIN: &[u8] = b"safekit.spend.v1";

/// Gas ceiling for execution transactions
const EXEC_GAS_LIMIT: u64 = 300_000;

/// Fallback priority fee (1.5 gwei)
const DEFAULT_PRIORITY_FEE: u64 = 1_500_000_000;

/// Errors from spend composition and execution
#[derive(Error, Debug)]
pub enum ComposerError {
    #[error("Signer {0:#x} is not an owner of this account")]
    UnauthorizedSigner(Address),
    #[error("Insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: u8 },
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Transaction already submitted or finished ({state:?})")]
    AlreadySubmitted { state: SpendState },
    #[error("Transaction is not awaiting confirmation ({state:?})")]
    NotSubmitted { state: SpendState },
    #[error("Execution transaction {tx_hash:#x} reverted")]
    ExecutionFailed { tx_hash: H256 },
    #[error("Execution transaction {tx_hash:#x} not yet confirmed")]
    ConfirmationTimeout { tx_hash: H256 },
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// Lifecycle of a spend transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpendState {
    Draft,
    PartiallySigned,
    ThresholdMet,
    Submitted,
    Confirmed,
    Failed,
}

/// A collected owner signature
#[derive(Clone, Debug)]
pub struct SpendSignature {
    pub owner: Address,
    pub signature: [u8; 65],
    pub signed_at: DateTime<Utc>,
}

/// A spend transaction collecting owner approvals
#[derive(Clone, Debug)]
pub struct SpendTransaction {
    pub account: Address,
    pub chain_id: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub safe_nonce: u64,
    pub required_signatures: u8,
    /// Keyed and ordered by owner address; BTreeMap ordering doubles as
    /// the ascending-owner signature ordering execution requires.
    pub signatures: BTreeMap<Address, SpendSignature>,
    pub state: SpendState,
    /// Execution transaction hash, recorded at broadcast so a spend that
    /// times out in `Submitted` can be re-polled to a terminal state.
    pub submitted_tx_hash: Option<H256>,
}

impl SpendTransaction {
    /// The 32-byte digest owners sign.
    ///
    /// Commits to the account, chain id, recipient, value, calldata hash,
    /// and nonce, under a fixed domain tag.
    pub fn digest(&self) -> [u8; 32] {
        let encoded = encode(&[
            Token::FixedBytes(keccak256(SPEND_DOMAIN).to_vec()),
            Token::Address(self.account),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.to),
            Token::Uint(self.value),
            Token::FixedBytes(keccak256(&self.data).to_vec()),
            Token::Uint(U256::from(self.safe_nonce)),
        ]);
        keccak256(encoded)
    }

    /// Number of distinct owner signatures collected
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }

    /// Owners that have signed so far
    pub fn signed_by(&self) -> Vec<Address> {
        self.signatures.keys().copied().collect()
    }
}

/// Composes, collects signatures for, and executes spend transactions
pub struct TransactionComposer {
    chain: Arc<dyn ChainRpc>,
    account: Address,
    chain_id: u64,
    owners: OwnerSet,
    threshold: u8,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl TransactionComposer {
    /// Build a composer for a session's account
    pub fn new(chain: Arc<dyn ChainRpc>, session: &SafeSession) -> Self {
        Self {
            chain,
            account: session.predicted_address,
            chain_id: session.chain_id,
            owners: session.owners,
            threshold: session.threshold,
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(3),
        }
    }

    pub fn with_timeouts(mut self, confirmation_timeout: Duration, poll_interval: Duration) -> Self {
        self.confirmation_timeout = confirmation_timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Create a spend transaction in `Draft` state
    pub fn compose(&self, to: Address, value: U256, data: Bytes, safe_nonce: u64) -> SpendTransaction {
        SpendTransaction {
            account: self.account,
            chain_id: self.chain_id,
            to,
            value,
            data,
            safe_nonce,
            required_signatures: self.threshold,
            signatures: BTreeMap::new(),
            state: SpendState::Draft,
            submitted_tx_hash: None,
        }
    }

    /// Sign with a local owner key and record the signature
    pub fn sign(
        &self,
        tx: &mut SpendTransaction,
        signer: &OwnerKeyPair,
    ) -> Result<(), ComposerError> {
        let signature = signer.sign_digest(&tx.digest())?;
        self.add_signature(tx, &signature)
    }

    /// Record an externally produced 65-byte signature.
    ///
    /// The signer is recovered from the signature itself and checked
    /// against the owner set. A repeat signature from an owner that has
    /// already signed is a no-op; a signature from a non-owner fails with
    /// `UnauthorizedSigner`.
    pub fn add_signature(
        &self,
        tx: &mut SpendTransaction,
        signature: &[u8; 65],
    ) -> Result<(), ComposerError> {
        if !matches!(
            tx.state,
            SpendState::Draft | SpendState::PartiallySigned | SpendState::ThresholdMet
        ) {
            return Err(ComposerError::AlreadySubmitted { state: tx.state });
        }

        let owner = recover_signer(&tx.digest(), signature)
            .map_err(|_| ComposerError::InvalidSignature)?;
        if !self.owners.contains(owner) {
            return Err(ComposerError::UnauthorizedSigner(owner));
        }

        // Idempotent per owner: signature collection is commutative across
        // independent signers, and a re-sign never double-counts.
        if !tx.signatures.contains_key(&owner) {
            tx.signatures.insert(
                owner,
                SpendSignature {
                    owner,
                    signature: *signature,
                    signed_at: Utc::now(),
                },
            );
        }

        if tx.state != SpendState::ThresholdMet {
            tx.state = if tx.signature_count() >= tx.required_signatures as usize {
                SpendState::ThresholdMet
            } else {
                SpendState::PartiallySigned
            };
        }
        Ok(())
    }

    /// Execute a spend that has met its threshold.
    ///
    /// Bundles the collected signatures (ascending owner order) into an
    /// `execTransaction` call, broadcasts it from the executor key, and
    /// resolves the receipt. Calling this before `ThresholdMet` fails with
    /// `InsufficientSignatures` and broadcasts nothing.
    pub async fn execute(
        &self,
        tx: &mut SpendTransaction,
        executor: &OwnerKeyPair,
    ) -> Result<H256, ComposerError> {
        match tx.state {
            SpendState::ThresholdMet => {}
            SpendState::Draft | SpendState::PartiallySigned => {
                return Err(ComposerError::InsufficientSignatures {
                    have: tx.signature_count(),
                    need: tx.required_signatures,
                });
            }
            state => return Err(ComposerError::AlreadySubmitted { state }),
        }

        let calldata = self.exec_calldata(tx);
        let executor_address = executor.address();

        let gas_price = self.chain.gas_price().await?;
        let priority_fee = self
            .chain
            .max_priority_fee()
            .await
            .unwrap_or_else(|_| U256::from(DEFAULT_PRIORITY_FEE));
        let max_fee = gas_price * 2 + priority_fee;
        let nonce = self.chain.transaction_count(executor_address).await?;

        let request = Eip1559TransactionRequest::new()
            .to(self.account)
            .data(calldata)
            .nonce(nonce)
            .gas(U256::from(EXEC_GAS_LIMIT))
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(priority_fee)
            .chain_id(self.chain_id);

        let (raw, _) = sign_eip1559(request, executor)?;
        let tx_hash = self.chain.send_raw_transaction(raw).await?;
        tx.state = SpendState::Submitted;
        tx.submitted_tx_hash = Some(tx_hash);
        log::info!(
            "spend submitted: tx {:#x} from account {:#x} to {:#x}",
            tx_hash,
            self.account,
            tx.to
        );

        self.resolve_receipt(tx, tx_hash).await
    }

    /// Re-poll a spend that previously timed out with
    /// `ConfirmationTimeout`, driving `Submitted` to `Confirmed` or
    /// `Failed` once the execution transaction lands. Never re-broadcasts.
    pub async fn poll_execution(&self, tx: &mut SpendTransaction) -> Result<H256, ComposerError> {
        match (tx.state, tx.submitted_tx_hash) {
            (SpendState::Submitted, Some(tx_hash)) => self.resolve_receipt(tx, tx_hash).await,
            (state, _) => Err(ComposerError::NotSubmitted { state }),
        }
    }

    async fn resolve_receipt(
        &self,
        tx: &mut SpendTransaction,
        tx_hash: H256,
    ) -> Result<H256, ComposerError> {
        let receipt = wait_for_receipt(
            self.chain.as_ref(),
            tx_hash,
            self.confirmation_timeout,
            self.poll_interval,
        )
        .await?;

        match receipt {
            Some(receipt) if receipt.status == Some(1.into()) => {
                tx.state = SpendState::Confirmed;
                Ok(tx_hash)
            }
            Some(_) => {
                tx.state = SpendState::Failed;
                Err(ComposerError::ExecutionFailed { tx_hash })
            }
            // May still land later; the caller can re-poll.
            None => Err(ComposerError::ConfirmationTimeout { tx_hash }),
        }
    }

    /// `execTransaction` calldata with exactly `threshold` signatures,
    /// concatenated in ascending owner-address order.
    fn exec_calldata(&self, tx: &SpendTransaction) -> Bytes {
        let selector = id(
            "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)",
        );

        let mut bundled = Vec::with_capacity(65 * tx.required_signatures as usize);
        for signature in tx.signatures.values().take(tx.required_signatures as usize) {
            bundled.extend_from_slice(&signature.signature);
        }

        let args = encode(&[
            Token::Address(tx.to),
            Token::Uint(tx.value),
            Token::Bytes(tx.data.to_vec()),
            Token::Uint(U256::zero()), // operation: CALL
            Token::Uint(U256::zero()), // safeTxGas
            Token::Uint(U256::zero()), // baseGas
            Token::Uint(U256::zero()), // gasPrice
            Token::Address(Address::zero()),
            Token::Address(Address::zero()),
            Token::Bytes(bundled),
        ]);

        let mut calldata = selector.to_vec();
        calldata.extend_from_slice(&args);
        Bytes::from(calldata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use crate::custody::{KeyProvenance, ResolvedOwner};
    use crate::safe::session::AccountStatus;

    struct Fixture {
        chain: Arc<MockChain>,
        composer: TransactionComposer,
        owner1: OwnerKeyPair,
        owner2: OwnerKeyPair,
        remote: OwnerKeyPair,
    }

    fn fixture() -> Fixture {
        fixture_on(Arc::new(MockChain::new()))
    }

    fn fixture_on(chain: Arc<MockChain>) -> Fixture {
        let owner1 = OwnerKeyPair::generate().unwrap();
        let owner2 = OwnerKeyPair::generate().unwrap();
        // Stand-in for the server-held key: tests may sign with it, the
        // production flow never can.
        let remote = OwnerKeyPair::generate().unwrap();
        let resolved = ResolvedOwner {
            address: remote.address(),
            provenance: KeyProvenance::Live,
        };
        let owners = OwnerSet::new(owner1.address(), owner2.address(), remote.address()).unwrap();
        let mut session = SafeSession::predict(owners, &resolved, 11155111);
        session.status = AccountStatus::Deployed;

        let composer = TransactionComposer::new(chain.clone(), &session)
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(10));
        Fixture {
            chain,
            composer,
            owner1,
            owner2,
            remote,
        }
    }

    fn draft(f: &Fixture) -> SpendTransaction {
        f.composer.compose(
            Address::from([0xEE; 20]),
            U256::from(1_000u64),
            Bytes::default(),
            0,
        )
    }

    #[test]
    fn test_signature_collection_reaches_threshold() {
        let f = fixture();
        let mut tx = draft(&f);
        assert_eq!(tx.state, SpendState::Draft);

        f.composer.sign(&mut tx, &f.owner1).unwrap();
        assert_eq!(tx.state, SpendState::PartiallySigned);
        assert_eq!(tx.signature_count(), 1);

        f.composer.sign(&mut tx, &f.owner2).unwrap();
        assert_eq!(tx.state, SpendState::ThresholdMet);
        assert_eq!(tx.signature_count(), 2);
    }

    #[test]
    fn test_duplicate_signature_is_noop() {
        let f = fixture();
        let mut tx = draft(&f);

        f.composer.sign(&mut tx, &f.owner1).unwrap();
        f.composer.sign(&mut tx, &f.owner1).unwrap();

        assert_eq!(tx.signature_count(), 1);
        assert_eq!(tx.state, SpendState::PartiallySigned);
    }

    #[test]
    fn test_third_signature_does_not_change_state() {
        let f = fixture();
        let mut tx = draft(&f);

        f.composer.sign(&mut tx, &f.owner1).unwrap();
        f.composer.sign(&mut tx, &f.owner2).unwrap();
        f.composer.sign(&mut tx, &f.remote).unwrap();

        assert_eq!(tx.state, SpendState::ThresholdMet);
        assert_eq!(tx.signature_count(), 3);
    }

    #[test]
    fn test_unauthorized_signer_rejected() {
        let f = fixture();
        let mut tx = draft(&f);
        let outsider = OwnerKeyPair::generate().unwrap();

        let result = f.composer.sign(&mut tx, &outsider);
        assert!(matches!(result, Err(ComposerError::UnauthorizedSigner(_))));
        assert_eq!(tx.signature_count(), 0);
        assert_eq!(tx.state, SpendState::Draft);
    }

    #[test]
    fn test_signature_bound_to_payload() {
        let f = fixture();
        let mut tx = draft(&f);
        f.composer.sign(&mut tx, &f.owner1).unwrap();
        let signature = tx.signatures.values().next().unwrap().signature;

        // Same signature against a different payload recovers a different
        // (non-owner) address and is rejected.
        let mut other = f.composer.compose(
            Address::from([0xDD; 20]),
            U256::from(9_999u64),
            Bytes::default(),
            1,
        );
        let result = f.composer.add_signature(&mut other, &signature);
        assert!(result.is_err());
        assert_eq!(other.signature_count(), 0);
    }

    #[test]
    fn test_signing_order_is_commutative() {
        let f = fixture();
        let mut forward = draft(&f);
        f.composer.sign(&mut forward, &f.owner1).unwrap();
        f.composer.sign(&mut forward, &f.owner2).unwrap();

        let mut reverse = draft(&f);
        f.composer.sign(&mut reverse, &f.owner2).unwrap();
        f.composer.sign(&mut reverse, &f.owner1).unwrap();

        assert_eq!(forward.state, SpendState::ThresholdMet);
        assert_eq!(reverse.state, SpendState::ThresholdMet);
        assert_eq!(forward.signed_by(), reverse.signed_by());
    }

    #[tokio::test]
    async fn test_execute_before_threshold_fails_without_broadcast() {
        let f = fixture();
        let mut tx = draft(&f);
        f.composer.sign(&mut tx, &f.owner1).unwrap();

        let result = f.composer.execute(&mut tx, &f.owner1).await;
        assert!(matches!(
            result,
            Err(ComposerError::InsufficientSignatures { have: 1, need: 2 })
        ));
        assert_eq!(f.chain.broadcast_count(), 0);
        assert_eq!(tx.state, SpendState::PartiallySigned);
    }

    #[tokio::test]
    async fn test_execute_confirms() {
        let f = fixture();
        let mut tx = draft(&f);
        f.composer.sign(&mut tx, &f.owner1).unwrap();
        f.composer.sign(&mut tx, &f.owner2).unwrap();

        let tx_hash = f.composer.execute(&mut tx, &f.owner1).await.unwrap();
        assert_eq!(tx.state, SpendState::Confirmed);
        assert_eq!(f.chain.broadcast_count(), 1);
        assert_ne!(tx_hash, H256::zero());
    }

    #[tokio::test]
    async fn test_execute_twice_rejected() {
        let f = fixture();
        let mut tx = draft(&f);
        f.composer.sign(&mut tx, &f.owner1).unwrap();
        f.composer.sign(&mut tx, &f.owner2).unwrap();

        f.composer.execute(&mut tx, &f.owner1).await.unwrap();
        let result = f.composer.execute(&mut tx, &f.owner1).await;

        assert!(matches!(result, Err(ComposerError::AlreadySubmitted { .. })));
        assert_eq!(f.chain.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_late_confirmation_resolved_by_poll() {
        let f = fixture_on(Arc::new(MockChain::new().without_mining()));
        let mut tx = draft(&f);
        f.composer.sign(&mut tx, &f.owner1).unwrap();
        f.composer.sign(&mut tx, &f.owner2).unwrap();

        // Polling before submission is refused.
        let result = f.composer.poll_execution(&mut tx).await;
        assert!(matches!(result, Err(ComposerError::NotSubmitted { .. })));

        let result = f.composer.execute(&mut tx, &f.owner1).await;
        let tx_hash = match result {
            Err(ComposerError::ConfirmationTimeout { tx_hash }) => tx_hash,
            other => panic!("expected ConfirmationTimeout, got {other:?}"),
        };
        assert_eq!(tx.state, SpendState::Submitted);
        assert_eq!(tx.submitted_tx_hash, Some(tx_hash));

        // Still pending: re-poll reports the timeout again, and re-execute
        // is rejected. Neither broadcasts a second transaction.
        let result = f.composer.poll_execution(&mut tx).await;
        assert!(matches!(
            result,
            Err(ComposerError::ConfirmationTimeout { .. })
        ));
        let result = f.composer.execute(&mut tx, &f.owner1).await;
        assert!(matches!(result, Err(ComposerError::AlreadySubmitted { .. })));
        assert_eq!(f.chain.broadcast_count(), 1);

        // The transaction lands late; polling reaches the terminal state.
        f.chain.mine(tx_hash, 1);
        let confirmed = f.composer.poll_execution(&mut tx).await.unwrap();
        assert_eq!(confirmed, tx_hash);
        assert_eq!(tx.state, SpendState::Confirmed);
        assert_eq!(f.chain.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_late_revert_resolved_by_poll() {
        let f = fixture_on(Arc::new(MockChain::new().without_mining()));
        let mut tx = draft(&f);
        f.composer.sign(&mut tx, &f.owner1).unwrap();
        f.composer.sign(&mut tx, &f.owner2).unwrap();

        let result = f.composer.execute(&mut tx, &f.owner1).await;
        let tx_hash = match result {
            Err(ComposerError::ConfirmationTimeout { tx_hash }) => tx_hash,
            other => panic!("expected ConfirmationTimeout, got {other:?}"),
        };

        f.chain.mine(tx_hash, 0);
        let result = f.composer.poll_execution(&mut tx).await;
        assert!(matches!(result, Err(ComposerError::ExecutionFailed { .. })));
        assert_eq!(tx.state, SpendState::Failed);
    }

    #[tokio::test]
    async fn test_reverted_execution_marks_failed() {
        let chain = Arc::new(MockChain::new().with_reverts());
        let owner1 = OwnerKeyPair::generate().unwrap();
        let owner2 = OwnerKeyPair::generate().unwrap();
        let resolved = ResolvedOwner {
            address: Address::from([0xC3; 20]),
            provenance: KeyProvenance::Live,
        };
        let owners =
            OwnerSet::new(owner1.address(), owner2.address(), resolved.address).unwrap();
        let mut session = SafeSession::predict(owners, &resolved, 11155111);
        session.status = AccountStatus::Deployed;
        let composer = TransactionComposer::new(chain.clone(), &session)
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(10));

        let mut tx = composer.compose(
            Address::from([0xEE; 20]),
            U256::from(1u64),
            Bytes::default(),
            0,
        );
        composer.sign(&mut tx, &owner1).unwrap();
        composer.sign(&mut tx, &owner2).unwrap();

        let result = composer.execute(&mut tx, &owner1).await;
        assert!(matches!(result, Err(ComposerError::ExecutionFailed { .. })));
        assert_eq!(tx.state, SpendState::Failed);
    }
}
