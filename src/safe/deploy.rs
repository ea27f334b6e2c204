//! Deployment orchestration
//!
//! Builds, prices, signs, and broadcasts the one-time deployment
//! transaction for a predicted account, then waits (bounded) for one
//! confirmation. Partial failure is signaled precisely: a funding
//! shortfall never broadcasts, a confirmation timeout is pending rather
//! than failed, and a second attempt against the same predicted address
//! never produces a duplicate broadcast.

use crate::chain::{sign_eip1559, wait_for_receipt, ChainError, ChainRpc};
use crate::crypto::{KeyError, OwnerKeyPair};
use crate::safe::predictor;
use crate::safe::session::{AccountStatus, DeploymentRecord, SafeSession};
use ethers_core::types::transaction::eip1559::Eip1559TransactionRequest;
use ethers_core::types::{Address, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Fallback priority fee when the node does not serve
/// `eth_maxPriorityFeePerGas` (1.5 gwei)
const DEFAULT_PRIORITY_FEE: u64 = 1_500_000_000;

/// Deployment errors
#[derive(Error, Debug)]
pub enum DeployError {
    #[error(
        "Insufficient funds: need {needed} wei, have {available} wei \
         (shortfall {shortfall} wei); fund {funding_address:#x} and retry"
    )]
    InsufficientFunds {
        needed: U256,
        available: U256,
        shortfall: U256,
        funding_address: Address,
    },
    #[error("Deployment already in flight or completed for {address:#x}")]
    DuplicateDeployment { address: Address },
    #[error("Deployment transaction {tx_hash:#x} reverted")]
    DeploymentFailed { tx_hash: H256 },
    #[error("Deployment transaction {tx_hash:#x} not yet confirmed; re-poll later")]
    DeploymentPending { tx_hash: H256 },
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

/// Tunables for deployment transactions
#[derive(Clone, Copy, Debug)]
pub struct DeployConfig {
    /// Fixed gas ceiling for the deployment transaction; deliberately not
    /// node-estimated so broadcasts cannot stall underpriced
    pub gas_limit: u64,
    /// How long to wait for the first confirmation
    pub confirmation_timeout: Duration,
    /// Receipt polling cadence
    pub poll_interval: Duration,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            gas_limit: 600_000,
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(3),
        }
    }
}

/// Drives the deployment of a predicted account
pub struct DeploymentOrchestrator {
    chain: Arc<dyn ChainRpc>,
    config: DeployConfig,
}

impl DeploymentOrchestrator {
    pub fn new(chain: Arc<dyn ChainRpc>) -> Self {
        Self {
            chain,
            config: DeployConfig::default(),
        }
    }

    pub fn with_config(chain: Arc<dyn ChainRpc>, config: DeployConfig) -> Self {
        Self { chain, config }
    }

    /// EIP-1559 fee pair: max fee is twice the current gas price plus the
    /// priority fee, so the transaction survives moderate base-fee growth.
    async fn fee_fields(&self) -> Result<(U256, U256), ChainError> {
        let gas_price = self.chain.gas_price().await?;
        let priority_fee = match self.chain.max_priority_fee().await {
            Ok(fee) => fee,
            Err(e) => {
                log::debug!("eth_maxPriorityFeePerGas unavailable ({e}), using default");
                U256::from(DEFAULT_PRIORITY_FEE)
            }
        };
        let max_fee = gas_price * 2 + priority_fee;
        Ok((max_fee, priority_fee))
    }

    /// Deploy the session's predicted account.
    ///
    /// Idempotent with respect to the predicted address: if contract code
    /// already exists there the session is marked deployed and returned
    /// unchanged, and a session with a broadcast still in flight is
    /// rejected — a duplicate deployment transaction is never sent.
    pub async fn deploy(
        &self,
        session: &mut SafeSession,
        signer: &OwnerKeyPair,
    ) -> Result<(), DeployError> {
        if session.status == AccountStatus::Deployed {
            return Err(DeployError::DuplicateDeployment {
                address: session.predicted_address,
            });
        }

        // Detect an account that already exists at the predicted address
        // (ours from an earlier run, or deployed by someone else with the
        // same configuration — CREATE2 makes those indistinguishable).
        let code = self.chain.code_at(session.predicted_address).await?;
        if !code.is_empty() {
            log::info!(
                "contract already present at {:#x}, skipping deployment",
                session.predicted_address
            );
            session.status = AccountStatus::Deployed;
            return Ok(());
        }

        if let Some(record) = session.deployment {
            // Broadcast from this session is still unconfirmed; re-poll it
            // instead of paying for a second deployment.
            return self.poll_deployment_record(session, record.tx_hash).await;
        }

        let (max_fee, priority_fee) = self.fee_fields().await?;
        let signer_address = signer.address();
        let balance = self.chain.balance(signer_address).await?;

        // Conservative worst-case cost: full gas ceiling at max fee.
        let needed = U256::from(self.config.gas_limit) * max_fee;
        if balance < needed {
            return Err(DeployError::InsufficientFunds {
                needed,
                available: balance,
                shortfall: needed - balance,
                funding_address: signer_address,
            });
        }

        let nonce = self.chain.transaction_count(signer_address).await?;
        let calldata = predictor::deployment_calldata(
            &session.owners,
            session.threshold,
            session.chain_id,
        );

        let tx = Eip1559TransactionRequest::new()
            .to(predictor::factory_address())
            .data(calldata)
            .nonce(nonce)
            .gas(U256::from(self.config.gas_limit))
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(priority_fee)
            .chain_id(session.chain_id);

        let (raw, _) = sign_eip1559(tx, signer)?;
        let tx_hash = self.chain.send_raw_transaction(raw).await?;
        log::info!(
            "deployment broadcast: tx {:#x} for account {:#x}",
            tx_hash,
            session.predicted_address
        );

        session.status = AccountStatus::Broadcast;
        session.deployment = Some(DeploymentRecord {
            tx_hash,
            nonce: nonce.as_u64(),
            gas_limit: self.config.gas_limit,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority_fee,
        });

        self.poll_deployment_record(session, tx_hash).await
    }

    /// Re-poll a deployment that previously timed out with
    /// `DeploymentPending`.
    pub async fn poll_deployment(&self, session: &mut SafeSession) -> Result<(), DeployError> {
        match session.deployment {
            Some(record) => self.poll_deployment_record(session, record.tx_hash).await,
            None => Err(DeployError::DuplicateDeployment {
                address: session.predicted_address,
            }),
        }
    }

    async fn poll_deployment_record(
        &self,
        session: &mut SafeSession,
        tx_hash: H256,
    ) -> Result<(), DeployError> {
        let receipt = wait_for_receipt(
            self.chain.as_ref(),
            tx_hash,
            self.config.confirmation_timeout,
            self.config.poll_interval,
        )
        .await?;

        match receipt {
            // May still land later; the caller can re-poll.
            None => Err(DeployError::DeploymentPending { tx_hash }),
            Some(receipt) if receipt.status == Some(1.into()) => {
                session.status = AccountStatus::Deployed;
                log::info!(
                    "account deployed at {:#x} (tx {:#x})",
                    session.predicted_address,
                    tx_hash
                );
                Ok(())
            }
            Some(_) => Err(DeployError::DeploymentFailed { tx_hash }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use crate::custody::{KeyProvenance, ResolvedOwner};
    use crate::safe::session::OwnerSet;
    use ethers_core::types::Bytes;

    fn test_config() -> DeployConfig {
        DeployConfig {
            gas_limit: 600_000,
            confirmation_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn test_session(signer: &OwnerKeyPair) -> SafeSession {
        let other = OwnerKeyPair::generate().unwrap();
        let remote = ResolvedOwner {
            address: Address::from([0xC3; 20]),
            provenance: KeyProvenance::Live,
        };
        let owners = OwnerSet::new(signer.address(), other.address(), remote.address).unwrap();
        SafeSession::predict(owners, &remote, 11155111)
    }

    #[tokio::test]
    async fn test_zero_balance_fails_without_broadcast() {
        let chain = Arc::new(MockChain::new());
        let signer = OwnerKeyPair::generate().unwrap();
        let mut session = test_session(&signer);

        let orchestrator = DeploymentOrchestrator::with_config(chain.clone(), test_config());
        let result = orchestrator.deploy(&mut session, &signer).await;

        match result {
            Err(DeployError::InsufficientFunds {
                shortfall,
                funding_address,
                ..
            }) => {
                assert!(shortfall > U256::zero());
                assert_eq!(funding_address, signer.address());
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
        assert_eq!(chain.broadcast_count(), 0);
        assert_eq!(session.status, AccountStatus::Predicted);
    }

    #[tokio::test]
    async fn test_successful_deployment() {
        let chain = Arc::new(MockChain::new());
        let signer = OwnerKeyPair::generate().unwrap();
        let mut session = test_session(&signer);
        chain.set_balance(signer.address(), U256::exp10(18));

        let orchestrator = DeploymentOrchestrator::with_config(chain.clone(), test_config());
        orchestrator.deploy(&mut session, &signer).await.unwrap();

        assert_eq!(session.status, AccountStatus::Deployed);
        assert_eq!(chain.broadcast_count(), 1);
        let record = session.deployment.unwrap();
        assert_eq!(record.gas_limit, 600_000);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_reports_pending() {
        let chain = Arc::new(MockChain::new().without_mining());
        let signer = OwnerKeyPair::generate().unwrap();
        let mut session = test_session(&signer);
        chain.set_balance(signer.address(), U256::exp10(18));

        let orchestrator = DeploymentOrchestrator::with_config(chain.clone(), test_config());
        let result = orchestrator.deploy(&mut session, &signer).await;

        assert!(matches!(result, Err(DeployError::DeploymentPending { .. })));
        // Broadcast happened and the record survives for re-polling.
        assert_eq!(chain.broadcast_count(), 1);
        assert_eq!(session.status, AccountStatus::Broadcast);
        assert!(session.deployment.is_some());

        // Re-invoking deploy never produces a second broadcast.
        let result = orchestrator.deploy(&mut session, &signer).await;
        assert!(matches!(result, Err(DeployError::DeploymentPending { .. })));
        assert_eq!(chain.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_reverted_deployment_fails() {
        let chain = Arc::new(MockChain::new().with_reverts());
        let signer = OwnerKeyPair::generate().unwrap();
        let mut session = test_session(&signer);
        chain.set_balance(signer.address(), U256::exp10(18));

        let orchestrator = DeploymentOrchestrator::with_config(chain.clone(), test_config());
        let result = orchestrator.deploy(&mut session, &signer).await;

        assert!(matches!(result, Err(DeployError::DeploymentFailed { .. })));
    }

    #[tokio::test]
    async fn test_existing_code_short_circuits() {
        let chain = Arc::new(MockChain::new());
        let signer = OwnerKeyPair::generate().unwrap();
        let mut session = test_session(&signer);
        chain.set_code(session.predicted_address, Bytes::from(vec![0x60, 0x80]));

        let orchestrator = DeploymentOrchestrator::with_config(chain.clone(), test_config());
        orchestrator.deploy(&mut session, &signer).await.unwrap();

        assert_eq!(session.status, AccountStatus::Deployed);
        assert_eq!(chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_redeploy_of_deployed_session_rejected() {
        let chain = Arc::new(MockChain::new());
        let signer = OwnerKeyPair::generate().unwrap();
        let mut session = test_session(&signer);
        chain.set_balance(signer.address(), U256::exp10(18));

        let orchestrator = DeploymentOrchestrator::with_config(chain.clone(), test_config());
        orchestrator.deploy(&mut session, &signer).await.unwrap();

        let result = orchestrator.deploy(&mut session, &signer).await;
        assert!(matches!(
            result,
            Err(DeployError::DuplicateDeployment { .. })
        ));
        assert_eq!(chain.broadcast_count(), 1);
    }
}
