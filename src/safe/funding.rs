//! Post-deployment auto-funding
//!
//! After deployment the signer's remaining balance (minus a gas reserve
//! and a safety buffer) is swept into the new account. Funding runs as a
//! detached background task: deployment success and funding outcome are
//! two independently-observable events, and a funding failure never makes
//! the account unusable.

use crate::chain::{sign_eip1559, wait_for_receipt, ChainRpc};
use crate::crypto::OwnerKeyPair;
use crate::safe::session::SafeSession;
use ethers_core::types::transaction::eip1559::Eip1559TransactionRequest;
use ethers_core::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Safety buffer kept in the signer account on top of the gas reserve
/// (0.0005 ETH)
const DEFAULT_BUFFER_RESERVE: u64 = 500_000_000_000_000;

/// Fallback priority fee (1.5 gwei), same policy as deployment
const DEFAULT_PRIORITY_FEE: u64 = 1_500_000_000;

/// How the funding transfer is sized
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FundingPlan {
    pub gross_balance: U256,
    pub gas_reserve: U256,
    pub buffer_reserve: U256,
    pub net_amount: U256,
}

impl FundingPlan {
    /// Compute the maximal safely-spendable amount. Checked subtraction:
    /// when the balance does not cover the reserves the net amount is
    /// zero, never negative.
    pub fn compute(gross_balance: U256, gas_reserve: U256, buffer_reserve: U256) -> Self {
        let reserves = gas_reserve.saturating_add(buffer_reserve);
        let net_amount = gross_balance.checked_sub(reserves).unwrap_or_default();
        Self {
            gross_balance,
            gas_reserve,
            buffer_reserve,
            net_amount,
        }
    }

    /// Whether a transfer is worth attempting at all
    pub fn should_fund(&self) -> bool {
        !self.net_amount.is_zero()
    }
}

/// Terminal outcome of one auto-funding attempt. Informational only —
/// none of these affect account usability.
#[derive(Clone, Debug)]
pub enum FundingOutcome {
    /// The transfer confirmed on chain
    Confirmed { tx_hash: H256, amount: U256 },
    /// Nothing to send: the balance does not exceed the reserves
    Skipped { plan: FundingPlan },
    /// The transfer was attempted but did not confirm
    Failed { reason: String },
}

/// Coordinates background funding of a freshly deployed account
pub struct FundingCoordinator {
    chain: Arc<dyn ChainRpc>,
    buffer_reserve: U256,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl FundingCoordinator {
    pub fn new(chain: Arc<dyn ChainRpc>) -> Self {
        Self {
            chain,
            buffer_reserve: U256::from(DEFAULT_BUFFER_RESERVE),
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(3),
        }
    }

    pub fn with_timeouts(mut self, confirmation_timeout: Duration, poll_interval: Duration) -> Self {
        self.confirmation_timeout = confirmation_timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Spawn the auto-funding task for a deployed session.
    ///
    /// Fire-and-forget relative to the caller: the returned handle is the
    /// only coupling between deployment and funding results. The task only
    /// reads the signer balance and writes its own outcome; it must not be
    /// raced against a second deployment of the same predicted address.
    pub fn spawn_auto_fund(
        &self,
        session: &SafeSession,
        signer: OwnerKeyPair,
    ) -> JoinHandle<FundingOutcome> {
        let chain = Arc::clone(&self.chain);
        let buffer_reserve = self.buffer_reserve;
        let confirmation_timeout = self.confirmation_timeout;
        let poll_interval = self.poll_interval;
        let account = session.predicted_address;
        let chain_id = session.chain_id;
        let deployed = session.is_deployed();

        tokio::spawn(async move {
            if !deployed {
                return FundingOutcome::Failed {
                    reason: "account is not deployed".to_string(),
                };
            }
            let outcome = auto_fund(
                chain.as_ref(),
                account,
                chain_id,
                &signer,
                buffer_reserve,
                confirmation_timeout,
                poll_interval,
            )
            .await;

            match &outcome {
                FundingOutcome::Confirmed { tx_hash, amount } => {
                    log::info!("funding confirmed: {amount} wei to {account:#x} (tx {tx_hash:#x})");
                }
                FundingOutcome::Skipped { plan } => {
                    log::info!(
                        "funding skipped: balance {} wei does not exceed reserves {} wei",
                        plan.gross_balance,
                        plan.gas_reserve.saturating_add(plan.buffer_reserve)
                    );
                }
                FundingOutcome::Failed { reason } => {
                    log::warn!("funding failed (account stays usable): {reason}");
                }
            }
            outcome
        })
    }
}

/// One funding attempt, start to finish
async fn auto_fund(
    chain: &dyn ChainRpc,
    account: Address,
    chain_id: u64,
    signer: &OwnerKeyPair,
    buffer_reserve: U256,
    confirmation_timeout: Duration,
    poll_interval: Duration,
) -> FundingOutcome {
    let signer_address = signer.address();

    // Fresh balance: deployment gas has been spent by now.
    let gross_balance = match chain.balance(signer_address).await {
        Ok(balance) => balance,
        Err(e) => {
            return FundingOutcome::Failed {
                reason: format!("balance query failed: {e}"),
            }
        }
    };

    let gas_estimate = match chain
        .estimate_gas(signer_address, account, U256::zero())
        .await
    {
        Ok(estimate) => estimate,
        Err(e) => {
            return FundingOutcome::Failed {
                reason: format!("gas estimate failed: {e}"),
            }
        }
    };

    let gas_price = match chain.gas_price().await {
        Ok(price) => price,
        Err(e) => {
            return FundingOutcome::Failed {
                reason: format!("gas price query failed: {e}"),
            }
        }
    };
    let priority_fee = chain
        .max_priority_fee()
        .await
        .unwrap_or_else(|_| U256::from(DEFAULT_PRIORITY_FEE));
    let max_fee = gas_price * 2 + priority_fee;

    let plan = FundingPlan::compute(gross_balance, gas_estimate * max_fee, buffer_reserve);
    if !plan.should_fund() {
        return FundingOutcome::Skipped { plan };
    }

    let nonce = match chain.transaction_count(signer_address).await {
        Ok(nonce) => nonce,
        Err(e) => {
            return FundingOutcome::Failed {
                reason: format!("nonce query failed: {e}"),
            }
        }
    };

    let tx = Eip1559TransactionRequest::new()
        .to(account)
        .value(plan.net_amount)
        .nonce(nonce)
        .gas(gas_estimate)
        .max_fee_per_gas(max_fee)
        .max_priority_fee_per_gas(priority_fee)
        .chain_id(chain_id);

    let raw = match sign_eip1559(tx, signer) {
        Ok((raw, _)) => raw,
        Err(e) => {
            return FundingOutcome::Failed {
                reason: format!("signing failed: {e}"),
            }
        }
    };

    let tx_hash = match chain.send_raw_transaction(raw).await {
        Ok(tx_hash) => tx_hash,
        Err(e) => {
            return FundingOutcome::Failed {
                reason: format!("broadcast failed: {e}"),
            }
        }
    };

    match wait_for_receipt(chain, tx_hash, confirmation_timeout, poll_interval).await {
        Ok(Some(receipt)) if receipt.status == Some(1.into()) => FundingOutcome::Confirmed {
            tx_hash,
            amount: plan.net_amount,
        },
        Ok(Some(_)) => FundingOutcome::Failed {
            reason: format!("funding transaction {tx_hash:#x} reverted"),
        },
        Ok(None) => FundingOutcome::Failed {
            reason: format!("funding transaction {tx_hash:#x} unconfirmed after timeout"),
        },
        Err(e) => FundingOutcome::Failed {
            reason: format!("receipt polling failed: {e}"),
        },
    }
}
