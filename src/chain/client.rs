//! JSON-RPC chain client
//!
//! Implements the `ChainRpc` trait over HTTP JSON-RPC with a bounded
//! per-request timeout. Orchestrator code depends only on the trait so
//! tests can substitute an in-memory chain.

use async_trait::async_trait;
use ethers_core::types::{Address, Bytes, TransactionReceipt, H256, U256};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Per-request timeout for RPC calls
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from chain RPC operations
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("RPC response missing result")]
    MissingResult,
}

/// The chain operations the orchestrator needs
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Chain id this client is configured for
    fn chain_id(&self) -> u64;

    /// Native currency balance in wei
    async fn balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Current legacy gas price (used as a max-fee baseline)
    async fn gas_price(&self) -> Result<U256, ChainError>;

    /// Suggested EIP-1559 priority fee
    async fn max_priority_fee(&self) -> Result<U256, ChainError>;

    /// Gas estimate for a plain value transfer
    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<U256, ChainError>;

    /// Pending-inclusive transaction count (next nonce)
    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError>;

    /// Deployed bytecode at an address (empty if none)
    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError>;

    /// Broadcast a signed raw transaction, returning its hash
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError>;

    /// Receipt for a transaction, if mined
    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError>;
}

/// Poll for a receipt until it appears or the deadline passes.
///
/// Returns `Ok(None)` on timeout — the transaction may still confirm later,
/// so callers decide whether that is pending or fatal.
pub async fn wait_for_receipt(
    chain: &dyn ChainRpc,
    tx_hash: H256,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<TransactionReceipt>, ChainError> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(receipt) = chain.transaction_receipt(tx_hash).await? {
            return Ok(Some(receipt));
        }
        if tokio::time::Instant::now() + poll_interval > deadline {
            return Ok(None);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize, Debug)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC implementation of `ChainRpc`
pub struct HttpChainClient {
    http: reqwest::Client,
    url: String,
    chain_id: u64,
    next_id: AtomicU64,
}

impl HttpChainClient {
    /// Create a client for the given RPC endpoint and chain id
    pub fn new(url: impl Into<String>, chain_id: u64) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: url.into(),
            chain_id,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        log::debug!("rpc call {} -> {}", method, self.url);
        let response: RpcResponse<T> = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or(ChainError::MissingResult)
    }

    /// Like `call`, but a null result is a valid answer (e.g. no receipt yet)
    async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, ChainError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response: RpcResponse<T> = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }
}

#[async_trait]
impl ChainRpc for HttpChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn balance(&self, address: Address) -> Result<U256, ChainError> {
        self.call("eth_getBalance", json!([address, "latest"])).await
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.call("eth_gasPrice", json!([])).await
    }

    async fn max_priority_fee(&self) -> Result<U256, ChainError> {
        self.call("eth_maxPriorityFeePerGas", json!([])).await
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<U256, ChainError> {
        self.call(
            "eth_estimateGas",
            json!([{ "from": from, "to": to, "value": value }, "latest"]),
        )
        .await
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, ChainError> {
        self.call("eth_getTransactionCount", json!([address, "pending"]))
            .await
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
        self.call("eth_getCode", json!([address, "latest"])).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        self.call("eth_sendRawTransaction", json!([raw])).await
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.call_optional("eth_getTransactionReceipt", json!([tx_hash]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use ethers_core::types::H256;

    #[tokio::test]
    async fn test_wait_for_receipt_found() {
        let chain = MockChain::new();
        let tx_hash = chain
            .send_raw_transaction(Bytes::from(vec![1, 2, 3]))
            .await
            .unwrap();

        let receipt = wait_for_receipt(
            &chain,
            tx_hash,
            Duration::from_secs(1),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert!(receipt.is_some());
        assert_eq!(receipt.unwrap().transaction_hash, tx_hash);
    }

    #[tokio::test]
    async fn test_wait_for_receipt_times_out() {
        let chain = MockChain::new().without_mining();
        let tx_hash = chain
            .send_raw_transaction(Bytes::from(vec![1, 2, 3]))
            .await
            .unwrap();

        let receipt = wait_for_receipt(
            &chain,
            tx_hash,
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn test_unknown_hash_has_no_receipt() {
        let chain = MockChain::new();
        let receipt = chain.transaction_receipt(H256::zero()).await.unwrap();
        assert!(receipt.is_none());
    }
}
