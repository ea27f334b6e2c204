//! Chain access layer
//!
//! Thin abstraction over the JSON-RPC operations the orchestrator needs:
//! balances, fee data, gas estimation, nonces, raw-transaction broadcast,
//! and receipt polling. Everything network-facing runs with bounded
//! timeouts; nothing here blocks indefinitely.

pub mod client;
pub mod tx;

pub use client::{wait_for_receipt, ChainError, ChainRpc, HttpChainClient};
pub use tx::sign_eip1559;

#[cfg(test)]
pub mod testing {
    //! In-memory chain double for orchestrator tests

    use super::client::{ChainError, ChainRpc};
    use async_trait::async_trait;
    use ethers_core::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
    use ethers_core::utils::keccak256;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock chain with scriptable balances/fees and a broadcast recorder.
    ///
    /// Every broadcast is remembered; when `auto_mine` is set, a receipt
    /// with the configured status becomes available immediately.
    pub struct MockChain {
        pub chain_id: u64,
        balances: Mutex<HashMap<Address, U256>>,
        code: Mutex<HashMap<Address, Bytes>>,
        gas_price: U256,
        priority_fee: U256,
        gas_estimate: U256,
        broadcasts: Mutex<Vec<Bytes>>,
        receipts: Mutex<HashMap<H256, TransactionReceipt>>,
        auto_mine_status: Option<u64>,
    }

    impl MockChain {
        pub fn new() -> Self {
            Self {
                chain_id: 11155111,
                balances: Mutex::new(HashMap::new()),
                code: Mutex::new(HashMap::new()),
                gas_price: U256::from(2_000_000_000u64),
                priority_fee: U256::from(1_000_000_000u64),
                gas_estimate: U256::from(21_000u64),
                broadcasts: Mutex::new(Vec::new()),
                receipts: Mutex::new(HashMap::new()),
                auto_mine_status: Some(1),
            }
        }

        /// Stop synthesizing receipts (broadcasts stay pending forever)
        pub fn without_mining(mut self) -> Self {
            self.auto_mine_status = None;
            self
        }

        /// Synthesize failure receipts (status 0) for every broadcast
        pub fn with_reverts(mut self) -> Self {
            self.auto_mine_status = Some(0);
            self
        }

        pub fn set_balance(&self, address: Address, balance: U256) {
            self.balances.lock().unwrap().insert(address, balance);
        }

        pub fn set_code(&self, address: Address, code: Bytes) {
            self.code.lock().unwrap().insert(address, code);
        }

        /// Retroactively mine a receipt for an earlier broadcast
        pub fn mine(&self, tx_hash: H256, status: u64) {
            let receipt = TransactionReceipt {
                transaction_hash: tx_hash,
                status: Some(U64::from(status)),
                block_number: Some(U64::from(1)),
                ..Default::default()
            };
            self.receipts.lock().unwrap().insert(tx_hash, receipt);
        }

        pub fn broadcast_count(&self) -> usize {
            self.broadcasts.lock().unwrap().len()
        }

        pub fn broadcasts(&self) -> Vec<Bytes> {
            self.broadcasts.lock().unwrap().clone()
        }
    }

    impl Default for MockChain {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ChainRpc for MockChain {
        fn chain_id(&self) -> u64 {
            self.chain_id
        }

        async fn balance(&self, address: Address) -> Result<U256, ChainError> {
            Ok(self
                .balances
                .lock()
                .unwrap()
                .get(&address)
                .copied()
                .unwrap_or_default())
        }

        async fn gas_price(&self) -> Result<U256, ChainError> {
            Ok(self.gas_price)
        }

        async fn max_priority_fee(&self) -> Result<U256, ChainError> {
            Ok(self.priority_fee)
        }

        async fn estimate_gas(
            &self,
            _from: Address,
            _to: Address,
            _value: U256,
        ) -> Result<U256, ChainError> {
            Ok(self.gas_estimate)
        }

        async fn transaction_count(&self, _address: Address) -> Result<U256, ChainError> {
            Ok(U256::from(self.broadcasts.lock().unwrap().len()))
        }

        async fn code_at(&self, address: Address) -> Result<Bytes, ChainError> {
            Ok(self
                .code
                .lock()
                .unwrap()
                .get(&address)
                .cloned()
                .unwrap_or_default())
        }

        async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
            let tx_hash = H256::from(keccak256(&raw));
            self.broadcasts.lock().unwrap().push(raw);

            if let Some(status) = self.auto_mine_status {
                let receipt = TransactionReceipt {
                    transaction_hash: tx_hash,
                    status: Some(U64::from(status)),
                    block_number: Some(U64::from(1)),
                    ..Default::default()
                };
                self.receipts.lock().unwrap().insert(tx_hash, receipt);
            }
            Ok(tx_hash)
        }

        async fn transaction_receipt(
            &self,
            tx_hash: H256,
        ) -> Result<Option<TransactionReceipt>, ChainError> {
            Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
        }
    }
}
