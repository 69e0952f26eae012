//! EVM chain client
//!
//! Thin wrapper over an ethers signer middleware. One submission is one
//! blocking round trip: send, wait for a confirmation, surface the mined
//! block's hash and timestamp. Calldata is built by the resolver layer;
//! this layer only signs and moves it.

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{RelayerError, RelayerResult};

/// A confirmed transaction and the block it landed in.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: H256,
    pub block_hash: H256,
    pub block_timestamp: u64,
}

/// Submission surface the EVM resolver runs against. Mocked in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvmProvider: Send + Sync {
    /// Submits a transaction and waits for one confirmation.
    async fn submit(&self, tx: TypedTransaction) -> RelayerResult<TxOutcome>;

    /// Logs emitted by `address` under `topic0` within a single block.
    async fn logs_in_block(
        &self,
        block_hash: H256,
        address: Address,
        topic0: H256,
    ) -> RelayerResult<Vec<Log>>;

    /// Read-only contract call.
    async fn call(&self, to: Address, data: Bytes) -> RelayerResult<Bytes>;
}

pub struct EvmClient {
    inner: SignerMiddleware<Provider<Http>, LocalWallet>,
    chain: String,
    confirm_timeout: Duration,
}

impl EvmClient {
    pub fn new(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        confirm_timeout: Duration,
    ) -> RelayerResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| RelayerError::Config(format!("invalid EVM RPC URL: {}", e)))?;
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("invalid private key: {}", e)))?
            .with_chain_id(chain_id);
        Ok(Self {
            inner: SignerMiddleware::new(provider, wallet),
            chain: format!("evm:{}", chain_id),
            confirm_timeout,
        })
    }

    fn rpc_error(&self, e: impl std::fmt::Display) -> RelayerError {
        RelayerError::Rpc {
            chain: self.chain.clone(),
            message: e.to_string(),
        }
    }

    fn submission_error(&self, message: String) -> RelayerError {
        RelayerError::ChainSubmission {
            chain: self.chain.clone(),
            message,
        }
    }
}

#[async_trait]
impl EvmProvider for EvmClient {
    async fn submit(&self, tx: TypedTransaction) -> RelayerResult<TxOutcome> {
        let pending = self
            .inner
            .send_transaction(tx, None)
            .await
            .map_err(|e| self.submission_error(e.to_string()))?;
        let tx_hash = pending.tx_hash();
        debug!("transaction submitted: {:?}", tx_hash);

        let receipt = timeout(self.confirm_timeout, pending)
            .await
            .map_err(|_| RelayerError::Timeout {
                operation: format!("confirmation of {:?}", tx_hash),
            })?
            .map_err(|e| self.rpc_error(e))?
            .ok_or_else(|| self.submission_error(format!("no receipt for {:?}", tx_hash)))?;

        if receipt.status != Some(U64::one()) {
            return Err(self.submission_error(format!("transaction {:?} reverted", tx_hash)));
        }
        let block_hash = receipt
            .block_hash
            .ok_or_else(|| self.submission_error(format!("receipt {:?} has no block", tx_hash)))?;
        let block = self
            .inner
            .get_block(block_hash)
            .await
            .map_err(|e| self.rpc_error(e))?
            .ok_or_else(|| {
                self.submission_error(format!("mined block {:?} not found", block_hash))
            })?;

        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            block_hash,
            block_timestamp: block.timestamp.as_u64(),
        })
    }

    async fn logs_in_block(
        &self,
        block_hash: H256,
        address: Address,
        topic0: H256,
    ) -> RelayerResult<Vec<Log>> {
        let filter = Filter::new()
            .at_block_hash(block_hash)
            .address(address)
            .topic0(topic0);
        self.inner
            .get_logs(&filter)
            .await
            .map_err(|e| self.rpc_error(e))
    }

    async fn call(&self, to: Address, data: Bytes) -> RelayerResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.inner
            .call(&tx, None)
            .await
            .map_err(|e| self.rpc_error(e))
    }
}
