//! Cosmos resolver - CosmWasm escrow factory driver
//!
//! Executes and queries the HTLC escrow factory contract. Message names
//! and field sets are fixed by the deployed contract: `CreateHTLC`,
//! `GetHTLC` and `GetConfig`, with the hashlock carried as raw bytes
//! and the amount as a base-unit decimal string. Executions attach no
//! funds; the factory pulls the escrowed tokens itself.

use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::chain::CosmosProvider;
use crate::error::{RelayerError, RelayerResult};

/// Arguments of the factory's `CreateHTLC` execute message. `timelock`
/// is an absolute unix timestamp; the contract refunds the maker after
/// it passes.
#[derive(Debug, Clone, Serialize)]
pub struct CreateHtlc {
    pub swap_hash: String,
    pub maker: String,
    pub amount: String,
    pub denom: String,
    pub hashlock: Vec<u8>,
    pub timelock: u64,
}

pub struct CosmosResolver {
    client: Arc<dyn CosmosProvider>,
    escrow_factory: String,
}

impl CosmosResolver {
    pub fn new(client: Arc<dyn CosmosProvider>, escrow_factory: String) -> Self {
        info!("Cosmos resolver ready: factory {}", escrow_factory);
        Self {
            client,
            escrow_factory,
        }
    }

    pub fn escrow_factory(&self) -> &str {
        &self.escrow_factory
    }

    /// Locks funds in a new HTLC keyed by the swap hash. Returns the
    /// commit transaction hash.
    pub async fn create_htlc(&self, params: &CreateHtlc) -> RelayerResult<String> {
        let msg = json!({ "CreateHTLC": params });
        let tx_hash = self
            .client
            .execute(&self.escrow_factory, &msg, Vec::new())
            .await?;
        info!(
            "HTLC created for swap {} in tx {}",
            params.swap_hash, tx_hash
        );
        Ok(tx_hash)
    }

    /// Reads the HTLC stored under a swap hash. Errors if the contract
    /// has no entry for it.
    pub async fn get_htlc(&self, swap_hash: &str) -> RelayerResult<Value> {
        self.client
            .query_smart(&self.escrow_factory, &json!({ "GetHTLC": { "swap_hash": swap_hash } }))
            .await
    }

    /// Factory-level configuration as the contract reports it.
    pub async fn factory_config(&self) -> RelayerResult<Value> {
        self.client
            .query_smart(&self.escrow_factory, &json!({ "GetConfig": {} }))
            .await
    }

    /// Extracts the HTLC's own escrow address from a `GetHTLC` response,
    /// tolerating the two field spellings the contract has shipped with.
    pub fn escrow_address_from(htlc: &Value) -> RelayerResult<String> {
        htlc.get("escrow_address")
            .or_else(|| htlc.get("address"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                RelayerError::Codec("HTLC response carries no escrow address".to_string())
            })
    }
}
