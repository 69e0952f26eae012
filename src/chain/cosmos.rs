//! Cosmos chain client
//!
//! cosmrs signing client for the CosmWasm escrow factory: key derived
//! from a mnemonic over the Cosmos HD path, contract executions signed
//! and broadcast with commit semantics, reads via ABCI smart queries.
//! The chain id is taken from the node at connect time.

use async_trait::async_trait;
use cosmrs::cosmwasm::MsgExecuteContract;
use cosmrs::crypto::secp256k1::SigningKey;
use cosmrs::proto::cosmos::auth::v1beta1::{BaseAccount, QueryAccountRequest, QueryAccountResponse};
use cosmrs::proto::cosmwasm::wasm::v1::{
    QuerySmartContractStateRequest, QuerySmartContractStateResponse,
};
use cosmrs::proto::traits::Message;
use cosmrs::rpc::{Client, HttpClient};
use cosmrs::tendermint::chain;
use cosmrs::tx::{self, Fee, Msg, SignDoc, SignerInfo};
use cosmrs::{AccountId, Coin, Denom};
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{RelayerError, RelayerResult};

/// Standard Cosmos HD derivation path (coin type 118).
const COSMOS_HD_PATH: &str = "m/44'/118'/0'/0/0";

/// Gas ceiling for contract executions.
const EXECUTE_GAS_LIMIT: u64 = 2_500_000;

/// Query paths served over ABCI.
const ACCOUNT_QUERY_PATH: &str = "/cosmos.auth.v1beta1.Query/Account";
const SMART_QUERY_PATH: &str = "/cosmwasm.wasm.v1.Query/SmartContractState";

/// Execution surface the Cosmos resolver runs against. Mocked in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CosmosProvider: Send + Sync {
    /// Executes a contract message and waits for commit.
    async fn execute(&self, contract: &str, msg: &Value, funds: Vec<Coin>)
        -> RelayerResult<String>;

    /// Smart query against a contract, JSON in and out.
    async fn query_smart(&self, contract: &str, query: &Value) -> RelayerResult<Value>;
}

pub struct CosmosClient {
    rpc: HttpClient,
    signing_key: SigningKey,
    address: AccountId,
    chain_id: chain::Id,
    chain: String,
    gas_price: f64,
    gas_denom: Denom,
}

impl CosmosClient {
    /// Connects to the node, derives the signing identity and reads the
    /// chain id from node status.
    pub async fn connect(
        rpc_endpoint: &str,
        mnemonic: &str,
        prefix: &str,
        gas_price: &str,
    ) -> RelayerResult<Self> {
        let rpc = HttpClient::new(rpc_endpoint)
            .map_err(|e| RelayerError::Config(format!("invalid Cosmos RPC endpoint: {}", e)))?;
        let signing_key = derive_signing_key(mnemonic)?;
        let address = signing_key
            .public_key()
            .account_id(prefix)
            .map_err(|e| RelayerError::Wallet(format!("cannot derive account id: {}", e)))?;
        let (gas_price, gas_denom) = parse_gas_price(gas_price)?;

        let status = rpc.status().await.map_err(|e| RelayerError::Rpc {
            chain: "cosmos".to_string(),
            message: format!("node status unavailable: {}", e),
        })?;
        let chain_id = status.node_info.network;
        info!(
            "Cosmos client connected: chain {} as {}",
            chain_id, address
        );

        let chain = format!("cosmos:{}", chain_id);
        Ok(Self {
            rpc,
            signing_key,
            address,
            chain_id,
            chain,
            gas_price,
            gas_denom,
        })
    }

    fn rpc_error(&self, message: String) -> RelayerError {
        RelayerError::Rpc {
            chain: self.chain.clone(),
            message,
        }
    }

    fn fee(&self) -> Fee {
        let amount = (EXECUTE_GAS_LIMIT as f64 * self.gas_price).ceil() as u128;
        Fee::from_amount_and_gas(
            Coin {
                denom: self.gas_denom.clone(),
                amount,
            },
            EXECUTE_GAS_LIMIT,
        )
    }

    async fn abci_query(&self, path: &str, data: Vec<u8>) -> RelayerResult<Vec<u8>> {
        let result = self
            .rpc
            .abci_query(Some(path.to_string()), data, None, false)
            .await
            .map_err(|e| self.rpc_error(e.to_string()))?;
        if result.code.is_err() {
            return Err(self.rpc_error(format!("query {} failed: {}", path, result.log)));
        }
        Ok(result.value)
    }

    /// Account number and sequence for the signing address.
    async fn account(&self) -> RelayerResult<(u64, u64)> {
        let request = QueryAccountRequest {
            address: self.address.to_string(),
        };
        let raw = self
            .abci_query(ACCOUNT_QUERY_PATH, request.encode_to_vec())
            .await?;
        let response = QueryAccountResponse::decode(raw.as_slice())
            .map_err(|e| self.rpc_error(format!("malformed account response: {}", e)))?;
        let any = response
            .account
            .ok_or_else(|| self.rpc_error(format!("account {} not found", self.address)))?;
        let account = BaseAccount::decode(any.value.as_slice())
            .map_err(|e| self.rpc_error(format!("malformed base account: {}", e)))?;
        Ok((account.account_number, account.sequence))
    }
}

#[async_trait]
impl CosmosProvider for CosmosClient {
    async fn execute(
        &self,
        contract: &str,
        msg: &Value,
        funds: Vec<Coin>,
    ) -> RelayerResult<String> {
        let contract_id = contract.parse::<AccountId>().map_err(|e| {
            RelayerError::Validation(format!("invalid contract address {}: {}", contract, e))
        })?;
        let (account_number, sequence) = self.account().await?;

        let execute_msg = MsgExecuteContract {
            sender: self.address.clone(),
            contract: contract_id,
            msg: serde_json::to_vec(msg)
                .map_err(|e| RelayerError::Internal(format!("message encoding failed: {}", e)))?,
            funds,
        };
        let any = execute_msg
            .to_any()
            .map_err(|e| RelayerError::Internal(format!("message packing failed: {}", e)))?;
        let body = tx::Body::new(vec![any], "", 0u16);
        let auth_info =
            SignerInfo::single_direct(Some(self.signing_key.public_key()), sequence)
                .auth_info(self.fee());
        let sign_doc = SignDoc::new(&body, &auth_info, &self.chain_id, account_number)
            .map_err(|e| RelayerError::Internal(format!("sign doc construction failed: {}", e)))?;
        let raw = sign_doc
            .sign(&self.signing_key)
            .map_err(|e| RelayerError::Wallet(format!("signing failed: {}", e)))?;

        let response = raw
            .broadcast_commit(&self.rpc)
            .await
            .map_err(|e| self.rpc_error(e.to_string()))?;
        if response.check_tx.code.is_err() {
            return Err(RelayerError::ChainSubmission {
                chain: self.chain.clone(),
                message: format!("check_tx rejected: {}", response.check_tx.log),
            });
        }
        if response.tx_result.code.is_err() {
            return Err(RelayerError::ChainSubmission {
                chain: self.chain.clone(),
                message: format!("execution failed: {}", response.tx_result.log),
            });
        }
        let tx_hash = response.hash.to_string();
        debug!("contract execution committed: {}", tx_hash);
        Ok(tx_hash)
    }

    async fn query_smart(&self, contract: &str, query: &Value) -> RelayerResult<Value> {
        let request = QuerySmartContractStateRequest {
            address: contract.to_string(),
            query_data: serde_json::to_vec(query)
                .map_err(|e| RelayerError::Internal(format!("query encoding failed: {}", e)))?,
        };
        let raw = self
            .abci_query(SMART_QUERY_PATH, request.encode_to_vec())
            .await?;
        let response = QuerySmartContractStateResponse::decode(raw.as_slice())
            .map_err(|e| self.rpc_error(format!("malformed query response: {}", e)))?;
        serde_json::from_slice(&response.data)
            .map_err(|e| self.rpc_error(format!("contract returned invalid JSON: {}", e)))
    }
}

fn derive_signing_key(mnemonic: &str) -> RelayerResult<SigningKey> {
    let mnemonic = bip39::Mnemonic::parse_in_normalized(bip39::Language::English, mnemonic.trim())
        .map_err(|e| RelayerError::Wallet(format!("invalid mnemonic: {}", e)))?;
    let seed = mnemonic.to_seed("");
    let path = COSMOS_HD_PATH
        .parse::<bip32::DerivationPath>()
        .map_err(|e| RelayerError::Internal(format!("bad derivation path: {}", e)))?;
    let xprv = bip32::XPrv::derive_from_path(&seed, &path)
        .map_err(|e| RelayerError::Wallet(format!("key derivation failed: {}", e)))?;
    SigningKey::from_slice(xprv.private_key().to_bytes().as_slice())
        .map_err(|e| RelayerError::Wallet(format!("unusable derived key: {}", e)))
}

/// Splits a CosmJS-style gas price string such as `0.025uosmo` into its
/// numeric price and denom.
fn parse_gas_price(input: &str) -> RelayerResult<(f64, Denom)> {
    let denom_start = input
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| RelayerError::Config(format!("gas price has no denom: {}", input)))?;
    let (amount, denom) = input.split_at(denom_start);
    let price: f64 = amount
        .parse()
        .map_err(|_| RelayerError::Config(format!("gas price is not numeric: {}", input)))?;
    let denom = Denom::from_str(denom)
        .map_err(|e| RelayerError::Config(format!("invalid gas denom {}: {}", denom, e)))?;
    Ok((price, denom))
}
