//! Chain module - signing clients for the two legs of a swap
//!
//! This module provides:
//! - An EVM client wrapping a signer middleware over HTTP JSON-RPC
//! - A Cosmos client signing CosmWasm executions over Tendermint RPC
//! - Provider traits the resolvers run against, mockable in tests

pub mod cosmos;
pub mod evm;

pub use cosmos::{CosmosClient, CosmosProvider};
pub use evm::{EvmClient, EvmProvider, TxOutcome};
