//! Resolver module - per-chain escrow contract drivers
//!
//! One resolver per chain family. The EVM resolver builds calldata for
//! the on-chain resolver contract and recovers escrow addresses from
//! factory events; the Cosmos resolver drives the CosmWasm escrow
//! factory with JSON execute/query messages. Both are thin: retry and
//! lifecycle policy live in the relay engine above them.

pub mod cosmos;
pub mod evm;

pub use cosmos::{CosmosResolver, CreateHtlc};
pub use evm::{DstDeployment, EvmResolver, SrcDeployment};
