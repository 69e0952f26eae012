//! Relay module - the swap coordination engine
//!
//! Owns the order lifecycle: building signable orders, driving both
//! directional escrow protocols and recording every on-chain artifact
//! in the store. Chain specifics stay in the resolvers; this layer is
//! where ordering, idempotency and failure policy live.

pub mod engine;

pub use engine::RelayerEngine;
