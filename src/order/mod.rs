//! Swap order data model and lifecycle state

pub mod builder;
pub mod store;

pub use builder::{BuiltOrder, OrderBuilder};
pub use store::OrderStore;

use chrono::{DateTime, Utc};
use ethers::types::{Bytes, H256};
use serde::{Deserialize, Serialize};

use crate::codec::escrow::Immutables;
use crate::codec::typed_data::{LimitOrder, SignablePayload};

/// A user's swap request. Created once per swap, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIntent {
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub user_address: String,
    pub token_amount: String,
    pub src_chain_asset: String,
    pub dst_chain_asset: String,
    pub hash_lock: String,
    pub receiver: String,
}

/// Which chain holds the source leg of the swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    EvmToCosmos,
    CosmosToEvm,
}

/// Lifecycle state of a swap order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Built,
    Signed,
    SrcDeployed,
    DstDeployed,
    Withdrawn,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Withdrawn | OrderStatus::Failed)
    }
}

/// EVM-side artifacts of an order: the signed struct, its extension and
/// the source-escrow immutables captured at deployment time. Owned
/// exclusively by the EVM leg; Cosmos-source orders carry none of this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmOrderData {
    pub order: LimitOrder,
    pub extension: Bytes,
    pub payload: SignablePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_immutables: Option<Immutables>,
}

/// The mutable lifecycle record of one swap, keyed by its order hash.
/// Failures are recorded in place; orders are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapOrder {
    pub order_hash: H256,
    pub direction: SwapDirection,
    pub status: OrderStatus,
    pub user_intent: UserIntent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_src_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_dst_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_src_withdraw_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_dst_withdraw_tx_hash: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evm_escrow_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cosmos_htlc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cosmos_escrow_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evm: Option<EvmOrderData>,
}

impl SwapOrder {
    pub fn new(order_hash: H256, direction: SwapDirection, user_intent: UserIntent) -> Self {
        let now = Utc::now();
        Self {
            order_hash,
            direction,
            status: OrderStatus::Built,
            user_intent,
            signature: None,
            secret: None,
            escrow_src_tx_hash: None,
            escrow_dst_tx_hash: None,
            escrow_src_withdraw_tx_hash: None,
            escrow_dst_withdraw_tx_hash: None,
            evm_escrow_address: None,
            cosmos_htlc_id: None,
            cosmos_escrow_address: None,
            deployed_at: None,
            created_at: now,
            updated_at: now,
            executed_at: None,
            evm: None,
        }
    }

    pub fn with_evm_data(mut self, data: EvmOrderData) -> Self {
        self.evm = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_intent() -> UserIntent {
        UserIntent {
            src_chain_id: 42161,
            dst_chain_id: 999,
            user_address: "0x1111111111111111111111111111111111111111".to_string(),
            token_amount: "1".to_string(),
            src_chain_asset: "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1".to_string(),
            dst_chain_asset: "uosmo".to_string(),
            hash_lock: format!("0x{}", "ab".repeat(32)),
            receiver: "osmo1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu".to_string(),
        }
    }

    #[test]
    fn intent_uses_the_wire_field_names() {
        let json = serde_json::to_value(sample_intent()).unwrap();
        assert_eq!(json["srcChainId"], 42161);
        assert_eq!(json["hashLock"], format!("0x{}", "ab".repeat(32)));
        assert!(json.get("hash_lock").is_none());

        let wire = r#"{
            "srcChainId": 42161, "dstChainId": 999,
            "userAddress": "0x1111111111111111111111111111111111111111",
            "tokenAmount": "1",
            "srcChainAsset": "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1",
            "dstChainAsset": "uosmo",
            "hashLock": "0xabab",
            "receiver": "osmo1xyz"
        }"#;
        let parsed: UserIntent = serde_json::from_str(wire).unwrap();
        assert_eq!(parsed.dst_chain_id, 999);
        assert_eq!(parsed.receiver, "osmo1xyz");
    }

    #[test]
    fn unset_order_fields_stay_off_the_wire() {
        let order = SwapOrder::new(
            H256::repeat_byte(1),
            SwapDirection::EvmToCosmos,
            sample_intent(),
        );
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "built");
        assert_eq!(json["direction"], "evm_to_cosmos");
        assert!(json.get("signature").is_none());
        assert!(json.get("escrowSrcTxHash").is_none());
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Withdrawn.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::SrcDeployed.is_terminal());
    }
}
