//! Order construction
//!
//! Turns a user intent into a signable limit order bound to the escrow
//! factory. Amounts are scaled by an asset-derived decimal table, never by
//! caller input, and the canonical order hash is always computed locally.

use chrono::Utc;
use ethers::types::{Address, Bytes, H256};
use rand::Rng;
use serde::Serialize;
use std::str::FromStr;

use crate::codec::{
    self,
    extension::{self, AuctionDetails, CrossChainArgs, WhitelistEntry},
    typed_data::{self, LimitOrder, SignablePayload},
};
use crate::error::{RelayerError, RelayerResult};
use crate::order::UserIntent;

/// Chain parameters the builder constructs orders against.
#[derive(Debug, Clone)]
pub struct OrderBuilder {
    chain_id: u64,
    resolver: Address,
    escrow_factory: Address,
    limit_order: Address,
}

/// Product of a successful build: the order struct, the extension blob its
/// salt commits to, and the wallet-facing payload.
#[derive(Debug, Clone)]
pub struct BuiltOrder {
    pub order_hash: H256,
    pub order: LimitOrder,
    pub extension: Bytes,
    pub payload: SignablePayload,
}

impl OrderBuilder {
    pub fn new(
        chain_id: u64,
        resolver: Address,
        escrow_factory: Address,
        limit_order: Address,
    ) -> Self {
        Self {
            chain_id,
            resolver,
            escrow_factory,
            limit_order,
        }
    }

    /// Builds the signable order for an intent whose source leg lives on
    /// this builder's chain.
    pub fn build(&self, intent: &UserIntent) -> RelayerResult<BuiltOrder> {
        let maker = parse_evm_address(&intent.user_address, "userAddress")?;
        let maker_asset = parse_evm_address(&intent.src_chain_asset, "srcChainAsset")?;
        let hashlock = codec::parse_hashlock(&intent.hash_lock)?;

        // A non-EVM destination cannot appear in the settled order, so the
        // taker asset becomes the reserved sentinel and the resolver takes
        // the receiver slot. The true receiver stays in the intent.
        let non_evm_destination = intent.dst_chain_id == codec::COSMOS_CHAIN_ID;
        let (taker_asset, receiver) = if non_evm_destination {
            (codec::non_evm_sentinel(), self.resolver)
        } else {
            (
                parse_evm_address(&intent.dst_chain_asset, "dstChainAsset")?,
                parse_evm_address(&intent.receiver, "receiver")?,
            )
        };

        let decimals = codec::token_decimals(&maker_asset);
        let amount = codec::parse_token_amount(&intent.token_amount, decimals)?;
        let timelocks = codec::TimelockSchedule::standard().pack();

        let auction = AuctionDetails::flat(Utc::now().timestamp() as u64);
        let whitelist = [WhitelistEntry {
            address: self.resolver,
            allow_from: 0,
        }];
        let args = CrossChainArgs {
            hashlock,
            dst_chain_id: intent.dst_chain_id,
            dst_token: taker_asset,
            src_safety_deposit: codec::src_safety_deposit(),
            dst_safety_deposit: codec::dst_safety_deposit(),
            timelocks,
        };
        let extension_blob =
            extension::build_escrow_extension(self.escrow_factory, &auction, 0, &whitelist, &args);

        let mut rng = rand::thread_rng();
        let base_salt: u64 = rng.gen_range(0..1_000);
        let nonce: u64 = rng.gen_range(0..(1u64 << 40));

        let order = LimitOrder {
            salt: extension::salt_with_extension(base_salt, &extension_blob),
            maker,
            receiver,
            maker_asset,
            taker_asset,
            making_amount: amount,
            taking_amount: amount,
            maker_traits: extension::maker_traits(nonce, false, false, true, true),
        };

        let order_hash = typed_data::order_hash(self.chain_id, self.limit_order, &order);
        let payload = typed_data::signable_payload(self.chain_id, self.limit_order, &order);
        Ok(BuiltOrder {
            order_hash,
            order,
            extension: extension_blob,
            payload,
        })
    }
}

#[derive(Serialize)]
struct HashedIntent<'a> {
    #[serde(flatten)]
    intent: &'a UserIntent,
    nonce: u64,
}

/// Order hash for a Cosmos-source swap. There is no EVM order to hash at
/// build time, so the key is a keccak over the JSON-serialized intent
/// salted with a random nonce.
pub fn cosmos_order_hash(intent: &UserIntent) -> RelayerResult<H256> {
    let nonce: u64 = rand::thread_rng().gen();
    let encoded = serde_json::to_vec(&HashedIntent { intent, nonce })
        .map_err(|e| RelayerError::Internal(format!("intent serialization failed: {}", e)))?;
    Ok(H256::from(codec::keccak256(&encoded)))
}

fn parse_evm_address(value: &str, field: &str) -> RelayerResult<Address> {
    Address::from_str(value.trim()).map_err(|_| {
        RelayerError::Validation(format!("{} is not a valid EVM address: {}", field, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    fn builder() -> OrderBuilder {
        OrderBuilder::new(
            42161,
            Address::from_str("0x4444444444444444444444444444444444444444").unwrap(),
            Address::from_str("0x3333333333333333333333333333333333333333").unwrap(),
            Address::from_str("0x111111125421ca6dc452d289314280a0f8842a65").unwrap(),
        )
    }

    fn cosmos_intent() -> UserIntent {
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
    fn non_evm_destination_uses_sentinel_and_resolver_receiver() {
        let built = builder().build(&cosmos_intent()).unwrap();
        assert_eq!(built.order.taker_asset, codec::non_evm_sentinel());
        assert_eq!(
            built.order.receiver,
            Address::from_str("0x4444444444444444444444444444444444444444").unwrap()
        );
        assert_eq!(
            built.order.maker,
            Address::from_str("0x1111111111111111111111111111111111111111").unwrap()
        );
        // Wrapped-native source asset scales at 18 decimals
        assert_eq!(built.order.making_amount, U256::exp10(18));
        assert_eq!(built.order.taking_amount, built.order.making_amount);
    }

    #[test]
    fn stable_assets_scale_at_six_decimals() {
        let mut intent = cosmos_intent();
        intent.src_chain_asset = "0xaf88d065e77c8cC2239327C5EDb3A432268e5831".to_string();
        let built = builder().build(&intent).unwrap();
        assert_eq!(built.order.making_amount, U256::from(1_000_000u64));
    }

    #[test]
    fn evm_destination_keeps_the_intent_receiver() {
        let mut intent = cosmos_intent();
        intent.dst_chain_id = 1;
        intent.dst_chain_asset = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string();
        intent.receiver = "0x2222222222222222222222222222222222222222".to_string();
        let built = builder().build(&intent).unwrap();
        assert_eq!(
            built.order.receiver,
            Address::from_str("0x2222222222222222222222222222222222222222").unwrap()
        );
        assert_ne!(built.order.taker_asset, codec::non_evm_sentinel());
    }

    #[test]
    fn salt_commits_to_the_extension() {
        let built = builder().build(&cosmos_intent()).unwrap();
        let commitment =
            U256::from_big_endian(&codec::keccak256(&built.extension)) & (U256::MAX >> 96);
        assert_eq!(built.order.salt & (U256::MAX >> 96), commitment);
        assert!(built.order.salt >> 160 < U256::from(1_000u64));
    }

    #[test]
    fn maker_traits_disable_partial_and_multiple_fills() {
        let built = builder().build(&cosmos_intent()).unwrap();
        let traits = built.order.maker_traits;
        assert!(traits.bit(255), "partial fills must be disabled");
        assert!(!traits.bit(254), "multiple fills must stay disabled");
        assert!(traits.bit(251), "post-interaction flag expected");
        assert!(traits.bit(249), "extension flag expected");
    }

    #[test]
    fn order_hash_matches_the_payload_contents() {
        let built = builder().build(&cosmos_intent()).unwrap();
        let recomputed = typed_data::order_hash(
            built.payload.domain.chain_id,
            built.payload.domain.verifying_contract,
            &built.payload.message,
        );
        assert_eq!(built.order_hash, recomputed);
    }

    #[test]
    fn malformed_fields_fail_validation() {
        let mut bad_user = cosmos_intent();
        bad_user.user_address = "not-an-address".to_string();
        assert!(matches!(
            builder().build(&bad_user),
            Err(RelayerError::Validation(_))
        ));

        let mut bad_hashlock = cosmos_intent();
        bad_hashlock.hash_lock = "0x1234".to_string();
        assert!(matches!(
            builder().build(&bad_hashlock),
            Err(RelayerError::Validation(_))
        ));

        let mut bad_amount = cosmos_intent();
        bad_amount.token_amount = "one".to_string();
        assert!(matches!(
            builder().build(&bad_amount),
            Err(RelayerError::Validation(_))
        ));
    }

    #[test]
    fn cosmos_order_hashes_are_salted() {
        let intent = cosmos_intent();
        let a = cosmos_order_hash(&intent).unwrap();
        let b = cosmos_order_hash(&intent).unwrap();
        assert_ne!(a, H256::zero());
        assert_ne!(a, b);
    }
}
