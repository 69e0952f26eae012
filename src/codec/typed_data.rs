//! Structured-data hashing for limit orders
//!
//! Explicit EIP-712 encoding of the 8-field order struct under the limit
//! order protocol domain. The hash produced here is the canonical order
//! hash: it keys the store, anchors both escrow legs and is what the maker
//! signs. It is always recomputed locally, never accepted from input.

use std::collections::BTreeMap;

use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use super::keccak256;

/// Domain under which orders are signed.
pub const DOMAIN_NAME: &str = "1inch Limit Order Protocol";
pub const DOMAIN_VERSION: &str = "4";

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const ORDER_TYPE: &str = "Order(uint256 salt,address maker,address receiver,address makerAsset,address takerAsset,uint256 makingAmount,uint256 takingAmount,uint256 makerTraits)";

/// The on-chain order struct. Addresses widen to uint256 in calldata but
/// are typed as `address` in the signed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrder {
    pub salt: U256,
    pub maker: Address,
    pub receiver: Address,
    pub maker_asset: Address,
    pub taker_asset: Address,
    pub making_amount: U256,
    pub taking_amount: U256,
    pub maker_traits: U256,
}

impl LimitOrder {
    /// ABI view of the order as the fill functions take it, with the
    /// address fields widened to uint256.
    pub fn to_token(&self) -> Token {
        fn widened(address: Address) -> Token {
            Token::Uint(U256::from_big_endian(address.as_bytes()))
        }
        Token::Tuple(vec![
            Token::Uint(self.salt),
            widened(self.maker),
            widened(self.receiver),
            widened(self.maker_asset),
            widened(self.taker_asset),
            Token::Uint(self.making_amount),
            Token::Uint(self.taking_amount),
            Token::Uint(self.maker_traits),
        ])
    }
}

/// One field of an EIP-712 type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedDataField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

/// The complete payload handed to the maker's wallet for signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignablePayload {
    pub types: BTreeMap<String, Vec<TypedDataField>>,
    pub domain: TypedDataDomain,
    pub primary_type: String,
    pub message: LimitOrder,
}

fn field(name: &str, type_name: &str) -> TypedDataField {
    TypedDataField {
        name: name.to_string(),
        type_name: type_name.to_string(),
    }
}

/// Builds the wallet-facing typed-data payload for an order.
pub fn signable_payload(
    chain_id: u64,
    verifying_contract: Address,
    order: &LimitOrder,
) -> SignablePayload {
    let mut types = BTreeMap::new();
    types.insert(
        "EIP712Domain".to_string(),
        vec![
            field("name", "string"),
            field("version", "string"),
            field("chainId", "uint256"),
            field("verifyingContract", "address"),
        ],
    );
    types.insert(
        "Order".to_string(),
        vec![
            field("salt", "uint256"),
            field("maker", "address"),
            field("receiver", "address"),
            field("makerAsset", "address"),
            field("takerAsset", "address"),
            field("makingAmount", "uint256"),
            field("takingAmount", "uint256"),
            field("makerTraits", "uint256"),
        ],
    );
    SignablePayload {
        types,
        domain: TypedDataDomain {
            name: DOMAIN_NAME.to_string(),
            version: DOMAIN_VERSION.to_string(),
            chain_id,
            verifying_contract,
        },
        primary_type: "Order".to_string(),
        message: order.clone(),
    }
}

fn u256_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// keccak256 of the canonical order type string.
pub fn order_typehash() -> H256 {
    H256::from(keccak256(ORDER_TYPE.as_bytes()))
}

/// EIP-712 domain separator for a chain/contract pair.
pub fn domain_separator(chain_id: u64, verifying_contract: Address) -> H256 {
    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(&keccak256(DOMAIN_TYPE.as_bytes()));
    encoded.extend_from_slice(&keccak256(DOMAIN_NAME.as_bytes()));
    encoded.extend_from_slice(&keccak256(DOMAIN_VERSION.as_bytes()));
    encoded.extend_from_slice(&u256_word(U256::from(chain_id)));
    encoded.extend_from_slice(&address_word(verifying_contract));
    H256::from(keccak256(&encoded))
}

/// Hash of the order struct's encoded fields under its typehash.
pub fn order_struct_hash(order: &LimitOrder) -> H256 {
    let mut encoded = Vec::with_capacity(9 * 32);
    encoded.extend_from_slice(order_typehash().as_bytes());
    encoded.extend_from_slice(&u256_word(order.salt));
    encoded.extend_from_slice(&address_word(order.maker));
    encoded.extend_from_slice(&address_word(order.receiver));
    encoded.extend_from_slice(&address_word(order.maker_asset));
    encoded.extend_from_slice(&address_word(order.taker_asset));
    encoded.extend_from_slice(&u256_word(order.making_amount));
    encoded.extend_from_slice(&u256_word(order.taking_amount));
    encoded.extend_from_slice(&u256_word(order.maker_traits));
    H256::from(keccak256(&encoded))
}

/// The canonical order hash: `keccak256(0x1901 || domainSeparator || structHash)`.
pub fn order_hash(chain_id: u64, verifying_contract: Address, order: &LimitOrder) -> H256 {
    let mut preimage = Vec::with_capacity(2 + 64);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(domain_separator(chain_id, verifying_contract).as_bytes());
    preimage.extend_from_slice(order_struct_hash(order).as_bytes());
    H256::from(keccak256(&preimage))
}
