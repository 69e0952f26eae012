//! Escrow immutables and deterministic address derivation
//!
//! Each escrow is a minimal proxy deployed by the factory via CREATE2,
//! salted with the hash of its ABI-encoded immutables. Recomputing that
//! address locally is what lets the relayer validate the address an event
//! claims an escrow was deployed at.

use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use super::{keccak256, set_deployed_at};
use crate::error::{RelayerError, RelayerResult};

/// EIP-1167 minimal proxy creation code, split around the implementation
/// address it embeds.
const PROXY_CODE_PREFIX: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d,
    0x3d, 0x3d, 0x36, 0x3d, 0x73,
];
const PROXY_CODE_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// The frozen parameter set bound into an escrow at deployment. Both legs
/// of a swap share `order_hash` and `hashlock`; everything else is per leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Immutables {
    pub order_hash: H256,
    pub hashlock: H256,
    pub maker: Address,
    pub taker: Address,
    pub token: Address,
    pub amount: U256,
    pub safety_deposit: U256,
    pub timelocks: U256,
}

fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn u256_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

impl Immutables {
    /// ABI encoding of the immutables tuple: eight 32-byte words in field
    /// order, addresses right-aligned.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 * 32);
        out.extend_from_slice(self.order_hash.as_bytes());
        out.extend_from_slice(self.hashlock.as_bytes());
        out.extend_from_slice(&address_word(self.maker));
        out.extend_from_slice(&address_word(self.taker));
        out.extend_from_slice(&address_word(self.token));
        out.extend_from_slice(&u256_word(self.amount));
        out.extend_from_slice(&u256_word(self.safety_deposit));
        out.extend_from_slice(&u256_word(self.timelocks));
        out
    }

    /// keccak256 of the encoded tuple; the factory uses this as the
    /// CREATE2 salt.
    pub fn hash(&self) -> H256 {
        H256::from(keccak256(&self.encode()))
    }

    /// Decodes the tuple from event data. The `SrcEscrowCreated` event
    /// carries it as its only (non-indexed) argument.
    pub fn decode(data: &[u8]) -> RelayerResult<Self> {
        if data.len() != 8 * 32 {
            return Err(RelayerError::Codec(format!(
                "immutables tuple must be 256 bytes, got {}",
                data.len()
            )));
        }
        let address_at = |i: usize| Address::from_slice(&data[32 * i + 12..32 * (i + 1)]);
        let word_at = |i: usize| U256::from_big_endian(&data[32 * i..32 * (i + 1)]);
        Ok(Self {
            order_hash: H256::from_slice(&data[0..32]),
            hashlock: H256::from_slice(&data[32..64]),
            maker: address_at(2),
            taker: address_at(3),
            token: address_at(4),
            amount: word_at(5),
            safety_deposit: word_at(6),
            timelocks: word_at(7),
        })
    }

    /// Copy of these immutables with the deployment timestamp stamped
    /// into the timelocks word, as the factory does on-chain.
    pub fn with_deployed_at(&self, deployed_at: u64) -> Self {
        let mut stamped = self.clone();
        stamped.timelocks = set_deployed_at(self.timelocks, deployed_at);
        stamped
    }

    /// ABI token for embedding the tuple in calldata. Addresses widen to
    /// uint256, matching the resolver contract's signature.
    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::FixedBytes(self.order_hash.as_bytes().to_vec()),
            Token::FixedBytes(self.hashlock.as_bytes().to_vec()),
            Token::Uint(U256::from_big_endian(&address_word(self.maker))),
            Token::Uint(U256::from_big_endian(&address_word(self.taker))),
            Token::Uint(U256::from_big_endian(&address_word(self.token))),
            Token::Uint(self.amount),
            Token::Uint(self.safety_deposit),
            Token::Uint(self.timelocks),
        ])
    }
}

/// Hash of the minimal-proxy creation code for a given escrow
/// implementation.
pub fn proxy_init_code_hash(implementation: Address) -> H256 {
    let mut code = Vec::with_capacity(20 + 20 + 15);
    code.extend_from_slice(&PROXY_CODE_PREFIX);
    code.extend_from_slice(implementation.as_bytes());
    code.extend_from_slice(&PROXY_CODE_SUFFIX);
    H256::from(keccak256(&code))
}

/// CREATE2 address of an escrow: `keccak256(0xff || factory || salt ||
/// initCodeHash)[12..]`, salted with the immutables hash.
pub fn escrow_address(factory: Address, immutables_hash: H256, init_code_hash: H256) -> Address {
    let mut preimage = Vec::with_capacity(1 + 20 + 32 + 32);
    preimage.push(0xff);
    preimage.extend_from_slice(factory.as_bytes());
    preimage.extend_from_slice(immutables_hash.as_bytes());
    preimage.extend_from_slice(init_code_hash.as_bytes());
    Address::from_slice(&keccak256(&preimage)[12..])
}
