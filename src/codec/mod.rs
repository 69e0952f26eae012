//! Encoding primitives shared by the order builder and the chain resolvers
//!
//! Everything in this module tree is pure: hashing, byte packing and fixed
//! protocol constants. Calldata assembly and RPC traffic live in `resolver`
//! and `chain`.

pub mod escrow;
pub mod extension;
pub mod typed_data;

use std::str::FromStr;

use ethers::types::{Address, H256, U256};
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};

use crate::error::{RelayerError, RelayerResult};

/// Relative timelock offsets for the source leg, in seconds.
pub const SRC_WITHDRAWAL_OFFSET: u32 = 5;
pub const SRC_PUBLIC_WITHDRAWAL_OFFSET: u32 = 120;
pub const SRC_CANCELLATION_OFFSET: u32 = 121;
pub const SRC_PUBLIC_CANCELLATION_OFFSET: u32 = 122;

/// Relative timelock offsets for the destination leg, in seconds.
pub const DST_WITHDRAWAL_OFFSET: u32 = 10;
pub const DST_PUBLIC_WITHDRAWAL_OFFSET: u32 = 100;
pub const DST_CANCELLATION_OFFSET: u32 = 101;

/// Placeholder taker asset used when the destination chain is not an EVM
/// chain. The real receiver travels out-of-band in the user intent.
pub const NON_EVM_SENTINEL: &str = "0x000000000000000000000000000000000000dEaD";

/// Chain id under which the Cosmos leg is registered in user intents.
pub const COSMOS_CHAIN_ID: u64 = 999;

lazy_static! {
    /// Wrapped-native tokens known to use 18 decimals. Everything else is
    /// treated as a 6-decimal stable/quote asset.
    static ref WRAPPED_NATIVE_ASSETS: Vec<Address> = vec![
        // Mainnet WETH
        Address::from_str("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").unwrap(),
        // Arbitrum WETH
        Address::from_str("0x82aF49447D8a07e3bd95BD0d56f35241523fBab1").unwrap(),
        // OP-stack canonical WETH predeploy
        Address::from_str("0x4200000000000000000000000000000000000006").unwrap(),
    ];
    static ref NON_EVM_SENTINEL_ADDR: Address = Address::from_str(NON_EVM_SENTINEL).unwrap();
}

/// Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Parses a 32-byte hashlock (or secret) from its hex representation.
/// Accepts an optional `0x` prefix; anything that is not exactly 64 hex
/// characters is rejected.
pub fn parse_hashlock(input: &str) -> RelayerResult<H256> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    if stripped.len() != 64 {
        return Err(RelayerError::Validation(format!(
            "hashlock must be 32 bytes, got {} hex chars",
            stripped.len()
        )));
    }
    let bytes = hex::decode(stripped)
        .map_err(|e| RelayerError::Validation(format!("hashlock is not valid hex: {}", e)))?;
    Ok(H256::from_slice(&bytes))
}

/// Parses a revealed secret, the 32-byte preimage of a hashlock. Same
/// wire shape as the hashlock itself, distinct error wording.
pub fn parse_secret(input: &str) -> RelayerResult<H256> {
    parse_hashlock(input)
        .map_err(|_| RelayerError::Validation("secret must be a 32-byte hex value".to_string()))
}

/// Hex form of a hashlock as the EVM side expects it.
pub fn format_hashlock(hashlock: &H256) -> String {
    format!("0x{}", hex::encode(hashlock.as_bytes()))
}

/// Checks a revealed secret against the order's hashlock.
pub fn secret_matches(secret: &H256, hashlock: &H256) -> bool {
    keccak256(secret.as_bytes()) == hashlock.to_fixed_bytes()
}

/// Decimal precision for a source asset. Selection is a fixed function of
/// the asset address so callers cannot spoof the scale of their amounts.
pub fn token_decimals(asset: &Address) -> u32 {
    if WRAPPED_NATIVE_ASSETS.contains(asset) {
        18
    } else {
        6
    }
}

/// Converts a decimal amount string into base units at the given precision.
pub fn parse_token_amount(amount: &str, decimals: u32) -> RelayerResult<U256> {
    let parsed = ethers::utils::parse_units(amount, decimals)
        .map_err(|e| RelayerError::Validation(format!("bad token amount '{}': {}", amount, e)))?;
    Ok(parsed.into())
}

/// Native safety deposit escrowed alongside the source leg, in wei.
pub fn src_safety_deposit() -> U256 {
    // 0.000001 of the native asset
    U256::exp10(12)
}

/// Safety deposit for the destination leg, in 6-decimal base units.
pub fn dst_safety_deposit() -> U256 {
    U256::one()
}

/// The seven relative timelock stages of a swap, in seconds from escrow
/// deployment. Stage ordering is enforced at construction; the packed
/// on-chain form additionally carries the deployment timestamp in the top
/// 32 bits of the word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelockSchedule {
    pub src_withdrawal: u32,
    pub src_public_withdrawal: u32,
    pub src_cancellation: u32,
    pub src_public_cancellation: u32,
    pub dst_withdrawal: u32,
    pub dst_public_withdrawal: u32,
    pub dst_cancellation: u32,
}

impl TimelockSchedule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        src_withdrawal: u32,
        src_public_withdrawal: u32,
        src_cancellation: u32,
        src_public_cancellation: u32,
        dst_withdrawal: u32,
        dst_public_withdrawal: u32,
        dst_cancellation: u32,
    ) -> RelayerResult<Self> {
        let schedule = Self {
            src_withdrawal,
            src_public_withdrawal,
            src_cancellation,
            src_public_cancellation,
            dst_withdrawal,
            dst_public_withdrawal,
            dst_cancellation,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// The fixed protocol-wide schedule. Not user-configurable.
    pub fn standard() -> Self {
        Self {
            src_withdrawal: SRC_WITHDRAWAL_OFFSET,
            src_public_withdrawal: SRC_PUBLIC_WITHDRAWAL_OFFSET,
            src_cancellation: SRC_CANCELLATION_OFFSET,
            src_public_cancellation: SRC_PUBLIC_CANCELLATION_OFFSET,
            dst_withdrawal: DST_WITHDRAWAL_OFFSET,
            dst_public_withdrawal: DST_PUBLIC_WITHDRAWAL_OFFSET,
            dst_cancellation: DST_CANCELLATION_OFFSET,
        }
    }

    fn validate(&self) -> RelayerResult<()> {
        let src_ordered = self.src_withdrawal < self.src_public_withdrawal
            && self.src_public_withdrawal < self.src_cancellation
            && self.src_cancellation < self.src_public_cancellation;
        let dst_ordered = self.dst_withdrawal < self.dst_public_withdrawal
            && self.dst_public_withdrawal < self.dst_cancellation;
        if !src_ordered || !dst_ordered {
            return Err(RelayerError::Validation(
                "timelock stages must strictly increase within each leg".to_string(),
            ));
        }
        Ok(())
    }

    /// Packs the schedule into the single 256-bit word the escrow contracts
    /// consume. Layout, low bits first, 32 bits per stage:
    /// srcWithdrawal, srcPublicWithdrawal, srcCancellation,
    /// srcPublicCancellation, dstWithdrawal, dstPublicWithdrawal,
    /// dstCancellation, deployedAt. The deployment slot is left at zero
    /// here; the factory stamps it at deployment time.
    pub fn pack(&self) -> U256 {
        let stages = [
            self.src_withdrawal,
            self.src_public_withdrawal,
            self.src_cancellation,
            self.src_public_cancellation,
            self.dst_withdrawal,
            self.dst_public_withdrawal,
            self.dst_cancellation,
        ];
        let mut word = U256::zero();
        for (i, stage) in stages.iter().enumerate() {
            word |= U256::from(*stage) << (32 * i);
        }
        word
    }

    /// Unpacks a timelocks word into its schedule and deployment timestamp.
    pub fn unpack(word: U256) -> (Self, u32) {
        let stage = |i: usize| ((word >> (32 * i)).low_u64() & 0xffff_ffff) as u32;
        let schedule = Self {
            src_withdrawal: stage(0),
            src_public_withdrawal: stage(1),
            src_cancellation: stage(2),
            src_public_cancellation: stage(3),
            dst_withdrawal: stage(4),
            dst_public_withdrawal: stage(5),
            dst_cancellation: stage(6),
        };
        (schedule, stage(7))
    }

    /// Absolute source-cancellation deadline given a deployment timestamp.
    pub fn src_cancellation_at(&self, deployed_at: u64) -> u64 {
        deployed_at + self.src_cancellation as u64
    }

    /// Absolute destination-withdrawal deadline given the source leg's
    /// deployment timestamp. This anchors the Cosmos HTLC expiry.
    pub fn dst_withdrawal_at(&self, deployed_at: u64) -> u64 {
        deployed_at + self.dst_withdrawal as u64
    }
}

/// Replaces the deployment-timestamp slot (top 32 bits) of a packed
/// timelocks word.
pub fn set_deployed_at(timelocks: U256, deployed_at: u64) -> U256 {
    let cleared = timelocks & (U256::MAX >> 32);
    cleared | (U256::from(deployed_at as u32) << 224)
}

/// Reads the deployment-timestamp slot of a packed timelocks word.
pub fn deployed_at(timelocks: U256) -> u64 {
    (timelocks >> 224).low_u64()
}

/// The reserved sentinel address for non-EVM destinations.
pub fn non_evm_sentinel() -> Address {
    *NON_EVM_SENTINEL_ADDR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_matches_ethers() {
        let data = b"hash-time-locked contract";
        assert_eq!(keccak256(data), ethers::utils::keccak256(data));
    }

    #[test]
    fn hashlock_round_trip() {
        let hex_digest = format!("0x{}", "ab".repeat(32));
        let parsed = parse_hashlock(&hex_digest).unwrap();
        assert_eq!(format_hashlock(&parsed), hex_digest);
        // Without the prefix
        let bare = "cd".repeat(32);
        let parsed = parse_hashlock(&bare).unwrap();
        assert_eq!(format_hashlock(&parsed), format!("0x{}", bare));
    }

    #[test]
    fn hashlock_rejects_bad_input() {
        assert!(matches!(
            parse_hashlock("0x1234"),
            Err(RelayerError::Validation(_))
        ));
        assert!(matches!(
            parse_hashlock(&"zz".repeat(32)),
            Err(RelayerError::Validation(_))
        ));
        assert!(parse_secret(&"ab".repeat(32)).is_ok());
        assert!(parse_secret("0xabcd").is_err());
    }

    #[test]
    fn secret_verification() {
        let secret = H256::from_slice(&[7u8; 32]);
        let hashlock = H256::from_slice(&keccak256(secret.as_bytes()));
        assert!(secret_matches(&secret, &hashlock));
        assert!(!secret_matches(&hashlock, &hashlock));
    }

    #[test]
    fn decimals_follow_asset_table() {
        let weth = Address::from_str("0x82aF49447D8a07e3bd95BD0d56f35241523fBab1").unwrap();
        assert_eq!(token_decimals(&weth), 18);
        let usdc = Address::from_str("0xaf88d065e77c8cC2239327C5EDb3A432268e5831").unwrap();
        assert_eq!(token_decimals(&usdc), 6);
    }

    #[test]
    fn amount_parsing_scales_by_decimals() {
        assert_eq!(parse_token_amount("1", 6).unwrap(), U256::from(1_000_000u64));
        assert_eq!(parse_token_amount("1", 18).unwrap(), U256::exp10(18));
        assert_eq!(
            parse_token_amount("0.5", 6).unwrap(),
            U256::from(500_000u64)
        );
        assert!(parse_token_amount("not-a-number", 6).is_err());
    }

    #[test]
    fn safety_deposits_match_protocol_constants() {
        assert_eq!(src_safety_deposit(), U256::from(1_000_000_000_000u64));
        assert_eq!(dst_safety_deposit(), U256::one());
    }

    #[test]
    fn timelocks_pack_and_unpack() {
        let schedule = TimelockSchedule::standard();
        let word = schedule.pack();
        let (decoded, deployed) = TimelockSchedule::unpack(word);
        assert_eq!(decoded, schedule);
        assert_eq!(deployed, 0);

        let stamped = set_deployed_at(word, 1_700_000_000);
        let (decoded, deployed) = TimelockSchedule::unpack(stamped);
        assert_eq!(decoded, schedule);
        assert_eq!(deployed, 1_700_000_000);
        assert_eq!(deployed_at(stamped), 1_700_000_000);
    }

    #[test]
    fn packed_layout_is_32_bits_per_stage() {
        let schedule = TimelockSchedule::standard();
        let word = schedule.pack();
        assert_eq!((word & U256::from(u32::MAX)).low_u64(), 5);
        assert_eq!(((word >> 64) & U256::from(u32::MAX)).low_u64(), 121);
        assert_eq!(((word >> 128) & U256::from(u32::MAX)).low_u64(), 10);
        assert_eq!(((word >> 192) & U256::from(u32::MAX)).low_u64(), 101);
    }

    #[test]
    fn misordered_stages_are_a_construction_error() {
        // Source public withdrawal before private withdrawal
        assert!(TimelockSchedule::new(120, 5, 121, 122, 10, 100, 101).is_err());
        // Destination cancellation before public withdrawal
        assert!(TimelockSchedule::new(5, 120, 121, 122, 10, 101, 100).is_err());
        assert!(TimelockSchedule::new(5, 120, 121, 122, 10, 100, 101).is_ok());
    }

    #[test]
    fn deadline_helpers_anchor_on_deployment() {
        let schedule = TimelockSchedule::standard();
        assert_eq!(schedule.src_cancellation_at(1_000), 1_121);
        assert_eq!(schedule.dst_withdrawal_at(1_000), 1_010);
    }
}
