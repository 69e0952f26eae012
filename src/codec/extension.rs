//! Order extension encoding
//!
//! A limit order that settles through the escrow factory carries an
//! extension blob: a 32-byte offsets word followed by eight concatenated
//! variable-length fields. The factory reads its auction parameters from
//! the amount-data fields and its whitelist plus cross-chain arguments
//! from the post-interaction field. The order salt commits to the blob so
//! the extension cannot be swapped out after signing.

use ethers::types::{Address, Bytes, H256, U256};

use super::keccak256;
use crate::error::{RelayerError, RelayerResult};

/// Number of extension fields addressed by the offsets word.
const EXTENSION_FIELDS: usize = 8;

/// Field indexes within the extension.
const MAKING_AMOUNT_DATA: usize = 2;
const TAKING_AMOUNT_DATA: usize = 3;
const POST_INTERACTION: usize = 7;

/// Dutch-auction parameters embedded in the amount-data fields.
///
/// Byte layout: gasBumpEstimate u24, gasPriceEstimate u32, startTime u32,
/// duration u24, initialRateBump u24, then one (rateBump u24, delay u16)
/// pair per point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionDetails {
    pub start_time: u64,
    pub duration: u32,
    pub initial_rate_bump: u32,
    pub points: Vec<AuctionPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuctionPoint {
    pub rate_bump: u32,
    pub delay: u16,
}

impl AuctionDetails {
    /// Flat 120-second auction starting now with no rate bump, the fixed
    /// shape every swap order uses.
    pub fn flat(start_time: u64) -> Self {
        Self {
            start_time,
            duration: 120,
            initial_rate_bump: 0,
            points: Vec::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17 + self.points.len() * 5);
        out.extend_from_slice(&[0u8; 3]); // gasBumpEstimate
        out.extend_from_slice(&[0u8; 4]); // gasPriceEstimate
        out.extend_from_slice(&(self.start_time as u32).to_be_bytes());
        out.extend_from_slice(&self.duration.to_be_bytes()[1..]); // u24
        out.extend_from_slice(&self.initial_rate_bump.to_be_bytes()[1..]); // u24
        for point in &self.points {
            out.extend_from_slice(&point.rate_bump.to_be_bytes()[1..]);
            out.extend_from_slice(&point.delay.to_be_bytes());
        }
        out
    }
}

/// One whitelisted resolver: the low 10 bytes of its address plus the
/// delay (seconds after `resolving_start_time`) from which it may fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub address: Address,
    pub allow_from: u32,
}

/// Encodes the resolver whitelist consumed by the post-interaction hook.
///
/// Byte layout: resolvingStartTime u32, then per entry the address's low
/// 10 bytes and a u16 delay relative to the start time, then a trailing
/// entry-count byte.
pub fn encode_whitelist(resolving_start_time: u32, entries: &[WhitelistEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + entries.len() * 12 + 1);
    out.extend_from_slice(&resolving_start_time.to_be_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.address.as_bytes()[10..]);
        let delta = entry.allow_from.saturating_sub(resolving_start_time) as u16;
        out.extend_from_slice(&delta.to_be_bytes());
    }
    out.push(entries.len() as u8);
    out
}

/// Cross-chain arguments appended to the post-interaction field, five
/// words: hashlock, destination chain id, destination token, packed
/// safety deposits (source in the high 128 bits), timelocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainArgs {
    pub hashlock: H256,
    pub dst_chain_id: u64,
    pub dst_token: Address,
    pub src_safety_deposit: U256,
    pub dst_safety_deposit: U256,
    pub timelocks: U256,
}

impl CrossChainArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 * 32);
        out.extend_from_slice(self.hashlock.as_bytes());
        out.extend_from_slice(&word(U256::from(self.dst_chain_id)));
        let mut token_word = [0u8; 32];
        token_word[12..].copy_from_slice(self.dst_token.as_bytes());
        out.extend_from_slice(&token_word);
        let deposits = (self.src_safety_deposit << 128) | self.dst_safety_deposit;
        out.extend_from_slice(&word(deposits));
        out.extend_from_slice(&word(self.timelocks));
        out
    }
}

fn word(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

/// Assembles the full extension for an escrow-settled order: the factory
/// address prefixes the auction data in both amount fields and the
/// whitelist plus cross-chain arguments in the post-interaction field.
pub fn build_escrow_extension(
    escrow_factory: Address,
    auction: &AuctionDetails,
    resolving_start_time: u32,
    whitelist: &[WhitelistEntry],
    args: &CrossChainArgs,
) -> Bytes {
    let auction_bytes = auction.encode();

    let mut amount_data = Vec::with_capacity(20 + auction_bytes.len());
    amount_data.extend_from_slice(escrow_factory.as_bytes());
    amount_data.extend_from_slice(&auction_bytes);

    let mut post_interaction = Vec::new();
    post_interaction.extend_from_slice(escrow_factory.as_bytes());
    post_interaction.extend_from_slice(&encode_whitelist(resolving_start_time, whitelist));
    post_interaction.extend_from_slice(&args.encode());

    let mut fields: [Vec<u8>; EXTENSION_FIELDS] = Default::default();
    fields[MAKING_AMOUNT_DATA] = amount_data.clone();
    fields[TAKING_AMOUNT_DATA] = amount_data;
    fields[POST_INTERACTION] = post_interaction;
    encode_extension(&fields)
}

/// Concatenates extension fields behind their offsets word. Offsets are
/// cumulative end positions, 32 bits per field, field 0 in the lowest
/// bits. An extension with no fields encodes to empty bytes.
pub fn encode_extension(fields: &[Vec<u8>; EXTENSION_FIELDS]) -> Bytes {
    if fields.iter().all(|f| f.is_empty()) {
        return Bytes::new();
    }
    let mut offsets = U256::zero();
    let mut cumulative = 0u32;
    for (i, field) in fields.iter().enumerate() {
        cumulative += field.len() as u32;
        offsets |= U256::from(cumulative) << (32 * i);
    }
    let mut out = Vec::with_capacity(32 + cumulative as usize);
    out.extend_from_slice(&word(offsets));
    for field in fields {
        out.extend_from_slice(field);
    }
    Bytes::from(out)
}

/// Builds the order salt: the caller's random component in the high 96
/// bits, the low 160 bits committing to `keccak256(extension)`.
pub fn salt_with_extension(base_salt: u64, extension: &Bytes) -> U256 {
    let commitment = U256::from_big_endian(&keccak256(extension)) & (U256::MAX >> 96);
    (U256::from(base_salt) << 160) | commitment
}

/// Maker traits flag bits.
const NO_PARTIAL_FILLS_BIT: usize = 255;
const ALLOW_MULTIPLE_FILLS_BIT: usize = 254;
const POST_INTERACTION_CALL_BIT: usize = 251;
const HAS_EXTENSION_BIT: usize = 249;
const NONCE_SHIFT: usize = 120;
const NONCE_MASK: u64 = (1 << 40) - 1;

/// Packs the maker traits word: fill-mode flags at the top, a 40-bit
/// nonce at bit 120.
pub fn maker_traits(
    nonce: u64,
    allow_partial_fills: bool,
    allow_multiple_fills: bool,
    has_extension: bool,
    post_interaction: bool,
) -> U256 {
    let mut traits = U256::from(nonce & NONCE_MASK) << NONCE_SHIFT;
    if !allow_partial_fills {
        traits |= U256::one() << NO_PARTIAL_FILLS_BIT;
    }
    if allow_multiple_fills {
        traits |= U256::one() << ALLOW_MULTIPLE_FILLS_BIT;
    }
    if has_extension {
        traits |= U256::one() << HAS_EXTENSION_BIT;
    }
    if post_interaction {
        traits |= U256::one() << POST_INTERACTION_CALL_BIT;
    }
    traits
}

/// Taker traits flag bits.
const MAKER_AMOUNT_MODE_BIT: usize = 255;
const EXTENSION_LENGTH_SHIFT: usize = 224;
const EXTENSION_LENGTH_LIMIT: usize = (1 << 24) - 1;

/// Packs the taker traits word for a fill in maker-amount mode with the
/// given receive threshold, and returns the args blob (the extension) the
/// fill call must carry alongside it.
pub fn taker_traits(threshold: U256, extension: &Bytes) -> RelayerResult<(U256, Bytes)> {
    if extension.len() > EXTENSION_LENGTH_LIMIT {
        return Err(RelayerError::Codec(format!(
            "extension too large: {} bytes",
            extension.len()
        )));
    }
    let mut traits = U256::one() << MAKER_AMOUNT_MODE_BIT;
    traits |= U256::from(extension.len()) << EXTENSION_LENGTH_SHIFT;
    traits |= threshold;
    Ok((traits, extension.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn factory() -> Address {
        Address::from_str("0x3333333333333333333333333333333333333333").unwrap()
    }

    fn sample_args() -> CrossChainArgs {
        CrossChainArgs {
            hashlock: H256::repeat_byte(0xab),
            dst_chain_id: 999,
            dst_token: Address::from_str("0x000000000000000000000000000000000000dEaD").unwrap(),
            src_safety_deposit: U256::exp10(12),
            dst_safety_deposit: U256::one(),
            timelocks: crate::codec::TimelockSchedule::standard().pack(),
        }
    }

    #[test]
    fn auction_base_encoding_is_17_bytes() {
        let auction = AuctionDetails::flat(1_700_000_000);
        let encoded = auction.encode();
        assert_eq!(encoded.len(), 17);
        // startTime sits after the two gas estimate fields
        assert_eq!(&encoded[7..11], &1_700_000_000u32.to_be_bytes());
        // duration u24
        assert_eq!(&encoded[11..14], &[0, 0, 120]);
    }

    #[test]
    fn auction_points_add_five_bytes_each() {
        let mut auction = AuctionDetails::flat(0);
        auction.points.push(AuctionPoint {
            rate_bump: 50_000,
            delay: 60,
        });
        assert_eq!(auction.encode().len(), 22);
    }

    #[test]
    fn whitelist_carries_address_tail_and_count() {
        let resolver = Address::from_str("0x4444444444444444444444444444444444444444").unwrap();
        let encoded = encode_whitelist(
            0,
            &[WhitelistEntry {
                address: resolver,
                allow_from: 0,
            }],
        );
        assert_eq!(encoded.len(), 4 + 12 + 1);
        assert_eq!(&encoded[4..14], &resolver.as_bytes()[10..]);
        assert_eq!(encoded[encoded.len() - 1], 1);
    }

    #[test]
    fn cross_chain_args_encode_to_five_words() {
        let encoded = sample_args().encode();
        assert_eq!(encoded.len(), 160);
        // deposits word: src in the high 128 bits, dst in the low
        let deposits = U256::from_big_endian(&encoded[96..128]);
        assert_eq!(deposits >> 128, U256::exp10(12));
        assert_eq!(deposits & (U256::MAX >> 128), U256::one());
    }

    #[test]
    fn offsets_word_tracks_cumulative_ends() {
        let extension = build_escrow_extension(
            factory(),
            &AuctionDetails::flat(1_700_000_000),
            0,
            &[WhitelistEntry {
                address: factory(),
                allow_from: 0,
            }],
            &sample_args(),
        );
        let offsets = U256::from_big_endian(&extension[..32]);
        let end = |i: usize| ((offsets >> (32 * i)).low_u64() & 0xffff_ffff) as usize;

        let amount_data_len = 20 + 17;
        let post_interaction_len = 20 + (4 + 12 + 1) + 160;
        assert_eq!(end(0), 0);
        assert_eq!(end(1), 0);
        assert_eq!(end(2), amount_data_len);
        assert_eq!(end(3), 2 * amount_data_len);
        assert_eq!(end(6), 2 * amount_data_len);
        assert_eq!(end(7), 2 * amount_data_len + post_interaction_len);
        assert_eq!(extension.len(), 32 + end(7));
    }

    #[test]
    fn empty_extension_is_empty_bytes() {
        let fields: [Vec<u8>; EXTENSION_FIELDS] = Default::default();
        assert!(encode_extension(&fields).is_empty());
    }

    #[test]
    fn salt_commits_to_extension() {
        let extension = Bytes::from(vec![1u8, 2, 3]);
        let salt = salt_with_extension(7, &extension);
        let commitment = U256::from_big_endian(&keccak256(&extension)) & (U256::MAX >> 96);
        assert_eq!(salt & (U256::MAX >> 96), commitment);
        assert_eq!(salt >> 160, U256::from(7u64));

        let other = Bytes::from(vec![1u8, 2, 4]);
        assert_ne!(
            salt_with_extension(7, &other) & (U256::MAX >> 96),
            commitment
        );
    }

    #[test]
    fn maker_traits_bit_positions() {
        let traits = maker_traits(0xdead, false, false, true, true);
        assert_eq!(traits.bit(255), true);
        assert_eq!(traits.bit(254), false);
        assert_eq!(traits.bit(251), true);
        assert_eq!(traits.bit(249), true);
        assert_eq!((traits >> 120).low_u64() & NONCE_MASK, 0xdead);

        let partial = maker_traits(0, true, true, false, false);
        assert_eq!(partial.bit(255), false);
        assert_eq!(partial.bit(254), true);
        assert_eq!(partial.bit(249), false);
    }

    #[test]
    fn taker_traits_embed_extension_length_and_threshold() {
        let extension = Bytes::from(vec![0u8; 300]);
        let threshold = U256::from(1_000_000u64);
        let (traits, args) = taker_traits(threshold, &extension).unwrap();
        assert_eq!(traits.bit(255), true);
        assert_eq!(((traits >> 224).low_u64() & 0xff_ffff) as usize, 300);
        assert_eq!(traits & (U256::MAX >> 128), threshold);
        assert_eq!(args, extension);
    }

    #[test]
    fn nonce_is_truncated_to_40_bits() {
        let traits = maker_traits(u64::MAX, true, false, false, false);
        assert_eq!((traits >> 120).low_u64(), NONCE_MASK);
    }
}
