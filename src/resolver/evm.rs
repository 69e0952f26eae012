//! EVM resolver contract driver
//!
//! Encodes the resolver contract's deploySrc/deployDst/withdraw calls,
//! submits them through the chain client and recovers escrow addresses
//! from the factory's deployment events. The source escrow address is
//! never taken from the log alone: the deterministic address is
//! recomputed from the immutables this side expected and compared with
//! the one the event implies, and a mismatch fails the deployment.

use ethers::abi::{self, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Signature, TransactionRequest, H256, U256};
use lazy_static::lazy_static;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::EvmProvider;
use crate::codec::escrow::{escrow_address, proxy_init_code_hash, Immutables};
use crate::codec::extension::taker_traits;
use crate::codec::typed_data::LimitOrder;
use crate::codec::{keccak256, src_safety_deposit};
use crate::error::{RelayerError, RelayerResult};

const DEPLOY_SRC_SIG: &str = "deploySrc((bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256),(uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256),bytes32,bytes32,uint256,uint256,bytes)";
const DEPLOY_DST_SIG: &str = "deployDst(address[],bytes[],(bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256),uint256)";
const WITHDRAW_SIG: &str = "withdraw(address,bytes32,(bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256),address[],bytes[])";
const SRC_IMPLEMENTATION_SIG: &str = "ESCROW_SRC_IMPLEMENTATION()";

const SRC_ESCROW_CREATED_SIG: &str =
    "SrcEscrowCreated((bytes32,bytes32,uint256,uint256,uint256,uint256,uint256,uint256))";
const DST_ESCROW_CREATED_SIG: &str = "DstEscrowCreated(address)";

lazy_static! {
    static ref DEPLOY_SRC_SELECTOR: [u8; 4] = selector(DEPLOY_SRC_SIG);
    static ref DEPLOY_DST_SELECTOR: [u8; 4] = selector(DEPLOY_DST_SIG);
    static ref WITHDRAW_SELECTOR: [u8; 4] = selector(WITHDRAW_SIG);
    static ref SRC_IMPLEMENTATION_SELECTOR: [u8; 4] = selector(SRC_IMPLEMENTATION_SIG);
    static ref SRC_ESCROW_CREATED_TOPIC: H256 =
        H256::from(keccak256(SRC_ESCROW_CREATED_SIG.as_bytes()));
    static ref DST_ESCROW_CREATED_TOPIC: H256 =
        H256::from(keccak256(DST_ESCROW_CREATED_SIG.as_bytes()));
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn calldata(selector: [u8; 4], tokens: &[Token]) -> Bytes {
    let mut data = selector.to_vec();
    data.extend_from_slice(&abi::encode(tokens));
    Bytes::from(data)
}

/// Splits a 65-byte signature into its EIP-2098 compact form, with the
/// parity bit folded into the top bit of `vs`.
fn compact_signature(signature: &Signature) -> RelayerResult<(H256, H256)> {
    let odd_parity = match signature.v {
        0 | 27 => false,
        1 | 28 => true,
        v => {
            return Err(RelayerError::Validation(format!(
                "unsupported signature recovery id: {}",
                v
            )))
        }
    };
    let mut r = [0u8; 32];
    signature.r.to_big_endian(&mut r);
    let mut vs = [0u8; 32];
    signature.s.to_big_endian(&mut vs);
    if odd_parity {
        vs[0] |= 0x80;
    }
    Ok((H256(r), H256(vs)))
}

/// Outcome of a source escrow deployment. `immutables` carries the
/// deployment timestamp stamped into its timelocks word, exactly as the
/// escrow contract stores it.
#[derive(Debug, Clone)]
pub struct SrcDeployment {
    pub tx_hash: H256,
    pub escrow: Address,
    pub immutables: Immutables,
    pub deployed_at: u64,
}

/// Outcome of a destination escrow deployment.
#[derive(Debug, Clone)]
pub struct DstDeployment {
    pub tx_hash: H256,
    pub escrow: Address,
    pub deployed_at: u64,
}

pub struct EvmResolver {
    client: Arc<dyn EvmProvider>,
    chain_id: u64,
    resolver: Address,
    escrow_factory: Address,
    limit_order: Address,
    gas_limit_override: Option<u64>,
}

impl EvmResolver {
    pub fn new(
        client: Arc<dyn EvmProvider>,
        chain_id: u64,
        resolver: Address,
        escrow_factory: Address,
        limit_order: Address,
        gas_limit_override: Option<u64>,
    ) -> Self {
        info!(
            "EVM resolver ready: chain {} resolver {:?} factory {:?}",
            chain_id, resolver, escrow_factory
        );
        Self {
            client,
            chain_id,
            resolver,
            escrow_factory,
            limit_order,
            gas_limit_override,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address of the on-chain resolver contract. It is the taker of
    /// every escrow this service deploys.
    pub fn resolver_address(&self) -> Address {
        self.resolver
    }

    pub fn escrow_factory(&self) -> Address {
        self.escrow_factory
    }

    pub fn limit_order(&self) -> Address {
        self.limit_order
    }

    fn transaction(&self, data: Bytes, value: U256) -> TypedTransaction {
        let mut tx = TransactionRequest::new()
            .to(self.resolver)
            .data(data)
            .value(value);
        if let Some(gas) = self.gas_limit_override {
            tx = tx.gas(gas);
        }
        tx.into()
    }

    /// Fills the signed order through the resolver contract, deploying
    /// the source escrow. The native safety deposit rides along as call
    /// value. Returns the reconciled escrow address and the immutables
    /// as deployed.
    pub async fn deploy_src(
        &self,
        order: &LimitOrder,
        extension: &Bytes,
        signature: &Signature,
        immutables: &Immutables,
    ) -> RelayerResult<SrcDeployment> {
        let (r, vs) = compact_signature(signature)?;
        let (traits, args) = taker_traits(order.taking_amount, extension)?;
        let data = calldata(
            *DEPLOY_SRC_SELECTOR,
            &[
                immutables.to_token(),
                order.to_token(),
                Token::FixedBytes(r.as_bytes().to_vec()),
                Token::FixedBytes(vs.as_bytes().to_vec()),
                Token::Uint(order.making_amount),
                Token::Uint(traits),
                Token::Bytes(args.to_vec()),
            ],
        );
        debug!(
            "deploying source escrow for order {:?}",
            immutables.order_hash
        );
        let tx = self.transaction(data, src_safety_deposit());
        let outcome = self.client.submit(tx).await?;

        let deployed = immutables.with_deployed_at(outcome.block_timestamp);
        let escrow = self
            .reconcile_src_escrow(outcome.block_hash, &deployed)
            .await?;
        info!(
            "source escrow deployed at {:?} in tx {:?}",
            escrow, outcome.tx_hash
        );
        Ok(SrcDeployment {
            tx_hash: outcome.tx_hash,
            escrow,
            immutables: deployed,
            deployed_at: outcome.block_timestamp,
        })
    }

    /// Deploys the destination escrow with the safety deposit as call
    /// value. The factory reverts past `src_cancellation_at`, so a
    /// destination leg can never outlive its source leg's cancellation
    /// window.
    pub async fn deploy_dst(
        &self,
        immutables: &Immutables,
        src_cancellation_at: u64,
    ) -> RelayerResult<DstDeployment> {
        let data = calldata(
            *DEPLOY_DST_SELECTOR,
            &[
                Token::Array(Vec::new()),
                Token::Array(Vec::new()),
                immutables.to_token(),
                Token::Uint(U256::from(src_cancellation_at)),
            ],
        );
        debug!(
            "deploying destination escrow for order {:?}",
            immutables.order_hash
        );
        let tx = self.transaction(data, immutables.safety_deposit);
        let outcome = self.client.submit(tx).await?;
        let escrow = self.dst_escrow_from_events(outcome.block_hash).await?;
        info!(
            "destination escrow deployed at {:?} in tx {:?}",
            escrow, outcome.tx_hash
        );
        Ok(DstDeployment {
            tx_hash: outcome.tx_hash,
            escrow,
            deployed_at: outcome.block_timestamp,
        })
    }

    /// Withdraws from an escrow by revealing the secret. Works for both
    /// legs; the immutables must be the ones the escrow was deployed
    /// with, deployment timestamp included.
    pub async fn withdraw(
        &self,
        escrow: Address,
        secret: H256,
        immutables: &Immutables,
    ) -> RelayerResult<H256> {
        let data = calldata(
            *WITHDRAW_SELECTOR,
            &[
                Token::Address(escrow),
                Token::FixedBytes(secret.as_bytes().to_vec()),
                immutables.to_token(),
                Token::Array(Vec::new()),
                Token::Array(Vec::new()),
            ],
        );
        let tx = self.transaction(data, U256::zero());
        let outcome = self.client.submit(tx).await?;
        info!(
            "withdrew escrow {:?} in tx {:?}",
            escrow, outcome.tx_hash
        );
        Ok(outcome.tx_hash)
    }

    /// Source escrow implementation address, read from the factory.
    pub async fn source_implementation(&self) -> RelayerResult<Address> {
        let raw = self
            .client
            .call(
                self.escrow_factory,
                Bytes::from(SRC_IMPLEMENTATION_SELECTOR.to_vec()),
            )
            .await?;
        if raw.len() < 32 {
            return Err(RelayerError::Codec(format!(
                "implementation accessor returned {} bytes, want 32",
                raw.len()
            )));
        }
        Ok(Address::from_slice(&raw[12..32]))
    }

    /// Reads the factory's SrcEscrowCreated event from the deployment
    /// block and cross-checks the escrow address it implies against the
    /// one derived from the locally expected immutables.
    async fn reconcile_src_escrow(
        &self,
        block_hash: H256,
        expected: &Immutables,
    ) -> RelayerResult<Address> {
        let logs = self
            .client
            .logs_in_block(block_hash, self.escrow_factory, *SRC_ESCROW_CREATED_TOPIC)
            .await?;
        let log = logs.first().ok_or_else(|| RelayerError::ProtocolViolation {
            order_hash: format!("{:?}", expected.order_hash),
            message: "no SrcEscrowCreated event in the deployment block".to_string(),
        })?;
        let reported = Immutables::decode(&log.data)?;

        let init_code_hash = proxy_init_code_hash(self.source_implementation().await?);
        let reported_escrow = escrow_address(self.escrow_factory, reported.hash(), init_code_hash);
        let expected_escrow = escrow_address(self.escrow_factory, expected.hash(), init_code_hash);
        if reported_escrow != expected_escrow {
            warn!(
                "escrow address mismatch for order {:?}: event implies {:?}, expected {:?}",
                expected.order_hash, reported_escrow, expected_escrow
            );
            return Err(RelayerError::ProtocolViolation {
                order_hash: format!("{:?}", expected.order_hash),
                message: format!(
                    "source escrow address mismatch: event implies {:?}, expected {:?}",
                    reported_escrow, expected_escrow
                ),
            });
        }
        Ok(expected_escrow)
    }

    async fn dst_escrow_from_events(&self, block_hash: H256) -> RelayerResult<Address> {
        let logs = self
            .client
            .logs_in_block(block_hash, self.escrow_factory, *DST_ESCROW_CREATED_TOPIC)
            .await?;
        let log = logs.first().ok_or_else(|| RelayerError::ProtocolViolation {
            order_hash: String::new(),
            message: "no DstEscrowCreated event in the deployment block".to_string(),
        })?;
        if log.data.len() != 32 {
            return Err(RelayerError::Codec(format!(
                "DstEscrowCreated data must be one word, got {} bytes",
                log.data.len()
            )));
        }
        Ok(Address::from_slice(&log.data[12..32]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::evm::{MockEvmProvider, TxOutcome};
    use crate::codec::TimelockSchedule;
    use ethers::types::Log;

    fn sample_immutables() -> Immutables {
        Immutables {
            order_hash: H256::repeat_byte(0xaa),
            hashlock: H256::repeat_byte(0xbb),
            maker: Address::repeat_byte(0x11),
            taker: Address::repeat_byte(0x22),
            token: Address::repeat_byte(0x33),
            amount: U256::from(1_000_000u64),
            safety_deposit: U256::from(1u64),
            timelocks: TimelockSchedule::standard().pack(),
        }
    }

    fn sample_order() -> LimitOrder {
        LimitOrder {
            salt: U256::from(7u64),
            maker: Address::repeat_byte(0x11),
            receiver: Address::repeat_byte(0x22),
            maker_asset: Address::repeat_byte(0x33),
            taker_asset: Address::repeat_byte(0x44),
            making_amount: U256::from(1_000_000u64),
            taking_amount: U256::from(1_000_000u64),
            maker_traits: U256::zero(),
        }
    }

    fn sample_signature() -> Signature {
        Signature {
            r: U256::from(3u64),
            s: U256::from(4u64),
            v: 27,
        }
    }

    fn outcome(ts: u64) -> TxOutcome {
        TxOutcome {
            tx_hash: H256::repeat_byte(0x77),
            block_hash: H256::repeat_byte(0x88),
            block_timestamp: ts,
        }
    }

    fn implementation_word(implementation: Address) -> Bytes {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(implementation.as_bytes());
        Bytes::from(word.to_vec())
    }

    fn event_log(data: Vec<u8>) -> Log {
        Log {
            data: Bytes::from(data),
            ..Default::default()
        }
    }

    fn resolver_with(client: MockEvmProvider) -> EvmResolver {
        EvmResolver::new(
            Arc::new(client),
            42161,
            Address::repeat_byte(0x22),
            Address::repeat_byte(0x55),
            Address::repeat_byte(0x66),
            None,
        )
    }

    #[test]
    fn compact_signature_folds_parity_into_vs() {
        let (r, vs) = compact_signature(&sample_signature()).unwrap();
        assert_eq!(U256::from_big_endian(r.as_bytes()), U256::from(3u64));
        assert_eq!(vs[0] & 0x80, 0);

        let odd = Signature {
            v: 28,
            ..sample_signature()
        };
        let (_, vs) = compact_signature(&odd).unwrap();
        assert_eq!(vs[0] & 0x80, 0x80);
        assert_eq!(
            U256::from_big_endian(&vs[..]) & (U256::MAX >> 1),
            U256::from(4u64)
        );

        let bad = Signature {
            v: 5,
            ..sample_signature()
        };
        assert!(matches!(
            compact_signature(&bad),
            Err(RelayerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn deploy_src_reconciles_event_against_expected_address() {
        let immutables = sample_immutables();
        let deployed_at = 1_700_000_000u64;
        let event_data = immutables.with_deployed_at(deployed_at).encode();
        let implementation = Address::repeat_byte(0x99);

        let mut client = MockEvmProvider::new();
        client
            .expect_submit()
            .times(1)
            .withf(|tx| {
                let data = tx.data().cloned().unwrap_or_default();
                data.len() > 4
                    && data[..4] == *DEPLOY_SRC_SELECTOR
                    && tx.value() == Some(&src_safety_deposit())
            })
            .returning(move |_| Ok(outcome(deployed_at)));
        client
            .expect_logs_in_block()
            .times(1)
            .returning(move |_, _, _| Ok(vec![event_log(event_data.clone())]));
        client
            .expect_call()
            .times(1)
            .returning(move |_, _| Ok(implementation_word(implementation)));

        let resolver = resolver_with(client);
        let result = resolver
            .deploy_src(
                &sample_order(),
                &Bytes::new(),
                &sample_signature(),
                &immutables,
            )
            .await
            .unwrap();

        let expected = escrow_address(
            resolver.escrow_factory(),
            immutables.with_deployed_at(deployed_at).hash(),
            proxy_init_code_hash(implementation),
        );
        assert_eq!(result.escrow, expected);
        assert_eq!(result.deployed_at, deployed_at);
        assert_eq!(
            crate::codec::deployed_at(result.immutables.timelocks),
            deployed_at
        );
    }

    #[tokio::test]
    async fn deploy_src_fails_when_the_event_is_missing() {
        let mut client = MockEvmProvider::new();
        client
            .expect_submit()
            .returning(|_| Ok(outcome(1_700_000_000)));
        client
            .expect_logs_in_block()
            .returning(|_, _, _| Ok(Vec::new()));

        let resolver = resolver_with(client);
        let err = resolver
            .deploy_src(
                &sample_order(),
                &Bytes::new(),
                &sample_signature(),
                &sample_immutables(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn deploy_src_fails_when_the_event_disagrees() {
        let immutables = sample_immutables();
        let deployed_at = 1_700_000_000u64;
        let mut tampered = immutables.with_deployed_at(deployed_at);
        tampered.amount += U256::one();
        let event_data = tampered.encode();

        let mut client = MockEvmProvider::new();
        client
            .expect_submit()
            .returning(move |_| Ok(outcome(deployed_at)));
        client
            .expect_logs_in_block()
            .returning(move |_, _, _| Ok(vec![event_log(event_data.clone())]));
        client
            .expect_call()
            .returning(|_, _| Ok(implementation_word(Address::repeat_byte(0x99))));

        let resolver = resolver_with(client);
        let err = resolver
            .deploy_src(
                &sample_order(),
                &Bytes::new(),
                &sample_signature(),
                &immutables,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn deploy_dst_reads_the_escrow_address_from_the_event() {
        let immutables = sample_immutables();
        let escrow = Address::repeat_byte(0xcd);
        let mut data = [0u8; 32];
        data[12..].copy_from_slice(escrow.as_bytes());

        let mut client = MockEvmProvider::new();
        client
            .expect_submit()
            .times(1)
            .withf(move |tx| {
                let calldata = tx.data().cloned().unwrap_or_default();
                calldata.len() > 4
                    && calldata[..4] == *DEPLOY_DST_SELECTOR
                    && tx.value() == Some(&U256::from(1u64))
            })
            .returning(|_| Ok(outcome(1_700_000_100)));
        client
            .expect_logs_in_block()
            .times(1)
            .returning(move |_, _, _| Ok(vec![event_log(data.to_vec())]));

        let resolver = resolver_with(client);
        let result = resolver
            .deploy_dst(&immutables, 1_700_000_600)
            .await
            .unwrap();
        assert_eq!(result.escrow, escrow);
        assert_eq!(result.deployed_at, 1_700_000_100);
    }

    #[tokio::test]
    async fn withdraw_submits_without_value() {
        let mut client = MockEvmProvider::new();
        client
            .expect_submit()
            .times(1)
            .withf(|tx| {
                let data = tx.data().cloned().unwrap_or_default();
                data.len() > 4
                    && data[..4] == *WITHDRAW_SELECTOR
                    && tx.value() == Some(&U256::zero())
            })
            .returning(|_| Ok(outcome(1_700_000_200)));

        let resolver = resolver_with(client);
        let tx_hash = resolver
            .withdraw(
                Address::repeat_byte(0xcd),
                H256::repeat_byte(0x5e),
                &sample_immutables(),
            )
            .await
            .unwrap();
        assert_eq!(tx_hash, H256::repeat_byte(0x77));
    }

    #[test]
    fn selectors_and_topics_derive_from_canonical_signatures() {
        assert_eq!(
            *SRC_ESCROW_CREATED_TOPIC,
            H256::from(ethers::utils::keccak256(SRC_ESCROW_CREATED_SIG.as_bytes()))
        );
        assert_eq!(
            *DST_ESCROW_CREATED_TOPIC,
            H256::from(ethers::utils::keccak256(DST_ESCROW_CREATED_SIG.as_bytes()))
        );
        assert_eq!(
            *DEPLOY_SRC_SELECTOR,
            ethers::utils::keccak256(DEPLOY_SRC_SIG.as_bytes())[..4]
        );
    }

    #[test]
    fn gas_override_is_applied_to_the_request() {
        let resolver = EvmResolver::new(
            Arc::new(MockEvmProvider::new()),
            42161,
            Address::repeat_byte(0x22),
            Address::repeat_byte(0x55),
            Address::repeat_byte(0x66),
            Some(4_000_000),
        );
        let tx = resolver.transaction(Bytes::new(), U256::zero());
        assert_eq!(tx.gas(), Some(&U256::from(4_000_000u64)));
    }
}
