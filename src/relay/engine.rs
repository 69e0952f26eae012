//! Swap coordination engine
//!
//! Drives the 6-state order machine over both directional protocols.
//! EVM-source swaps run signature -> source escrow -> Cosmos HTLC, with
//! the HTLC expiry anchored to the source deployment timestamp.
//! Cosmos-source swaps deploy only the EVM destination escrow once the
//! caller confirms the source leg. Execution is serialized per order
//! hash so a replayed request can never deploy a second escrow, and a
//! failed leg marks the order failed without reversing anything already
//! broadcast.

use chrono::Utc;
use dashmap::DashMap;
use ethers::types::{Address, Signature, H256};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::codec::{self, escrow::Immutables};
use crate::error::{RelayerError, RelayerResult};
use crate::metrics;
use crate::order::builder::{cosmos_order_hash, OrderBuilder};
use crate::order::{EvmOrderData, OrderStatus, OrderStore, SwapDirection, SwapOrder, UserIntent};
use crate::resolver::{CosmosResolver, CreateHtlc, EvmResolver};

/// Base-unit precision of Cosmos HTLC amounts.
const COSMOS_DECIMALS: u32 = 6;

/// Fallback source-cancellation deadline for destination deployments
/// when the confirmation request does not carry one.
const DEFAULT_SRC_CANCELLATION_SECS: u64 = 600;

pub struct RelayerEngine {
    store: Arc<OrderStore>,
    evm: DashMap<u64, Arc<EvmResolver>>,
    cosmos: Arc<CosmosResolver>,
    execution_locks: DashMap<H256, Arc<Mutex<()>>>,
}

impl RelayerEngine {
    pub fn new(
        store: Arc<OrderStore>,
        evm_resolvers: Vec<Arc<EvmResolver>>,
        cosmos: Arc<CosmosResolver>,
    ) -> Self {
        let evm = DashMap::new();
        for resolver in evm_resolvers {
            evm.insert(resolver.chain_id(), resolver);
        }
        Self {
            store,
            evm,
            cosmos,
            execution_locks: DashMap::new(),
        }
    }

    /// EVM chain ids this engine can deploy escrows on.
    pub fn supported_evm_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.evm.iter().map(|entry| *entry.key()).collect();
        chains.sort_unstable();
        chains
    }

    /// Builds a signable order for an EVM-source swap and records it.
    /// The response carries the typed payload the maker's wallet signs.
    pub fn build_evm_to_cosmos(&self, intent: UserIntent) -> RelayerResult<SwapOrder> {
        if intent.dst_chain_id != codec::COSMOS_CHAIN_ID {
            return Err(RelayerError::BuildFailed(format!(
                "destination chain {} is not the Cosmos leg",
                intent.dst_chain_id
            )));
        }
        let resolver = self.evm_resolver(intent.src_chain_id).map_err(|_| {
            RelayerError::BuildFailed(format!(
                "no resolver for source chain {}",
                intent.src_chain_id
            ))
        })?;

        let built = OrderBuilder::new(
            resolver.chain_id(),
            resolver.resolver_address(),
            resolver.escrow_factory(),
            resolver.limit_order(),
        )
        .build(&intent)
        .map_err(|e| RelayerError::BuildFailed(e.to_string()))?;

        let order = SwapOrder::new(built.order_hash, SwapDirection::EvmToCosmos, intent)
            .with_evm_data(EvmOrderData {
                order: built.order,
                extension: built.extension,
                payload: built.payload,
                src_immutables: None,
            });
        let order = self.store.create(order);
        metrics::record_order_built(direction_label(SwapDirection::EvmToCosmos));
        info!("built EVM->Cosmos order {:?}", order.order_hash);
        Ok(order)
    }

    /// Records a Cosmos-source swap. There is no EVM order to sign at
    /// this point; the order hash is derived from the salted intent and
    /// the destination leg is deployed later, on confirmation.
    pub fn build_cosmos_to_evm(&self, intent: UserIntent) -> RelayerResult<SwapOrder> {
        if intent.src_chain_id != codec::COSMOS_CHAIN_ID {
            return Err(RelayerError::BuildFailed(format!(
                "source chain {} is not the Cosmos leg",
                intent.src_chain_id
            )));
        }
        self.evm_resolver(intent.dst_chain_id).map_err(|_| {
            RelayerError::BuildFailed(format!(
                "no resolver for destination chain {}",
                intent.dst_chain_id
            ))
        })?;
        // Destination fields must parse now, before the user locks the
        // Cosmos leg against an undeployable order.
        codec::parse_hashlock(&intent.hash_lock)
            .map_err(|e| RelayerError::BuildFailed(e.to_string()))?;
        parse_evm_address(&intent.receiver, "receiver")
            .map_err(|e| RelayerError::BuildFailed(e.to_string()))?;
        parse_evm_address(&intent.dst_chain_asset, "dstChainAsset")
            .map_err(|e| RelayerError::BuildFailed(e.to_string()))?;

        let order_hash = cosmos_order_hash(&intent)?;
        let order = self
            .store
            .create(SwapOrder::new(order_hash, SwapDirection::CosmosToEvm, intent));
        metrics::record_order_built(direction_label(SwapDirection::CosmosToEvm));
        info!("built Cosmos->EVM order {:?}", order.order_hash);
        Ok(order)
    }

    /// Executes an EVM-source swap end to end: attaches the maker's
    /// signature, deploys the source escrow and locks the Cosmos HTLC
    /// with its expiry anchored to the source deployment timestamp.
    /// Re-invocations after the source escrow exists return the stored
    /// order without touching either chain.
    pub async fn execute_evm_to_cosmos(
        &self,
        order_hash: H256,
        signature: &str,
    ) -> RelayerResult<SwapOrder> {
        let lock = self.execution_lock(order_hash);
        let _guard = lock.lock().await;

        let order = self.order(order_hash)?;
        if order.direction != SwapDirection::EvmToCosmos {
            return Err(RelayerError::Validation(format!(
                "order {:?} is not an EVM-source swap",
                order_hash
            )));
        }
        // A terminal order never goes back on chain: a failed one may
        // already have broadcast its deploy transaction without recording
        // a tx hash, and re-executing it would deploy a second escrow.
        if order.status.is_terminal() {
            return Err(RelayerError::Validation(format!(
                "order {:?} is {:?} and cannot be executed again",
                order_hash, order.status
            )));
        }
        if order.escrow_src_tx_hash.is_some() {
            info!(
                "order {:?} already has a source escrow, skipping re-execution",
                order_hash
            );
            return Ok(order);
        }
        let evm_data = order.evm.clone().ok_or_else(|| {
            RelayerError::Internal(format!("order {:?} carries no EVM order data", order_hash))
        })?;

        let parsed_signature = parse_signature(signature)?;
        let hashlock = codec::parse_hashlock(&order.user_intent.hash_lock)?;
        let resolver = self.evm_resolver(order.user_intent.src_chain_id)?;
        self.store.add_signature(&order_hash, signature)?;

        let immutables = Immutables {
            order_hash,
            hashlock,
            maker: evm_data.order.maker,
            taker: resolver.resolver_address(),
            token: evm_data.order.maker_asset,
            amount: evm_data.order.making_amount,
            safety_deposit: codec::src_safety_deposit(),
            timelocks: codec::TimelockSchedule::standard().pack(),
        };
        let deployment = match resolver
            .deploy_src(
                &evm_data.order,
                &evm_data.extension,
                &parsed_signature,
                &immutables,
            )
            .await
        {
            Ok(deployment) => deployment,
            Err(e) => {
                return Err(self.fail(
                    order_hash,
                    SwapDirection::EvmToCosmos,
                    "source escrow deployment",
                    e,
                ))
            }
        };

        self.store
            .add_escrow_src_tx_hash(&order_hash, deployment.tx_hash)?;
        self.store
            .add_evm_escrow_address(&order_hash, &format!("{:?}", deployment.escrow))?;
        self.store
            .add_deployed_at(&order_hash, deployment.deployed_at)?;
        self.store
            .set_src_immutables(&order_hash, deployment.immutables.clone())?;
        self.store.set_status(&order_hash, OrderStatus::SrcDeployed)?;
        info!(
            "source escrow {:?} deployed for order {:?}",
            deployment.escrow, order_hash
        );

        let htlc_tx = match self
            .create_destination_htlc(
                &order.user_intent,
                order_hash,
                hashlock,
                deployment.deployed_at,
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                return Err(self.fail(
                    order_hash,
                    SwapDirection::EvmToCosmos,
                    "destination HTLC creation",
                    e,
                ))
            }
        };
        self.store.add_cosmos_htlc_id(&order_hash, &htlc_tx)?;

        // Read back the HTLC's own escrow address. The HTLC already
        // exists on chain, so a failed readback downgrades to a warning
        // instead of failing the order.
        let swap_hash = format!("{:?}", order_hash);
        match self.cosmos.get_htlc(&swap_hash).await {
            Ok(htlc) => match CosmosResolver::escrow_address_from(&htlc) {
                Ok(address) => {
                    self.store.add_cosmos_escrow_address(&order_hash, &address)?;
                }
                Err(e) => warn!(
                    "HTLC for order {:?} reports no escrow address: {}",
                    order_hash, e
                ),
            },
            Err(e) => warn!(
                "could not read back the HTLC for order {:?}: {}",
                order_hash, e
            ),
        }

        let order = self.store.set_status(&order_hash, OrderStatus::DstDeployed)?;
        metrics::record_swap_executed(direction_label(SwapDirection::EvmToCosmos));
        info!(
            "order {:?} fully deployed: source escrow and Cosmos HTLC live",
            order_hash
        );
        Ok(order)
    }

    /// Confirmation callback for a Cosmos-source swap: the caller vouches
    /// that the Cosmos HTLC exists, and this side deploys the EVM
    /// destination escrow. The factory refuses deployments past the
    /// source-cancellation deadline, which defaults to ten minutes out.
    pub async fn confirm_cosmos_to_evm(
        &self,
        order_hash: H256,
        src_cancellation_at: Option<u64>,
    ) -> RelayerResult<SwapOrder> {
        let lock = self.execution_lock(order_hash);
        let _guard = lock.lock().await;

        let order = self.order(order_hash)?;
        if order.direction != SwapDirection::CosmosToEvm {
            return Err(RelayerError::Validation(format!(
                "order {:?} is not a Cosmos-source swap",
                order_hash
            )));
        }
        // Same terminal guard as the EVM-source path: a failed order may
        // have broadcast its deployment already.
        if order.status.is_terminal() {
            return Err(RelayerError::Validation(format!(
                "order {:?} is {:?} and cannot be executed again",
                order_hash, order.status
            )));
        }
        if order.escrow_dst_tx_hash.is_some() {
            info!(
                "order {:?} already has a destination escrow, skipping re-execution",
                order_hash
            );
            return Ok(order);
        }

        let resolver = self.evm_resolver(order.user_intent.dst_chain_id)?;
        let immutables =
            destination_immutables(&order.user_intent, order_hash, resolver.resolver_address())?;
        // The confirmation asserts the Cosmos source leg is live; record
        // that before the destination leg so the machine never skips a
        // state.
        self.store.set_status(&order_hash, OrderStatus::SrcDeployed)?;

        let deadline = src_cancellation_at
            .unwrap_or_else(|| Utc::now().timestamp() as u64 + DEFAULT_SRC_CANCELLATION_SECS);
        let deployment = match resolver.deploy_dst(&immutables, deadline).await {
            Ok(deployment) => deployment,
            Err(e) => {
                return Err(self.fail(
                    order_hash,
                    SwapDirection::CosmosToEvm,
                    "destination escrow deployment",
                    e,
                ))
            }
        };

        self.store
            .add_escrow_dst_tx_hash(&order_hash, deployment.tx_hash)?;
        self.store
            .add_evm_escrow_address(&order_hash, &format!("{:?}", deployment.escrow))?;
        self.store
            .add_deployed_at(&order_hash, deployment.deployed_at)?;
        let order = self.store.set_status(&order_hash, OrderStatus::DstDeployed)?;
        metrics::record_swap_executed(direction_label(SwapDirection::CosmosToEvm));
        info!(
            "destination escrow {:?} deployed for order {:?}",
            deployment.escrow, order_hash
        );
        Ok(order)
    }

    /// Withdraws the EVM leg of a swap by revealing the secret. The
    /// secret is checked against the order's hashlock before any chain
    /// call; the escrow contract enforces the withdrawal timelock.
    pub async fn reveal_secret(&self, order_hash: H256, secret: &str) -> RelayerResult<SwapOrder> {
        let lock = self.execution_lock(order_hash);
        let _guard = lock.lock().await;

        let order = self.order(order_hash)?;
        let secret_word = codec::parse_secret(secret)?;
        let hashlock = codec::parse_hashlock(&order.user_intent.hash_lock)?;
        if !codec::secret_matches(&secret_word, &hashlock) {
            return Err(RelayerError::Validation(format!(
                "secret does not match the hashlock of order {:?}",
                order_hash
            )));
        }
        if order.status == OrderStatus::Withdrawn {
            info!("order {:?} already withdrawn", order_hash);
            return Ok(order);
        }
        if order.status != OrderStatus::DstDeployed {
            return Err(RelayerError::Validation(format!(
                "order {:?} is not ready for withdrawal in status {:?}",
                order_hash, order.status
            )));
        }

        let escrow_str = order.evm_escrow_address.clone().ok_or_else(|| {
            RelayerError::Internal(format!(
                "order {:?} has no recorded escrow address",
                order_hash
            ))
        })?;
        let escrow = parse_evm_address(&escrow_str, "recorded escrow address")?;

        let (resolver, immutables, evm_leg_is_source) = match order.direction {
            SwapDirection::EvmToCosmos => {
                let resolver = self.evm_resolver(order.user_intent.src_chain_id)?;
                let immutables = order
                    .evm
                    .as_ref()
                    .and_then(|data| data.src_immutables.clone())
                    .ok_or_else(|| {
                        RelayerError::Internal(format!(
                            "order {:?} has no recorded source immutables",
                            order_hash
                        ))
                    })?;
                (resolver, immutables, true)
            }
            SwapDirection::CosmosToEvm => {
                let resolver = self.evm_resolver(order.user_intent.dst_chain_id)?;
                let deployed_at = order.deployed_at.ok_or_else(|| {
                    RelayerError::Internal(format!(
                        "order {:?} has no recorded deployment timestamp",
                        order_hash
                    ))
                })?;
                let immutables = destination_immutables(
                    &order.user_intent,
                    order_hash,
                    resolver.resolver_address(),
                )?
                .with_deployed_at(deployed_at);
                (resolver, immutables, false)
            }
        };

        let tx_hash = match resolver.withdraw(escrow, secret_word, &immutables).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                return Err(self.fail(order_hash, order.direction, "escrow withdrawal", e))
            }
        };

        self.store.add_secret(&order_hash, secret)?;
        if evm_leg_is_source {
            self.store.add_src_withdraw_tx_hash(&order_hash, tx_hash)?;
        } else {
            self.store.add_dst_withdraw_tx_hash(&order_hash, tx_hash)?;
        }
        let order = self.store.mark_withdrawn(&order_hash)?;
        metrics::record_withdrawal(direction_label(order.direction));
        info!("order {:?} withdrawn in tx {:?}", order_hash, tx_hash);
        Ok(order)
    }

    pub fn get_order(&self, order_hash: H256) -> RelayerResult<SwapOrder> {
        self.order(order_hash)
    }

    pub fn get_orders_by_user(&self, address: &str) -> Vec<SwapOrder> {
        self.store.get_by_user(address)
    }

    async fn create_destination_htlc(
        &self,
        intent: &UserIntent,
        order_hash: H256,
        hashlock: H256,
        src_deployed_at: u64,
    ) -> RelayerResult<String> {
        let amount = codec::parse_token_amount(&intent.token_amount, COSMOS_DECIMALS)?;
        let params = CreateHtlc {
            swap_hash: format!("{:?}", order_hash),
            maker: intent.receiver.clone(),
            amount: amount.to_string(),
            denom: intent.dst_chain_asset.clone(),
            hashlock: hashlock.as_bytes().to_vec(),
            timelock: codec::TimelockSchedule::standard().dst_withdrawal_at(src_deployed_at),
        };
        self.cosmos.create_htlc(&params).await
    }

    fn evm_resolver(&self, chain_id: u64) -> RelayerResult<Arc<EvmResolver>> {
        self.evm
            .get(&chain_id)
            .map(|entry| entry.value().clone())
            .ok_or(RelayerError::UnsupportedChain { chain_id })
    }

    fn execution_lock(&self, order_hash: H256) -> Arc<Mutex<()>> {
        self.execution_locks
            .entry(order_hash)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn order(&self, order_hash: H256) -> RelayerResult<SwapOrder> {
        self.store
            .get_by_hash(&order_hash)
            .ok_or_else(|| RelayerError::OrderNotFound {
                order_hash: format!("{:?}", order_hash),
            })
    }

    /// Records a chain-step failure against the order and collapses the
    /// cause into the coarse execution error callers receive. The cause
    /// stays in the logs; on-chain effects of the partial leg are left
    /// as they are.
    fn fail(
        &self,
        order_hash: H256,
        direction: SwapDirection,
        stage: &str,
        cause: RelayerError,
    ) -> RelayerError {
        error!("{} failed for order {:?}: {}", stage, order_hash, cause);
        if let Err(store_err) = self.store.mark_failed(&order_hash) {
            error!(
                "could not mark order {:?} as failed: {}",
                order_hash, store_err
            );
        }
        metrics::record_swap_failed(direction_label(direction));
        RelayerError::ExecutionFailed {
            order_hash: format!("{:?}", order_hash),
        }
    }
}

/// Destination-escrow immutables for a Cosmos-source swap. Everything is
/// recomputed from the stored intent; nothing is accepted from the
/// confirmation request.
fn destination_immutables(
    intent: &UserIntent,
    order_hash: H256,
    taker: Address,
) -> RelayerResult<Immutables> {
    let hashlock = codec::parse_hashlock(&intent.hash_lock)?;
    let maker = parse_evm_address(&intent.receiver, "receiver")?;
    let token = parse_evm_address(&intent.dst_chain_asset, "dstChainAsset")?;
    let amount = codec::parse_token_amount(&intent.token_amount, codec::token_decimals(&token))?;
    Ok(Immutables {
        order_hash,
        hashlock,
        maker,
        taker,
        token,
        amount,
        safety_deposit: codec::dst_safety_deposit(),
        timelocks: codec::TimelockSchedule::standard().pack(),
    })
}

fn direction_label(direction: SwapDirection) -> &'static str {
    match direction {
        SwapDirection::EvmToCosmos => "evm_to_cosmos",
        SwapDirection::CosmosToEvm => "cosmos_to_evm",
    }
}

fn parse_evm_address(value: &str, field: &str) -> RelayerResult<Address> {
    value.trim().parse::<Address>().map_err(|_| {
        RelayerError::Validation(format!("{} is not a valid EVM address: {}", field, value))
    })
}

fn parse_signature(signature: &str) -> RelayerResult<Signature> {
    signature
        .trim()
        .trim_start_matches("0x")
        .parse::<Signature>()
        .map_err(|e| RelayerError::Validation(format!("malformed signature: {}", e)))
}
