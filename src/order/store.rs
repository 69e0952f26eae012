//! In-memory order store
//!
//! Authoritative owner of every `SwapOrder`. Reads hand out clones, so a
//! snapshot held by one task never observes a later mutation; all writes
//! go through `update`, which refreshes `updated_at` and fails on unknown
//! hashes instead of creating records.

use chrono::Utc;
use dashmap::DashMap;
use ethers::types::H256;

use crate::codec::escrow::Immutables;
use crate::error::{RelayerError, RelayerResult};
use crate::order::{OrderStatus, SwapOrder};

pub struct OrderStore {
    orders: DashMap<H256, SwapOrder>,
    by_user: DashMap<String, Vec<H256>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
            by_user: DashMap::new(),
        }
    }

    /// Inserts a freshly built order and indexes it under the lowercased
    /// user address. Re-creating an existing hash replaces the record but
    /// never double-indexes it.
    pub fn create(&self, order: SwapOrder) -> SwapOrder {
        let user_key = order.user_intent.user_address.to_lowercase();
        let order_hash = order.order_hash;
        let replaced = self.orders.insert(order_hash, order.clone()).is_some();
        if !replaced {
            self.by_user.entry(user_key).or_default().push(order_hash);
        }
        order
    }

    pub fn get_by_hash(&self, order_hash: &H256) -> Option<SwapOrder> {
        self.orders.get(order_hash).map(|entry| entry.clone())
    }

    /// All orders created by a user, newest first.
    pub fn get_by_user(&self, user_address: &str) -> Vec<SwapOrder> {
        let hashes = match self.by_user.get(&user_address.to_lowercase()) {
            Some(hashes) => hashes.clone(),
            None => return Vec::new(),
        };
        let mut orders: Vec<SwapOrder> = hashes
            .iter()
            .filter_map(|hash| self.get_by_hash(hash))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn update<F>(&self, order_hash: &H256, apply: F) -> RelayerResult<SwapOrder>
    where
        F: FnOnce(&mut SwapOrder) -> RelayerResult<()>,
    {
        let mut entry =
            self.orders
                .get_mut(order_hash)
                .ok_or_else(|| RelayerError::OrderNotFound {
                    order_hash: format!("{:?}", order_hash),
                })?;
        apply(entry.value_mut())?;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    pub fn add_signature(&self, order_hash: &H256, signature: &str) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.signature = Some(signature.to_string());
            if order.status == OrderStatus::Built {
                order.status = OrderStatus::Signed;
            }
            Ok(())
        })
    }

    pub fn add_secret(&self, order_hash: &H256, secret: &str) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.secret = Some(secret.to_string());
            Ok(())
        })
    }

    pub fn add_escrow_src_tx_hash(&self, order_hash: &H256, tx: H256) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.escrow_src_tx_hash = Some(tx);
            Ok(())
        })
    }

    pub fn add_escrow_dst_tx_hash(&self, order_hash: &H256, tx: H256) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.escrow_dst_tx_hash = Some(tx);
            Ok(())
        })
    }

    pub fn add_src_withdraw_tx_hash(
        &self,
        order_hash: &H256,
        tx: H256,
    ) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.escrow_src_withdraw_tx_hash = Some(tx);
            Ok(())
        })
    }

    pub fn add_dst_withdraw_tx_hash(
        &self,
        order_hash: &H256,
        tx: H256,
    ) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.escrow_dst_withdraw_tx_hash = Some(tx);
            Ok(())
        })
    }

    pub fn add_evm_escrow_address(
        &self,
        order_hash: &H256,
        address: &str,
    ) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.evm_escrow_address = Some(address.to_string());
            Ok(())
        })
    }

    pub fn add_cosmos_htlc_id(&self, order_hash: &H256, htlc_id: &str) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.cosmos_htlc_id = Some(htlc_id.to_string());
            Ok(())
        })
    }

    pub fn add_cosmos_escrow_address(
        &self,
        order_hash: &H256,
        address: &str,
    ) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.cosmos_escrow_address = Some(address.to_string());
            Ok(())
        })
    }

    pub fn add_deployed_at(&self, order_hash: &H256, deployed_at: u64) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.deployed_at = Some(deployed_at);
            Ok(())
        })
    }

    /// Records the source-leg immutables captured at deployment. Only
    /// orders built with EVM order data can hold them.
    pub fn set_src_immutables(
        &self,
        order_hash: &H256,
        immutables: Immutables,
    ) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            let evm = order.evm.as_mut().ok_or_else(|| {
                RelayerError::Validation("order has no EVM order data".to_string())
            })?;
            evm.src_immutables = Some(immutables);
            Ok(())
        })
    }

    pub fn set_status(&self, order_hash: &H256, status: OrderStatus) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.status = status;
            Ok(())
        })
    }

    pub fn mark_failed(&self, order_hash: &H256) -> RelayerResult<SwapOrder> {
        self.set_status(order_hash, OrderStatus::Failed)
    }

    pub fn mark_withdrawn(&self, order_hash: &H256) -> RelayerResult<SwapOrder> {
        self.update(order_hash, |order| {
            order.status = OrderStatus::Withdrawn;
            order.executed_at = Some(Utc::now());
            Ok(())
        })
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{SwapDirection, UserIntent};
    use std::time::Duration;

    fn intent_for(user: &str) -> UserIntent {
        UserIntent {
            src_chain_id: 42161,
            dst_chain_id: 999,
            user_address: user.to_string(),
            token_amount: "1".to_string(),
            src_chain_asset: "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1".to_string(),
            dst_chain_asset: "uosmo".to_string(),
            hash_lock: format!("0x{}", "ab".repeat(32)),
            receiver: "osmo1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu".to_string(),
        }
    }

    fn order_with(hash: u8, user: &str) -> SwapOrder {
        SwapOrder::new(
            H256::repeat_byte(hash),
            SwapDirection::EvmToCosmos,
            intent_for(user),
        )
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = OrderStore::new();
        let order = order_with(1, "0xAbCd000000000000000000000000000000000001");
        store.create(order.clone());

        let fetched = store.get_by_hash(&order.order_hash).unwrap();
        assert_eq!(fetched.order_hash, order.order_hash);
        assert_eq!(fetched.status, OrderStatus::Built);
        assert!(store.get_by_hash(&H256::repeat_byte(9)).is_none());
    }

    #[test]
    fn updates_fail_on_unknown_orders() {
        let store = OrderStore::new();
        let missing = H256::repeat_byte(7);
        let err = store.add_signature(&missing, "0xsig").unwrap_err();
        assert!(matches!(err, RelayerError::OrderNotFound { .. }));
    }

    #[test]
    fn escrow_address_update_refreshes_the_snapshot() {
        let store = OrderStore::new();
        let order = order_with(1, "0xAbCd000000000000000000000000000000000001");
        let created = store.create(order);

        std::thread::sleep(Duration::from_millis(5));
        store
            .add_evm_escrow_address(&created.order_hash, "0x9999")
            .unwrap();

        let fetched = store.get_by_hash(&created.order_hash).unwrap();
        assert_eq!(fetched.evm_escrow_address.as_deref(), Some("0x9999"));
        assert!(fetched.updated_at > created.updated_at);
    }

    #[test]
    fn snapshots_do_not_observe_later_mutation() {
        let store = OrderStore::new();
        let order = order_with(1, "0xAbCd000000000000000000000000000000000001");
        store.create(order.clone());

        let before = store.get_by_hash(&order.order_hash).unwrap();
        store.add_signature(&order.order_hash, "0xsig").unwrap();
        assert!(before.signature.is_none());
    }

    #[test]
    fn user_index_is_case_insensitive_and_newest_first() {
        let store = OrderStore::new();
        let user = "0xAbCd000000000000000000000000000000000001";
        let first = order_with(1, user);
        store.create(first.clone());
        std::thread::sleep(Duration::from_millis(5));
        let second = order_with(2, &user.to_uppercase().replace("0X", "0x"));
        store.create(second.clone());

        let orders = store.get_by_user(&user.to_lowercase());
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].order_hash, second.order_hash);
        assert_eq!(orders[1].order_hash, first.order_hash);
        assert!(store.get_by_user("0xno_such_user").is_empty());
    }

    #[test]
    fn recreating_an_order_does_not_double_index() {
        let store = OrderStore::new();
        let user = "0xAbCd000000000000000000000000000000000001";
        let order = order_with(1, user);
        store.create(order.clone());
        store.create(order.clone());
        assert_eq!(store.get_by_user(user).len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn signature_promotes_built_orders_only() {
        let store = OrderStore::new();
        let order = order_with(1, "0xAbCd000000000000000000000000000000000001");
        store.create(order.clone());

        let signed = store.add_signature(&order.order_hash, "0xsig").unwrap();
        assert_eq!(signed.status, OrderStatus::Signed);

        store
            .set_status(&order.order_hash, OrderStatus::SrcDeployed)
            .unwrap();
        let resigned = store.add_signature(&order.order_hash, "0xsig2").unwrap();
        assert_eq!(resigned.status, OrderStatus::SrcDeployed);
        assert_eq!(resigned.signature.as_deref(), Some("0xsig2"));
    }

    #[test]
    fn immutables_require_evm_order_data() {
        let store = OrderStore::new();
        let order = order_with(1, "0xAbCd000000000000000000000000000000000001");
        store.create(order.clone());

        let immutables = Immutables {
            order_hash: order.order_hash,
            hashlock: H256::repeat_byte(0xab),
            maker: Default::default(),
            taker: Default::default(),
            token: Default::default(),
            amount: Default::default(),
            safety_deposit: Default::default(),
            timelocks: Default::default(),
        };
        let err = store
            .set_src_immutables(&order.order_hash, immutables)
            .unwrap_err();
        assert!(matches!(err, RelayerError::Validation(_)));
    }

    #[test]
    fn withdrawal_is_terminal_and_stamps_execution_time() {
        let store = OrderStore::new();
        let order = order_with(1, "0xAbCd000000000000000000000000000000000001");
        store.create(order.clone());

        let done = store.mark_withdrawn(&order.order_hash).unwrap();
        assert_eq!(done.status, OrderStatus::Withdrawn);
        assert!(done.executed_at.is_some());
        assert!(done.status.is_terminal());

        let failed = store.mark_failed(&order.order_hash).unwrap();
        assert_eq!(failed.status, OrderStatus::Failed);
    }
}
