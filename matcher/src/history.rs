//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! Components D and E: the per-order accounting state and the event
//! processor mutating it. Five column families live under one store;
//! each event application computes its whole write set in memory,
//! checks the reserved-balance invariant, and commits a single batch.
//!
//! Reserved balances are always recomputed from the obligation formulas
//! on the old and new order state, never accumulated ad hoc, so the
//! stored totals stay equal to a from-scratch recomputation over all
//! active orders.

// crate
use crate::events::{
    executed_amount, ExecutionOutcome, OrderAdded, OrderCancelled, OrderEvent, OrderExecuted,
    OrderRemainder,
};

// types
use tidex_types::account::AccountPubKey;
use tidex_types::asset::{Asset, AssetPair};
use tidex_types::error::{MatcherError, MatcherResult};
use tidex_types::order::{prorated_fee, spend_amount, Order, OrderId, OrderInfo, OrderSide};
use tidex_types::store::{KvStore, StoreBatch, StoreConfig, StoreMap};

// external
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub const CF_ORDER_INFO: &str = "order_info";
pub const CF_ORDER_META: &str = "order_meta";
pub const CF_RESERVED: &str = "reserved";
pub const CF_ACTIVE_INDEX: &str = "active_index";
pub const CF_ALL_INDEX: &str = "all_index";

pub const MATCHER_COLUMN_FAMILIES: &[&str] = &[
    CF_ORDER_INFO,
    CF_ORDER_META,
    CF_RESERVED,
    CF_ACTIVE_INDEX,
    CF_ALL_INDEX,
];

/// Key layouts. Integer parts are big-endian; the active index inverts
/// the timestamp so a forward scan yields newest first.
pub(crate) mod keys {
    use super::*;

    pub fn asset_bytes(asset: &Asset) -> Vec<u8> {
        match asset {
            None => vec![0],
            Some(id) => {
                let mut bytes = Vec::with_capacity(33);
                bytes.push(1);
                bytes.extend_from_slice(id.as_bytes());
                bytes
            }
        }
    }

    pub fn reserved(account: &AccountPubKey, asset: &Asset) -> Vec<u8> {
        let mut key = account.as_bytes().to_vec();
        key.extend_from_slice(&asset_bytes(asset));
        key
    }

    /// Asset part of a reserved key, after the 32-byte account prefix.
    pub fn reserved_asset(key: &[u8]) -> Option<Asset> {
        use tidex_types::asset::AssetId;
        match key.get(32)? {
            0 => Some(None),
            1 => {
                let bytes: [u8; 32] = key.get(33..65)?.try_into().ok()?;
                Some(Some(AssetId::new(bytes)))
            }
            _ => None,
        }
    }

    pub fn active(sender: &AccountPubKey, timestamp: i64, id: &OrderId) -> Vec<u8> {
        let mut key = sender.as_bytes().to_vec();
        key.extend_from_slice(&(u64::MAX - timestamp as u64).to_be_bytes());
        key.extend_from_slice(id.as_bytes());
        key
    }

    pub fn all(sender: &AccountPubKey, timestamp: i64, id: &OrderId) -> Vec<u8> {
        let mut key = sender.as_bytes().to_vec();
        key.extend_from_slice(&(timestamp as u64).to_be_bytes());
        key.extend_from_slice(id.as_bytes());
        key
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ActiveIndexEntry {
    pub id: OrderId,
    pub pair: AssetPair,
    pub side: OrderSide,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct AllIndexEntry {
    pub id: OrderId,
    pub timestamp: i64,
    pub status: tidex_types::order::OrderStatus,
}

/// Spend and fee an order still imposes, zero once terminal.
fn obligations(basis: &Order, info: &OrderInfo) -> [(Asset, u64); 2] {
    if info.status().is_terminal() {
        return [(basis.spend_asset(), 0), (None, 0)];
    }
    let remaining = info.remaining();
    let (spend_asset, spend) = basis.spend_obligation(remaining);
    let fee = basis.fee_obligation(remaining, info.remaining_fee);
    [(spend_asset, spend), (None, fee)]
}

/// Signed per-(account, asset) reservation changes of one event.
#[derive(Default)]
struct ReservedDeltas {
    deltas: BTreeMap<(AccountPubKey, Asset), i128>,
}

impl ReservedDeltas {
    fn credit(&mut self, account: AccountPubKey, entries: [(Asset, u64); 2]) {
        for (asset, value) in entries {
            *self.deltas.entry((account, asset)).or_default() += value as i128;
        }
    }

    fn debit(&mut self, account: AccountPubKey, entries: [(Asset, u64); 2]) {
        for (asset, value) in entries {
            *self.deltas.entry((account, asset)).or_default() -= value as i128;
        }
    }
}

/// Component D behind the event processor E. Writers are serialized by
/// the caller (one event queue per matcher); readers may run against
/// committed state concurrently.
pub struct OrderHistory {
    pub(crate) store: KvStore,
    pub(crate) order_info: StoreMap<OrderInfo>,
    pub(crate) order_meta: StoreMap<Order>,
    pub(crate) reserved: StoreMap<u64>,
    pub(crate) active_index: StoreMap<ActiveIndexEntry>,
    pub(crate) all_index: StoreMap<AllIndexEntry>,
}

impl OrderHistory {
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> MatcherResult<Self> {
        let store = KvStore::open(path, config, MATCHER_COLUMN_FAMILIES)?;
        let order_info = store.map::<OrderInfo>(CF_ORDER_INFO);
        let order_meta = store.map::<Order>(CF_ORDER_META);
        let reserved = store.map::<u64>(CF_RESERVED);
        let active_index = store.map::<ActiveIndexEntry>(CF_ACTIVE_INDEX);
        let all_index = store.map::<AllIndexEntry>(CF_ALL_INDEX);
        Ok(Self {
            store,
            order_info,
            order_meta,
            reserved,
            active_index,
            all_index,
        })
    }

    pub fn process(&mut self, event: &OrderEvent) -> MatcherResult<()> {
        match event {
            OrderEvent::Added(added) => self.order_added(added),
            OrderEvent::Executed(executed) => self.order_executed(executed).map(|_| ()),
            OrderEvent::Cancelled(cancelled) => self.order_cancelled(cancelled),
        }
    }

    /// Install a new order and reserve its full obligation. Re-adding a
    /// live id (the engine re-offering an execution remainder) changes
    /// nothing.
    pub fn order_added(&mut self, added: &OrderAdded) -> MatcherResult<()> {
        let order = &added.order;
        if let Some(info) = self.order_info.get(order.id.as_bytes())? {
            if !info.canceled {
                debug!(order = %order.id, "order already installed, re-add ignored");
                return Ok(());
            }
        }

        let info = Self::fresh_info(order);
        let mut deltas = ReservedDeltas::default();
        deltas.credit(order.sender, obligations(order, &info));

        let mut batch = self.store.batch();
        self.write_order(&mut batch, order, &info)?;
        self.apply_reserved(&mut batch, &deltas)?;
        batch.commit()?;
        debug!(order = %order.id, "order accepted");
        Ok(())
    }

    /// Settle a trade between the submitted and the counter order. A
    /// submitted order that has never been installed (it matched
    /// immediately on arrival) is first accepted with its full
    /// obligation, then both sides take the fill delta.
    pub fn order_executed(&mut self, executed: &OrderExecuted) -> MatcherResult<ExecutionOutcome> {
        let (submitted_basis, submitted_before, submitted_known) =
            self.side_state(&executed.submitted)?;
        let (counter_basis, counter_before, counter_known) = self.side_state(&executed.counter)?;

        let amount = executed_amount(
            submitted_before.remaining(),
            counter_before.remaining(),
            counter_basis.price,
        );

        let mut deltas = ReservedDeltas::default();
        let mut batch = self.store.batch();
        let submitted_after = self.settle_side(
            &mut batch,
            &mut deltas,
            &submitted_basis,
            &submitted_before,
            submitted_known,
            amount,
        )?;
        let counter_after = self.settle_side(
            &mut batch,
            &mut deltas,
            &counter_basis,
            &counter_before,
            counter_known,
            amount,
        )?;
        self.apply_reserved(&mut batch, &deltas)?;
        batch.commit()?;

        debug!(
            submitted = %submitted_basis.id,
            counter = %counter_basis.id,
            amount,
            "orders executed"
        );
        Ok(ExecutionOutcome {
            executed_amount: amount,
            submitted_remaining: OrderRemainder {
                amount: submitted_after.remaining(),
                fee: submitted_after.remaining_fee,
                order: submitted_basis,
            },
            counter_remaining: OrderRemainder {
                amount: counter_after.remaining(),
                fee: counter_after.remaining_fee,
                order: counter_basis,
            },
        })
    }

    /// Take an order off the book, releasing whatever it still
    /// reserves. Terminal and unknown orders are left untouched.
    pub fn order_cancelled(&mut self, cancelled: &OrderCancelled) -> MatcherResult<()> {
        let order = &cancelled.order;
        let info = match self.order_info.get(order.id.as_bytes())? {
            Some(info) => info,
            None => {
                debug!(order = %order.id, "cancel of unknown order ignored");
                return Ok(());
            }
        };
        if info.status().is_terminal() {
            debug!(order = %order.id, "cancel of terminal order ignored");
            return Ok(());
        }

        let basis = self
            .order_meta
            .get(order.id.as_bytes())?
            .unwrap_or_else(|| order.clone());
        let after = OrderInfo {
            canceled: true,
            ..info.clone()
        };

        let mut deltas = ReservedDeltas::default();
        deltas.debit(basis.sender, obligations(&basis, &info));

        let mut batch = self.store.batch();
        self.write_order(&mut batch, &basis, &after)?;
        self.apply_reserved(&mut batch, &deltas)?;
        batch.commit()?;

        debug!(
            order = %order.id,
            unmatchable = cancelled.unmatchable,
            "order cancelled"
        );
        Ok(())
    }

    fn fresh_info(order: &Order) -> OrderInfo {
        OrderInfo {
            amount: order.amount,
            filled: 0,
            canceled: false,
            min_amount: Some(order.min_amount_of_amount_asset()),
            remaining_fee: order.matcher_fee,
            unsafe_total_spend: None,
        }
    }

    /// The stored view of one execution side: the installation-time
    /// order (the accounting basis) and its current info. Orders never
    /// seen before come back fresh with `known = false`.
    fn side_state(&self, order: &Order) -> MatcherResult<(Order, OrderInfo, bool)> {
        match self.order_info.get(order.id.as_bytes())? {
            Some(info) if !info.canceled => {
                let basis = self
                    .order_meta
                    .get(order.id.as_bytes())?
                    .unwrap_or_else(|| order.clone());
                Ok((basis, info, true))
            }
            _ => Ok((order.clone(), Self::fresh_info(order), false)),
        }
    }

    /// Advance one side of a fill and stage its reservation delta. An
    /// unknown side reserves its full new obligation (nothing was ever
    /// reserved to release).
    fn settle_side(
        &self,
        batch: &mut StoreBatch<'_>,
        deltas: &mut ReservedDeltas,
        basis: &Order,
        before: &OrderInfo,
        known: bool,
        executed: u64,
    ) -> MatcherResult<OrderInfo> {
        let after = OrderInfo {
            filled: before.filled + executed,
            remaining_fee: prorated_fee(
                basis.matcher_fee,
                before.remaining() - executed,
                basis.amount,
            ),
            unsafe_total_spend: Some(
                before.total_spend(basis) + spend_amount(basis.side, executed, basis.price),
            ),
            ..before.clone()
        };

        if known {
            deltas.debit(basis.sender, obligations(basis, before));
        }
        deltas.credit(basis.sender, obligations(basis, &after));

        self.write_order(batch, basis, &after)?;
        Ok(after)
    }

    /// Stage the order record and both indices for its current status.
    fn write_order(
        &self,
        batch: &mut StoreBatch<'_>,
        order: &Order,
        info: &OrderInfo,
    ) -> MatcherResult<()> {
        batch.put(&self.order_info, order.id.as_bytes(), info)?;
        batch.put(&self.order_meta, order.id.as_bytes(), order)?;

        let status = info.status();
        batch.put(
            &self.all_index,
            &keys::all(&order.sender, order.timestamp, &order.id),
            &AllIndexEntry {
                id: order.id,
                timestamp: order.timestamp,
                status,
            },
        )?;

        let active_key = keys::active(&order.sender, order.timestamp, &order.id);
        if status.is_terminal() {
            batch.delete(&self.active_index, &active_key)?;
        } else {
            batch.put(
                &self.active_index,
                &active_key,
                &ActiveIndexEntry {
                    id: order.id,
                    pair: order.pair,
                    side: order.side,
                },
            )?;
        }
        Ok(())
    }

    /// Fold the staged deltas into the reserved table. Driving any
    /// balance below zero is an accounting bug: the whole event is
    /// abandoned uncommitted.
    fn apply_reserved(
        &self,
        batch: &mut StoreBatch<'_>,
        deltas: &ReservedDeltas,
    ) -> MatcherResult<()> {
        for ((account, asset), delta) in &deltas.deltas {
            if *delta == 0 {
                continue;
            }
            let key = keys::reserved(account, asset);
            let current = self.reserved.get(&key)?.unwrap_or(0) as i128;
            let next = current + delta;
            if next < 0 {
                return Err(MatcherError::NegativeReserved {
                    account: *account,
                    asset: *asset,
                    deficit: (-next) as u64,
                });
            }
            if next == 0 {
                batch.delete(&self.reserved, &key)?;
            } else {
                batch.put(&self.reserved, &key, &(next as u64))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod history_tests {
    use super::*;
    use tidex_types::asset::AssetId;
    use tidex_types::order::OrderStatus;

    const MATCHER_FEE: u64 = 300_000;

    fn wct_btc() -> AssetPair {
        AssetPair::new(
            Some(AssetId::from_ticker("WCT")),
            Some(AssetId::from_ticker("BTC")),
        )
    }

    fn order(
        label: &str,
        sender: &str,
        pair: AssetPair,
        side: OrderSide,
        price: u64,
        amount: u64,
        fee: u64,
        timestamp: i64,
    ) -> Order {
        Order {
            id: OrderId::digest(label.as_bytes()),
            sender: AccountPubKey::from_label(sender),
            pair,
            side,
            price,
            amount,
            matcher_fee: fee,
            timestamp,
        }
    }

    fn open(dir: &tempfile::TempDir) -> OrderHistory {
        OrderHistory::open(dir.path(), &StoreConfig::for_testing()).unwrap()
    }

    #[test]
    fn new_buy_order_reserves_spend_and_fee() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = open(&dir);

        // 10000 at 0.0007 in a non-native pair
        let buy = order("ord", "alice", wct_btc(), OrderSide::Buy, 70_000, 10_000, MATCHER_FEE, 1);
        history.order_added(&OrderAdded { order: buy.clone() }).unwrap();

        assert_eq!(history.status(&buy.id).unwrap(), OrderStatus::Accepted);
        let btc = Some(AssetId::from_ticker("BTC"));
        let wct = Some(AssetId::from_ticker("WCT"));
        assert_eq!(history.reserved_balance(&buy.sender, &btc).unwrap(), 7);
        assert_eq!(history.reserved_balance(&buy.sender, &wct).unwrap(), 0);
        assert_eq!(
            history.reserved_balance(&buy.sender, &None).unwrap(),
            MATCHER_FEE
        );
    }

    #[test]
    fn re_adding_the_execution_remainder_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = open(&dir);

        let counter = order(
            "counter", "bob", wct_btc(), OrderSide::Sell, 238, 840_340, MATCHER_FEE, 1,
        );
        let submitted = order(
            "submitted", "alice", wct_btc(), OrderSide::Buy, 238, 425_532, MATCHER_FEE, 2,
        );
        history.order_added(&OrderAdded { order: counter.clone() }).unwrap();
        let outcome = history
            .order_executed(&OrderExecuted {
                submitted: submitted.clone(),
                counter: counter.clone(),
            })
            .unwrap();
        assert_eq!(outcome.executed_amount, 420_169);

        let info_before = history.order_info(&counter.id).unwrap().unwrap();
        let reserved_before = history.reserved_balances(&counter.sender).unwrap();

        history
            .order_added(&OrderAdded {
                order: outcome.counter_remaining.as_order(),
            })
            .unwrap();

        assert_eq!(history.order_info(&counter.id).unwrap().unwrap(), info_before);
        assert_eq!(
            history.reserved_balances(&counter.sender).unwrap(),
            reserved_before
        );
    }

    #[test]
    fn executed_submitted_side_is_bootstrapped() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = open(&dir);

        // the submitted sell matches instantly, no OrderAdded for it
        let pair = AssetPair::new(None, Some(AssetId::from_ticker("BTC")));
        let counter = order("counter", "bob", pair, OrderSide::Buy, 80_000, 100_000, 2_000, 1);
        let submitted = order("submitted", "alice", pair, OrderSide::Sell, 70_000, 100_000, 1_000, 2);

        history.order_added(&OrderAdded { order: counter.clone() }).unwrap();
        let outcome = history
            .order_executed(&OrderExecuted {
                submitted: submitted.clone(),
                counter: counter.clone(),
            })
            .unwrap();

        assert_eq!(outcome.executed_amount, 100_000);
        assert_eq!(
            history.status(&submitted.id).unwrap(),
            OrderStatus::Filled(100_000)
        );
        assert_eq!(
            history.status(&counter.id).unwrap(),
            OrderStatus::Filled(100_000)
        );
        for account in [&submitted.sender, &counter.sender] {
            assert_eq!(
                history.reserved_balances(account).unwrap(),
                vec![],
                "a filled pair must hold nothing back"
            );
        }
    }

    #[test]
    fn cancel_is_idempotent_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = open(&dir);

        let sell = order("ord", "carol", wct_btc(), OrderSide::Sell, 70_000, 5_000, MATCHER_FEE, 3);
        history.order_added(&OrderAdded { order: sell.clone() }).unwrap();
        assert_eq!(
            history.reserved_balance(&sell.sender, &Some(AssetId::from_ticker("WCT"))).unwrap(),
            5_000
        );

        history
            .order_cancelled(&OrderCancelled { order: sell.clone(), unmatchable: false })
            .unwrap();
        assert_eq!(history.status(&sell.id).unwrap(), OrderStatus::Cancelled(0));
        assert_eq!(history.reserved_balances(&sell.sender).unwrap(), vec![]);

        // a second cancel must not underflow anything
        history
            .order_cancelled(&OrderCancelled { order: sell.clone(), unmatchable: true })
            .unwrap();
        assert_eq!(history.status(&sell.id).unwrap(), OrderStatus::Cancelled(0));
    }

    #[test]
    fn delete_order_requires_a_terminal_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = open(&dir);

        let sell = order("ord", "carol", wct_btc(), OrderSide::Sell, 70_000, 5_000, MATCHER_FEE, 3);
        history.order_added(&OrderAdded { order: sell.clone() }).unwrap();
        assert!(!history.delete_order(&sell.sender, &sell.id).unwrap());

        history
            .order_cancelled(&OrderCancelled { order: sell.clone(), unmatchable: false })
            .unwrap();
        assert!(history.delete_order(&sell.sender, &sell.id).unwrap());
        assert_eq!(history.status(&sell.id).unwrap(), OrderStatus::NotFound);
        assert!(history.all_order_ids(&sell.sender).unwrap().is_empty());
    }
}
