//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! Read surface over the order-history state. Queries observe committed
//! state only; index listings follow the matcher UI contract — active
//! orders first, newest first within a group.

// crate
use crate::history::{keys, OrderHistory};

// types
use tidex_types::account::AccountPubKey;
use tidex_types::asset::{Asset, AssetPair};
use tidex_types::error::MatcherResult;
use tidex_types::order::{Order, OrderId, OrderInfo, OrderStatus};

// external
use tracing::debug;

impl OrderHistory {
    pub fn order_info(&self, id: &OrderId) -> MatcherResult<Option<OrderInfo>> {
        Ok(self.order_info.get(id.as_bytes())?)
    }

    /// The order as installed, rebuilt from its metadata record.
    pub fn order(&self, id: &OrderId) -> MatcherResult<Option<Order>> {
        Ok(self.order_meta.get(id.as_bytes())?)
    }

    pub fn status(&self, id: &OrderId) -> MatcherResult<OrderStatus> {
        Ok(self
            .order_info
            .get(id.as_bytes())?
            .map_or(OrderStatus::NotFound, |info| info.status()))
    }

    pub fn reserved_balance(&self, account: &AccountPubKey, asset: &Asset) -> MatcherResult<u64> {
        Ok(self
            .reserved
            .get(&keys::reserved(account, asset))?
            .unwrap_or(0))
    }

    /// Every non-zero reservation of `account`, native asset first.
    pub fn reserved_balances(&self, account: &AccountPubKey) -> MatcherResult<Vec<(Asset, u64)>> {
        let entries = self.reserved.prefix_scan(account.as_bytes())?;
        let mut balances = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            if let Some(asset) = keys::reserved_asset(&key) {
                balances.push((asset, value));
            }
        }
        Ok(balances)
    }

    /// Ids of the orders still on the book, newest first.
    pub fn active_order_ids(&self, account: &AccountPubKey) -> MatcherResult<Vec<OrderId>> {
        let entries = self.active_index.prefix_scan(account.as_bytes())?;
        Ok(entries.into_iter().map(|(_, entry)| entry.id).collect())
    }

    /// Active orders restricted to one traded pair, newest first.
    // TODO index the pair into the active key once per-pair listings
    // dominate; today this scans the whole account and filters
    pub fn active_order_ids_by_pair(
        &self,
        account: &AccountPubKey,
        pair: &AssetPair,
    ) -> MatcherResult<Vec<OrderId>> {
        let entries = self.active_index.prefix_scan(account.as_bytes())?;
        Ok(entries
            .into_iter()
            .filter(|(_, entry)| entry.pair == *pair)
            .map(|(_, entry)| entry.id)
            .collect())
    }

    /// Every order of `account`: the active ones first, then the
    /// terminal ones, newest first within each group.
    pub fn all_order_ids(&self, account: &AccountPubKey) -> MatcherResult<Vec<OrderId>> {
        let mut entries: Vec<_> = self
            .all_index
            .prefix_scan(account.as_bytes())?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect();
        entries.sort_by(|a, b| {
            a.status
                .is_terminal()
                .cmp(&b.status.is_terminal())
                .then(b.timestamp.cmp(&a.timestamp))
                .then(a.id.cmp(&b.id))
        });
        Ok(entries.into_iter().map(|entry| entry.id).collect())
    }

    /// Drop a settled order from the per-account history. Only the
    /// owner's filled or cancelled orders can go; active orders are
    /// refused.
    pub fn delete_order(&mut self, account: &AccountPubKey, id: &OrderId) -> MatcherResult<bool> {
        let info = match self.order_info.get(id.as_bytes())? {
            Some(info) => info,
            None => return Ok(false),
        };
        if !info.status().is_terminal() {
            return Ok(false);
        }
        let order = match self.order_meta.get(id.as_bytes())? {
            Some(order) if order.sender == *account => order,
            _ => return Ok(false),
        };

        let mut batch = self.store.batch();
        batch.delete(&self.order_info, id.as_bytes())?;
        batch.delete(&self.order_meta, id.as_bytes())?;
        batch.delete(
            &self.all_index,
            &keys::all(&order.sender, order.timestamp, id),
        )?;
        batch.commit()?;
        debug!(order = %id, "settled order deleted");
        Ok(true)
    }
}
