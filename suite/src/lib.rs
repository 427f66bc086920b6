//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! Shared fixtures for the integration suite.

use std::collections::BTreeMap;

use tidex_matcher::history::OrderHistory;
use tidex_types::account::AccountPubKey;
use tidex_types::asset::{Asset, AssetId, AssetPair};
use tidex_types::order::{Order, OrderId, OrderSide};

pub const MATCHER_FEE: u64 = 300_000;

pub fn wct_btc() -> AssetPair {
    AssetPair::new(
        Some(AssetId::from_ticker("WCT")),
        Some(AssetId::from_ticker("BTC")),
    )
}

#[allow(clippy::too_many_arguments)]
pub fn limit_order(
    label: &str,
    sender: &str,
    pair: AssetPair,
    side: OrderSide,
    price: u64,
    amount: u64,
    matcher_fee: u64,
    timestamp: i64,
) -> Order {
    Order {
        id: OrderId::digest(label.as_bytes()),
        sender: AccountPubKey::from_label(sender),
        pair,
        side,
        price,
        amount,
        matcher_fee,
        timestamp,
    }
}

/// Reserved balances of `account` recomputed from first principles: the
/// sum of spend and fee obligations over its non-terminal orders. Used
/// to cross-check the incrementally maintained table after every event.
pub fn recomputed_reserved(
    history: &OrderHistory,
    account: &AccountPubKey,
) -> BTreeMap<Asset, u64> {
    let mut totals: BTreeMap<Asset, u64> = BTreeMap::new();
    for id in history.all_order_ids(account).unwrap() {
        let info = history.order_info(&id).unwrap().unwrap();
        if info.status().is_terminal() {
            continue;
        }
        let order = history.order(&id).unwrap().unwrap();
        let remaining = info.remaining();
        let (spend_asset, spend) = order.spend_obligation(remaining);
        *totals.entry(spend_asset).or_default() += spend;
        *totals.entry(None).or_default() += order.fee_obligation(remaining, info.remaining_fee);
    }
    totals.retain(|_, total| *total > 0);
    totals
}

/// The maintained reserved table of `account` as a map for comparison.
pub fn stored_reserved(history: &OrderHistory, account: &AccountPubKey) -> BTreeMap<Asset, u64> {
    history
        .reserved_balances(account)
        .unwrap()
        .into_iter()
        .collect()
}
