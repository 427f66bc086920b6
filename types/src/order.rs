//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! Limit-order model and the fixed-point arithmetic shared by the
//! matcher engine. Prices are integers scaled by [`PRICE_CONSTANT`];
//! every conversion goes through 128-bit intermediates so that
//! `amount * price` cannot overflow, and rounding is explicit: spend
//! and receive conversions floor, fee proration ceils.

// crate
use crate::account::AccountPubKey;
use crate::asset::{Asset, AssetPair};

// external
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point denominator of the `price` field.
pub const PRICE_CONSTANT: u64 = 100_000_000;

pub const ORDER_ID_LENGTH: usize = 32;

/// Digest of the signed order body, assigned by the parser collaborator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId([u8; ORDER_ID_LENGTH]);

impl OrderId {
    pub const fn new(bytes: [u8; ORDER_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ORDER_ID_LENGTH] {
        &self.0
    }

    pub fn digest(content: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hasher.finalize().into())
    }
}

impl fmt::Debug for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderId({})", hex::encode(self.0))
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub sender: AccountPubKey,
    pub pair: AssetPair,
    pub side: OrderSide,
    /// Price of one amount-asset unit in price-asset units, scaled by
    /// [`PRICE_CONSTANT`].
    pub price: u64,
    pub amount: u64,
    pub matcher_fee: u64,
    pub timestamp: i64,
}

impl Order {
    /// The asset this order pays with: price asset for a buy, amount
    /// asset for a sell.
    pub fn spend_asset(&self) -> Asset {
        match self.side {
            OrderSide::Buy => self.pair.price_asset,
            OrderSide::Sell => self.pair.amount_asset,
        }
    }

    /// The asset this order is paid in, the opposite leg of
    /// [`Order::spend_asset`].
    pub fn receive_asset(&self) -> Asset {
        match self.side {
            OrderSide::Buy => self.pair.amount_asset,
            OrderSide::Sell => self.pair.price_asset,
        }
    }

    /// Smallest amount-asset quantity that settles to a whole
    /// price-asset unit at this price. Partial fills never leave a
    /// remainder below this step still tradable.
    pub fn min_amount_of_amount_asset(&self) -> u64 {
        ceil_div(PRICE_CONSTANT as u128, self.price as u128)
    }

    /// Outstanding spend this order imposes, in spend-asset units.
    pub fn spend_obligation(&self, remaining: u64) -> (Asset, u64) {
        (
            self.spend_asset(),
            spend_amount(self.side, remaining, self.price),
        )
    }

    /// Outstanding fee this order imposes on the native asset. When the
    /// receive side is also native, the expected receipts cover the fee
    /// first and only the uncovered part stays reserved.
    pub fn fee_obligation(&self, remaining: u64, remaining_fee: u64) -> u64 {
        let netted = if self.receive_asset().is_none() {
            receive_amount(self.side, remaining, self.price)
        } else {
            0
        };
        remaining_fee.saturating_sub(netted)
    }
}

/// Largest executable quantity not exceeding `amount` at `price`: the
/// floor-settled total converted back up. Returns 0 when `amount` does
/// not settle to a single price-asset unit.
pub fn corrected_amount(amount: u64, price: u64) -> u64 {
    let settled = (amount as u128 * price as u128) / PRICE_CONSTANT as u128;
    ceil_div(settled * PRICE_CONSTANT as u128, price as u128)
}

/// Spend-asset units a position of `amount` costs at `price`.
pub fn spend_amount(side: OrderSide, amount: u64, price: u64) -> u64 {
    match side {
        OrderSide::Buy => ((amount as u128 * price as u128) / PRICE_CONSTANT as u128) as u64,
        OrderSide::Sell => amount,
    }
}

/// Receive-asset units a position of `amount` yields at `price`.
pub fn receive_amount(side: OrderSide, amount: u64, price: u64) -> u64 {
    match side {
        OrderSide::Buy => amount,
        OrderSide::Sell => ((amount as u128 * price as u128) / PRICE_CONSTANT as u128) as u64,
    }
}

/// Fee still owed after `remaining` of `amount` is left unfilled,
/// rounded up so the matcher never under-collects.
pub fn prorated_fee(matcher_fee: u64, remaining: u64, amount: u64) -> u64 {
    if amount == 0 {
        return 0;
    }
    ceil_div(matcher_fee as u128 * remaining as u128, amount as u128)
}

fn ceil_div(dividend: u128, divisor: u128) -> u64 {
    ((dividend + divisor - 1) / divisor) as u64
}

/// Mutable per-order accounting record. `amount`, `min_amount` and the
/// fee basis are fixed at installation; `filled`, `canceled`,
/// `remaining_fee` and `unsafe_total_spend` advance with events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub amount: u64,
    pub filled: u64,
    pub canceled: bool,
    pub min_amount: Option<u64>,
    pub remaining_fee: u64,
    /// Spend-asset units actually settled so far, accumulated per fill
    /// with floor rounding. `None` until the first execution.
    pub unsafe_total_spend: Option<u64>,
}

impl OrderInfo {
    pub fn remaining(&self) -> u64 {
        self.amount - self.filled
    }

    /// An order whose remainder cannot settle to a whole price-asset
    /// unit will never trade again, so it counts as filled even though
    /// `filled < amount`. Cancellation wins over everything.
    pub fn status(&self) -> OrderStatus {
        if self.canceled {
            OrderStatus::Cancelled(self.filled)
        } else if self.filled == 0 {
            OrderStatus::Accepted
        } else if self.remaining() <= self.min_amount.unwrap_or(0) {
            OrderStatus::Filled(self.filled)
        } else {
            OrderStatus::PartiallyFilled(self.filled)
        }
    }

    pub fn total_spend(&self, order: &Order) -> u64 {
        self.unsafe_total_spend
            .unwrap_or_else(|| spend_amount(order.side, self.filled, order.price))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    NotFound,
    Accepted,
    PartiallyFilled(u64),
    Filled(u64),
    Cancelled(u64),
}

impl OrderStatus {
    /// Terminal orders no longer hold reservations and may be deleted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled(_) | OrderStatus::Cancelled(_))
    }
}

#[cfg(test)]
mod order_math_tests {
    use super::*;
    use crate::asset::AssetId;

    fn order(side: OrderSide, price: u64, amount: u64, matcher_fee: u64) -> Order {
        Order {
            id: OrderId::digest(b"order"),
            sender: AccountPubKey::from_label("sender"),
            pair: AssetPair::new(
                Some(AssetId::from_ticker("WCT")),
                Some(AssetId::from_ticker("BTC")),
            ),
            side,
            price,
            amount,
            matcher_fee,
            timestamp: 1,
        }
    }

    #[test]
    fn corrected_amount_snaps_to_price_step() {
        // 425532 at price 238e-8 settles to a single price-asset unit
        assert_eq!(corrected_amount(425_532, 238), 420_169);
        assert_eq!(corrected_amount(840_340, 238), 840_337);
        // below a whole unit nothing is executable
        assert_eq!(corrected_amount(1, 238), 0);
        // whole multiples stay put
        assert_eq!(corrected_amount(1_000_000_000, 80_000), 1_000_000_000);
    }

    #[test]
    fn min_amount_is_one_price_unit() {
        assert_eq!(order(OrderSide::Buy, 238, 425_532, 0).min_amount_of_amount_asset(), 420_169);
        assert_eq!(order(OrderSide::Buy, 70_000, 10_000, 0).min_amount_of_amount_asset(), 1_429);
    }

    #[test]
    fn fee_proration_rounds_up() {
        assert_eq!(prorated_fee(300_000, 420_171, 840_340), 150_001);
        assert_eq!(prorated_fee(300_000, 5_363, 425_532), 3_781);
        assert_eq!(prorated_fee(300_000, 0, 840_340), 0);
        assert_eq!(prorated_fee(300_000, 840_340, 840_340), 300_000);
    }

    #[test]
    fn buy_order_spends_price_asset() {
        let o = order(OrderSide::Buy, 70_000, 10_000, 300_000);
        let (asset, spend) = o.spend_obligation(o.amount);
        assert_eq!(asset, Some(AssetId::from_ticker("BTC")));
        assert_eq!(spend, 7, "10000 at 0.0007 must settle to 7");
        assert_eq!(o.fee_obligation(o.amount, o.matcher_fee), 300_000);
    }

    #[test]
    fn native_receipts_cover_the_fee() {
        // sell into a native price asset: expected receipts net the fee
        let mut o = order(OrderSide::Sell, 70_000, 100_000, 1_000);
        o.pair = AssetPair::new(Some(AssetId::from_ticker("BTC")), None);
        assert_eq!(o.fee_obligation(o.amount, o.matcher_fee), 1_000 - 70);

        // buy of a native amount asset receiving more than the fee
        let mut o = order(OrderSide::Buy, 1_000_000, 100_000, 1_000);
        o.pair = AssetPair::new(None, Some(AssetId::from_ticker("BTC")));
        assert_eq!(o.fee_obligation(o.amount, o.matcher_fee), 0);
    }

    #[test]
    fn status_follows_min_amount() {
        let info = OrderInfo {
            amount: 425_532,
            filled: 420_169,
            canceled: false,
            min_amount: Some(420_169),
            remaining_fee: 3_781,
            unsafe_total_spend: Some(1),
        };
        // remaining 5363 can never settle again
        assert_eq!(info.status(), OrderStatus::Filled(420_169));

        let partial = OrderInfo {
            amount: 840_340,
            filled: 420_169,
            canceled: false,
            min_amount: Some(420_169),
            remaining_fee: 150_001,
            unsafe_total_spend: Some(1),
        };
        assert_eq!(partial.status(), OrderStatus::PartiallyFilled(420_169));

        let canceled = OrderInfo {
            canceled: true,
            ..partial
        };
        assert_eq!(canceled.status(), OrderStatus::Cancelled(420_169));
    }
}
