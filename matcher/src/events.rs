//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0

// types
use tidex_types::order::{corrected_amount, Order};

// external
use serde::{Deserialize, Serialize};

/// A limit order entered the book (or a remainder was re-offered after
/// a partial fill; the processor detects the live id and no-ops).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderAdded {
    pub order: Order,
}

/// The submitted order traded against the resting counter order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderExecuted {
    pub submitted: Order,
    pub counter: Order,
}

/// An order left the book without (fully) trading. `unmatchable` marks
/// remainders the engine dropped because they fell below the minimum
/// tradable step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order: Order,
    pub unmatchable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OrderEvent {
    Added(OrderAdded),
    Executed(OrderExecuted),
    Cancelled(OrderCancelled),
}

/// Quantity a match settles: the smaller remainder, snapped down to the
/// execution-price step so the trade converts to whole price-asset
/// units.
pub fn executed_amount(
    submitted_remaining: u64,
    counter_remaining: u64,
    execution_price: u64,
) -> u64 {
    corrected_amount(submitted_remaining.min(counter_remaining), execution_price)
}

/// Unfilled part of one side after an execution. The matching engine
/// re-offers the submitted remainder as a fresh [`OrderAdded`] built
/// from [`OrderRemainder::as_order`].
#[derive(Clone, Debug)]
pub struct OrderRemainder {
    pub order: Order,
    pub amount: u64,
    pub fee: u64,
}

impl OrderRemainder {
    pub fn as_order(&self) -> Order {
        Order {
            amount: self.amount,
            matcher_fee: self.fee,
            ..self.order.clone()
        }
    }
}

/// What [`crate::history::OrderHistory::order_executed`] settled.
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub executed_amount: u64,
    pub submitted_remaining: OrderRemainder,
    pub counter_remaining: OrderRemainder,
}

#[cfg(test)]
mod executed_amount_tests {
    use super::*;

    #[test]
    fn clamps_to_the_execution_price_step() {
        // the partial-fill rounding scenario: both sides at 238e-8
        assert_eq!(executed_amount(425_532, 840_340, 238), 420_169);
        // equal remainders that settle exactly
        assert_eq!(executed_amount(100_000, 100_000, 80_000), 100_000);
        // a dust remainder cannot execute at all
        assert_eq!(executed_amount(1_000, 840_340, 238), 0);
    }
}
