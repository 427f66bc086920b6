//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! The matcher accounting engine. [`history::OrderHistory`] tracks every
//! limit order through its lifecycle and keeps, per account and asset,
//! the exact quantity that must stay locked to cover open obligations.
//! Events are applied one at a time per account; each application is a
//! single atomic store transaction.

pub mod events;
pub mod history;
pub mod queries;
