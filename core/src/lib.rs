//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! The chain head of the tidex node. [`history::HistoryStore`] is the
//! append-only log of finalized blocks, [`liquid::LiquidHead`] holds the
//! mutable base-plus-microblocks tip, and [`writer::NgHistoryWriter`]
//! composes the two into a single chain view, finalizing microblock
//! prefixes instead of rolling back when the network forks at the tip.

pub mod history;
pub mod liquid;
pub mod metrics;
pub mod writer;
