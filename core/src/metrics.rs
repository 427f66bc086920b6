//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0

// external
use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry, Histogram, IntCounter,
    Registry,
};

/// Track fork handling and forge performance of the chain head.
///
/// The recorder is injected wherever the chain core runs so that tests
/// can register against their own `Registry` and observe counts
/// deterministically.
pub struct ChainMetrics {
    /// A first microblock failed to reference the base block.
    pub block_micro_fork: IntCounter,
    /// A subsequent microblock failed to reference the liquid tip.
    pub micro_micro_fork: IntCounter,
    /// A forged prefix discarded at least one microblock.
    pub microblock_fork: IntCounter,
    /// Number of microblocks discarded per resolved fork.
    pub microblock_fork_height: Histogram,
    /// Duration of the forge walk in milliseconds.
    pub forge_block_time: Histogram,
}

impl ChainMetrics {
    pub fn new(registry: &Registry) -> Self {
        // forks rarely run deeper than a handful of microblocks
        let fork_height_buckets: Vec<f64> = (1..=32).map(|i| i as f64).collect();

        // forge walks are in-memory, step from 0 to 50ms
        let forge_time_buckets: Vec<f64> = (0..500).map(|i| i as f64 * 0.1).collect();

        Self {
            block_micro_fork: register_int_counter_with_registry!(
                "block_micro_fork",
                "The number of microblocks rejected for not referencing the base block.",
                registry
            )
            .unwrap(),
            micro_micro_fork: register_int_counter_with_registry!(
                "micro_micro_fork",
                "The number of microblocks rejected for not referencing the liquid tip.",
                registry
            )
            .unwrap(),
            microblock_fork: register_int_counter_with_registry!(
                "microblock_fork",
                "The number of block appends that discarded a microblock suffix.",
                registry
            )
            .unwrap(),
            microblock_fork_height: register_histogram_with_registry!(
                "microblock_fork_height",
                "The number of microblocks discarded per resolved fork.",
                fork_height_buckets,
                registry,
            )
            .unwrap(),
            forge_block_time: register_histogram_with_registry!(
                "forge_block_time",
                "The duration of the forge walk in milliseconds.",
                forge_time_buckets,
                registry,
            )
            .unwrap(),
        }
    }
}
