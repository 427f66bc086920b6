//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! The mutable tip of the chain: one base block plus a chain of
//! microblocks, each extending the previous total signature.
//! Microblocks are stored newest first so tip access is O(1); every
//! contract here is stated chronologically.

// crate
use tidex_types::block::{Block, BlockId, MicroBlock};
use tidex_types::error::{ChainError, ChainResult, ValidationError};

struct LiquidState {
    base: Block,
    /// Newest first. `micros.first()` is the tip, `micros.last()` the
    /// microblock directly on top of `base`.
    micros: Vec<MicroBlock>,
}

/// Component B. Either empty or a base block with zero or more
/// microblocks chained onto it.
#[derive(Default)]
pub struct LiquidHead {
    state: Option<LiquidState>,
}

impl LiquidHead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new base, dropping any previous liquid state.
    pub fn set_base(&mut self, block: Block) {
        self.state = Some(LiquidState {
            base: block,
            micros: Vec::new(),
        });
    }

    pub fn clear(&mut self) {
        self.state = None;
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none()
    }

    pub fn base(&self) -> Option<&Block> {
        self.state.as_ref().map(|state| &state.base)
    }

    pub fn base_timestamp(&self) -> Option<i64> {
        self.base().map(|base| base.timestamp)
    }

    pub fn micro_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.micros.len())
    }

    /// Total signatures of the microblock chain, newest first.
    pub fn micro_ids(&self) -> Vec<BlockId> {
        self.state.as_ref().map_or_else(Vec::new, |state| {
            state
                .micros
                .iter()
                .map(|micro| micro.total_res_block_sig)
                .collect()
        })
    }

    /// Transactions held by the liquid block: the base plus every
    /// microblock.
    pub fn transaction_count(&self) -> usize {
        self.state.as_ref().map_or(0, |state| {
            state.base.transactions.len()
                + state
                    .micros
                    .iter()
                    .map(|micro| micro.transactions.len())
                    .sum::<usize>()
        })
    }

    /// Whether `id` names the base or any microblock total of the
    /// liquid chain.
    pub fn contains(&self, id: &BlockId) -> bool {
        self.state.as_ref().map_or(false, |state| {
            state.base.id() == *id
                || state
                    .micros
                    .iter()
                    .any(|micro| micro.total_res_block_sig == *id)
        })
    }

    /// Id of the liquid tip: the newest total signature, or the base id
    /// when no microblock has landed yet.
    pub fn last_block_id(&self) -> Option<BlockId> {
        let state = self.state.as_ref()?;
        Some(
            state
                .micros
                .first()
                .map_or_else(|| state.base.id(), |micro| micro.total_res_block_sig),
        )
    }

    /// Chain `micro` onto the tip. Structural checks first, then the
    /// caller-supplied validator; the microblock lands only if both
    /// pass.
    pub fn append_micro<D>(
        &mut self,
        micro: MicroBlock,
        validator: impl FnOnce(i64) -> Result<D, ValidationError>,
    ) -> ChainResult<D> {
        let state = self.state.as_mut().ok_or(ChainError::NoBase)?;

        if micro.generator != state.base.generator() {
            return Err(ChainError::WrongGenerator);
        }
        match state.micros.first() {
            None if micro.prev_res_block_sig != state.base.id() => {
                return Err(ChainError::BlockMicroFork)
            }
            Some(tip) if micro.prev_res_block_sig != tip.total_res_block_sig => {
                return Err(ChainError::MicroMicroFork)
            }
            _ => {}
        }

        let diff = validator(state.base.timestamp)?;
        state.micros.insert(0, micro);
        Ok(diff)
    }

    /// The base block extended with every microblock in chronological
    /// order, carrying the newest total signature as its id.
    pub fn best_liquid_block(&self) -> Option<Block> {
        let state = self.state.as_ref()?;
        let mut block = state.base.clone();
        if let Some(tip) = state.micros.first() {
            block.signer_data.signature = tip.total_res_block_sig;
            for micro in state.micros.iter().rev() {
                block.transactions.extend(micro.transactions.iter().cloned());
            }
        }
        Some(block)
    }

    /// Materialize the block ending at `id`: the base plus the
    /// chronological microblock prefix up to and including the
    /// microblock whose total signature is `id`. The suffix comes back
    /// newest first as the discarded microblocks. `None` when `id` is
    /// not part of the liquid chain.
    pub fn forge_prefix_ending_at(&self, id: BlockId) -> Option<(Block, Vec<MicroBlock>)> {
        let state = self.state.as_ref()?;

        if state.base.id() == id {
            return Some((state.base.clone(), state.micros.clone()));
        }

        let mut transactions = state.base.transactions.clone();
        for (position, micro) in state.micros.iter().rev().enumerate() {
            transactions.extend(micro.transactions.iter().cloned());
            if micro.total_res_block_sig == id {
                let mut forged = state.base.clone();
                forged.signer_data.signature = id;
                forged.transactions = transactions;
                let discarded = state.micros[..state.micros.len() - 1 - position].to_vec();
                return Some((forged, discarded));
            }
        }
        None
    }
}
