//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! Component C: one chain view over the persisted history and the
//! liquid head. A new block referencing a microblock total signature
//! retroactively finalizes that prefix as the canonical block and hands
//! the suffix transactions back to the caller for the mempool, instead
//! of rolling the node back.

// crate
use crate::history::HistoryStore;
use crate::liquid::LiquidHead;
use crate::metrics::ChainMetrics;

// types
use tidex_types::block::{Block, BlockId, MicroBlock, SerializedTransaction};
use tidex_types::error::{ChainError, ChainResult, ValidationError};
use tidex_types::store::StoreConfig;

// external
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

struct WriterState {
    history: HistoryStore,
    liquid: LiquidHead,
}

/// The chain head. One reader-writer lock covers both halves so the
/// liquid head can never diverge from the persisted history under a
/// concurrent reader; appends and discards take the exclusive side,
/// every query the shared side.
pub struct NgHistoryWriter {
    state: RwLock<WriterState>,
    metrics: Arc<ChainMetrics>,
}

impl NgHistoryWriter {
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: &StoreConfig,
        metrics: Arc<ChainMetrics>,
    ) -> ChainResult<Self> {
        let history = HistoryStore::open(path, config)?;
        Ok(Self {
            state: RwLock::new(WriterState {
                history,
                liquid: LiquidHead::new(),
            }),
            metrics,
        })
    }

    /// Append `block` as the new liquid base. With an empty liquid head
    /// the block must extend the persisted tip; otherwise its reference
    /// selects the microblock prefix to finalize, and the transactions
    /// of the discarded suffix are returned.
    pub fn append_block<D>(
        &self,
        block: Block,
        validator: impl FnOnce() -> Result<D, ValidationError>,
    ) -> ChainResult<(D, Vec<SerializedTransaction>)> {
        let mut state = self.state.write().unwrap();
        let WriterState { history, liquid } = &mut *state;

        if liquid.is_empty() {
            if !history.is_empty() && history.last_block_id()? != Some(block.reference) {
                return Err(ChainError::ParentMismatch {
                    block: block.id(),
                    reference: block.reference,
                });
            }
            let diff = validator()?;
            info!(block = %block.id(), "new liquid base");
            liquid.set_base(block);
            return Ok((diff, Vec::new()));
        }

        let liquid_transactions = liquid.transaction_count();

        let started = Instant::now();
        let forged = liquid.forge_prefix_ending_at(block.reference);
        self.metrics
            .forge_block_time
            .observe(started.elapsed().as_secs_f64() * 1_000.0);

        let (forged, discarded) = forged.ok_or_else(|| {
            warn!(reference = %block.reference, "liquid block exists, reference unknown");
            ChainError::UnknownReference(block.reference)
        })?;

        // self-check of the synthetic block against totals captured
        // before the forge walk: the forge must split the liquid
        // transactions exactly between the forged prefix and the
        // discarded suffix, and the suffix must chain onto the forged
        // signature; a mismatch means the liquid head is corrupted
        let suffix_transactions: usize = discarded
            .iter()
            .map(|micro| micro.transactions.len())
            .sum();
        let suffix_chains = discarded
            .last()
            .map_or(true, |oldest| oldest.prev_res_block_sig == forged.id());
        if forged.transactions.len() + suffix_transactions != liquid_transactions || !suffix_chains
        {
            error!(forged = %forged.id(), "forged block failed its signature self-check");
            return Err(ChainError::InvalidForgedSignature(forged.id()));
        }

        let diff = validator()?;
        history.append(&forged)?;

        if !discarded.is_empty() {
            self.metrics.microblock_fork.inc();
            self.metrics
                .microblock_fork_height
                .observe(discarded.len() as f64);
            warn!(
                discarded = discarded.len(),
                forged = %forged.id(),
                "microblock fork resolved by forging a prefix"
            );
        }
        let discarded_transactions: Vec<SerializedTransaction> = discarded
            .iter()
            .rev()
            .flat_map(|micro| micro.transactions.iter().cloned())
            .collect();

        info!(block = %block.id(), forged = %forged.id(), "liquid prefix finalized");
        liquid.set_base(block);
        Ok((diff, discarded_transactions))
    }

    /// Chain a microblock onto the liquid tip.
    pub fn append_micro_block<D>(
        &self,
        micro: MicroBlock,
        validator: impl FnOnce(i64) -> Result<D, ValidationError>,
    ) -> ChainResult<D> {
        let mut state = self.state.write().unwrap();
        let result = state.liquid.append_micro(micro, validator);
        match &result {
            Ok(_) => debug!(tip = ?state.liquid.last_block_id(), "microblock appended"),
            Err(ChainError::BlockMicroFork) => {
                self.metrics.block_micro_fork.inc();
                warn!("microblock does not reference the base block");
            }
            Err(ChainError::MicroMicroFork) => {
                self.metrics.micro_micro_fork.inc();
                warn!("microblock does not reference the liquid tip");
            }
            Err(_) => {}
        }
        result
    }

    /// Drop the liquid block and return its base transactions; with an
    /// empty liquid head, unwind the last persisted block instead.
    pub fn discard_block(&self) -> ChainResult<Vec<SerializedTransaction>> {
        let mut state = self.state.write().unwrap();
        let WriterState { history, liquid } = &mut *state;

        if let Some(base) = liquid.base() {
            let transactions = base.transactions.clone();
            info!(block = %base.id(), "liquid block discarded");
            liquid.clear();
            Ok(transactions)
        } else {
            history.discard_last()?;
            Ok(Vec::new())
        }
    }

    /// Persisted height plus one when a liquid block is present.
    pub fn height(&self) -> u64 {
        let state = self.state.read().unwrap();
        state.history.height() + u64::from(!state.liquid.is_empty())
    }

    pub fn height_of(&self, id: &BlockId) -> ChainResult<Option<u64>> {
        let state = self.state.read().unwrap();
        if let Some(height) = state.history.height_of(id)? {
            return Ok(Some(height));
        }
        if state.liquid.contains(id) {
            return Ok(Some(state.history.height() + 1));
        }
        Ok(None)
    }

    /// Cumulative score at `id`; every identity of the liquid block
    /// scores as the persisted tip plus the base block score.
    pub fn score_of(&self, id: &BlockId) -> ChainResult<Option<u128>> {
        let state = self.state.read().unwrap();
        if let Some(score) = state.history.score_of(id)? {
            return Ok(Some(score));
        }
        if state.liquid.contains(id) {
            let base_score = state.liquid.base().map_or(0, |base| base.score);
            return Ok(Some(state.history.score()? + base_score as u128));
        }
        Ok(None)
    }

    pub fn contains(&self, id: &BlockId) -> ChainResult<bool> {
        let state = self.state.read().unwrap();
        Ok(state.history.contains(id)? || state.liquid.contains(id))
    }

    pub fn last_block_id(&self) -> ChainResult<Option<BlockId>> {
        let state = self.state.read().unwrap();
        match state.liquid.last_block_id() {
            Some(id) => Ok(Some(id)),
            None => state.history.last_block_id(),
        }
    }

    /// Up to `count` ids, liquid tip first, then the persisted chain
    /// downwards.
    pub fn last_block_ids(&self, count: usize) -> ChainResult<Vec<BlockId>> {
        let state = self.state.read().unwrap();
        match state.liquid.last_block_id() {
            Some(tip) if count > 0 => {
                let mut ids = vec![tip];
                ids.extend(state.history.last_block_ids(count - 1)?);
                Ok(ids)
            }
            _ => state.history.last_block_ids(count),
        }
    }

    pub fn best_liquid_block(&self) -> Option<Block> {
        self.state.read().unwrap().liquid.best_liquid_block()
    }

    /// Microblock total signatures of the liquid chain, newest first.
    pub fn micro_block_ids(&self) -> Vec<BlockId> {
        self.state.read().unwrap().liquid.micro_ids()
    }

    pub fn block_at(&self, height: u64) -> ChainResult<Option<Block>> {
        self.state.read().unwrap().history.block_at(height)
    }

    pub fn persisted_height(&self) -> u64 {
        self.state.read().unwrap().history.height()
    }

    pub fn score(&self) -> ChainResult<u128> {
        let state = self.state.read().unwrap();
        let liquid_score = state.liquid.base().map_or(0, |base| base.score as u128);
        Ok(state.history.score()? + liquid_score)
    }
}

#[cfg(test)]
mod writer_tests {
    use super::*;
    use prometheus::Registry;
    use tidex_types::block::block_test_functions::{test_block, test_micro};
    use tidex_types::block::BLOCK_ID_LENGTH;
    use tidex_types::account::AccountPubKey;

    fn forger() -> AccountPubKey {
        AccountPubKey::from_label("forger")
    }

    fn genesis_ref() -> BlockId {
        BlockId::new([0; BLOCK_ID_LENGTH])
    }

    fn accept() -> Result<(), ValidationError> {
        Ok(())
    }

    fn open(dir: &tempfile::TempDir) -> (NgHistoryWriter, Arc<ChainMetrics>) {
        let metrics = Arc::new(ChainMetrics::new(&Registry::default()));
        let writer = NgHistoryWriter::open(
            dir.path(),
            &StoreConfig::for_testing(),
            Arc::clone(&metrics),
        )
        .unwrap();
        (writer, metrics)
    }

    #[test]
    fn first_block_becomes_the_liquid_base() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, _) = open(&dir);

        let b0 = test_block("b0", genesis_ref(), forger(), 10, vec![]);
        let (_, discarded) = writer.append_block(b0.clone(), accept).unwrap();
        assert!(discarded.is_empty());
        assert_eq!(writer.height(), 1);
        assert_eq!(writer.persisted_height(), 0);
        assert_eq!(writer.last_block_id().unwrap(), Some(b0.id()));
    }

    #[test]
    fn empty_liquid_rejects_unknown_parent() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, _) = open(&dir);

        let b0 = test_block("b0", genesis_ref(), forger(), 10, vec![]);
        writer.append_block(b0.clone(), accept).unwrap();
        writer.discard_block().unwrap();

        // liquid is empty again and history is empty, so any reference works
        let b1 = test_block("b1", b0.id(), forger(), 10, vec![]);
        writer.append_block(b1.clone(), accept).unwrap();

        let b2 = test_block("b2", b1.id(), forger(), 10, vec![]);
        writer.append_block(b2.clone(), accept).unwrap();
        assert_eq!(writer.persisted_height(), 1, "b1 must have been finalized");

        writer.discard_block().unwrap();
        let orphan = test_block("orphan", b0.id(), forger(), 10, vec![]);
        assert!(matches!(
            writer.append_block(orphan, accept),
            Err(ChainError::ParentMismatch { .. })
        ));
    }

    #[test]
    fn unknown_liquid_reference_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, _) = open(&dir);

        let b0 = test_block("b0", genesis_ref(), forger(), 10, vec![]);
        writer.append_block(b0, accept).unwrap();

        let stranger = test_block("stranger", BlockId::digest(b"elsewhere"), forger(), 10, vec![]);
        assert!(matches!(
            writer.append_block(stranger, accept),
            Err(ChainError::UnknownReference(_))
        ));
    }

    #[test]
    fn micro_fork_rejections_increment_their_counters() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, metrics) = open(&dir);

        let b0 = test_block("b0", genesis_ref(), forger(), 10, vec![]);
        writer.append_block(b0.clone(), accept).unwrap();

        let stray = test_micro("stray", BlockId::digest(b"elsewhere"), forger(), vec![]);
        assert!(writer.append_micro_block(stray, |_| accept()).is_err());
        assert_eq!(metrics.block_micro_fork.get(), 1);

        let m1 = test_micro("m1", b0.id(), forger(), vec![]);
        writer.append_micro_block(m1, |_| accept()).unwrap();
        let rival = test_micro("rival", b0.id(), forger(), vec![]);
        assert!(writer.append_micro_block(rival, |_| accept()).is_err());
        assert_eq!(metrics.micro_micro_fork.get(), 1);
    }

    #[test]
    fn validator_rejection_aborts_the_append() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, _) = open(&dir);

        let b0 = test_block("b0", genesis_ref(), forger(), 10, vec![]);
        let rejected: ChainResult<((), Vec<SerializedTransaction>)> = writer
            .append_block(b0, || Err(ValidationError("stale generator".into())));
        assert!(matches!(rejected, Err(ChainError::Validation(_))));
        assert_eq!(writer.height(), 0);
    }

    #[test]
    fn score_and_height_cover_the_liquid_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, _) = open(&dir);

        let b0 = test_block("b0", genesis_ref(), forger(), 10, vec![]);
        writer.append_block(b0.clone(), accept).unwrap();
        let m1 = test_micro("m1", b0.id(), forger(), vec![vec![1]]);
        let m1_id = m1.total_res_block_sig;
        writer.append_micro_block(m1, |_| accept()).unwrap();

        assert_eq!(writer.height_of(&m1_id).unwrap(), Some(1));
        assert_eq!(writer.score_of(&m1_id).unwrap(), Some(10));
        assert_eq!(writer.score_of(&b0.id()).unwrap(), Some(10));
        assert_eq!(writer.last_block_ids(3).unwrap(), vec![m1_id]);
    }
}
