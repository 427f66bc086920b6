//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! Durable append-only log of finalized blocks. Four column families
//! move in lock step: block bodies and ids by height, heights by id,
//! and the cumulative chain score by height. Every mutation commits the
//! four together in one batch, and opening refuses a store whose
//! indices have diverged.

// crate
use tidex_types::account::AccountPubKey;
use tidex_types::block::{Block, BlockId};
use tidex_types::error::{ChainError, ChainResult};
use tidex_types::store::{KvStore, StoreConfig, StoreMap};

// external
use std::path::Path;
use tracing::info;

pub const CF_BLOCKS: &str = "blocks";
pub const CF_SIGNATURES: &str = "signatures";
pub const CF_SIGNATURES_REVERSE: &str = "signatures_reverse";
pub const CF_SCORE: &str = "score";

pub const CHAIN_COLUMN_FAMILIES: &[&str] =
    &[CF_BLOCKS, CF_SIGNATURES, CF_SIGNATURES_REVERSE, CF_SCORE];

fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// Component A. Heights are 1-based; height 0 is the empty chain.
pub struct HistoryStore {
    store: KvStore,
    blocks: StoreMap<Block>,
    signatures: StoreMap<BlockId>,
    signatures_reverse: StoreMap<u64>,
    score: StoreMap<u128>,
    height: u64,
}

impl HistoryStore {
    pub fn open<P: AsRef<Path>>(path: P, config: &StoreConfig) -> ChainResult<Self> {
        let store = KvStore::open(path, config, CHAIN_COLUMN_FAMILIES)?;
        let blocks = store.map::<Block>(CF_BLOCKS);
        let signatures = store.map::<BlockId>(CF_SIGNATURES);
        let signatures_reverse = store.map::<u64>(CF_SIGNATURES_REVERSE);
        let score = store.map::<u128>(CF_SCORE);

        let cardinalities = [
            (CF_BLOCKS, blocks.count()?),
            (CF_SIGNATURES, signatures.count()?),
            (CF_SIGNATURES_REVERSE, signatures_reverse.count()?),
            (CF_SCORE, score.count()?),
        ];
        let height = cardinalities[0].1;
        if cardinalities.iter().any(|(_, count)| *count != height) {
            return Err(ChainError::StoreInconsistent(format!(
                "column family cardinalities diverge: {:?}",
                cardinalities
            )));
        }

        info!(height, "chain history opened");
        Ok(Self {
            store,
            blocks,
            signatures,
            signatures_reverse,
            score,
            height,
        })
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    /// Append `block` on top of the chain. The parent check is skipped
    /// for the first block only.
    pub fn append(&mut self, block: &Block) -> ChainResult<()> {
        if self.height > 0 {
            let last = self.last_block_id()?.ok_or_else(|| {
                ChainError::StoreInconsistent(format!("missing signature at height {}", self.height))
            })?;
            if last != block.reference {
                return Err(ChainError::ParentMismatch {
                    block: block.id(),
                    reference: block.reference,
                });
            }
        }

        let next = self.height + 1;
        let cumulative = self.score()? + block.score as u128;

        let mut batch = self.store.batch();
        batch.put(&self.blocks, &height_key(next), block)?;
        batch.put(&self.signatures, &height_key(next), &block.id())?;
        batch.put(&self.signatures_reverse, block.id().as_bytes(), &next)?;
        batch.put(&self.score, &height_key(next), &cumulative)?;
        batch.commit()?;

        self.height = next;
        info!(height = next, block = %block.id(), "block finalized");
        Ok(())
    }

    /// Remove the block at the current height. No-op on an empty chain.
    pub fn discard_last(&mut self) -> ChainResult<()> {
        if self.height == 0 {
            return Ok(());
        }
        let id = self.last_block_id()?.ok_or_else(|| {
            ChainError::StoreInconsistent(format!("missing signature at height {}", self.height))
        })?;

        let mut batch = self.store.batch();
        batch.delete(&self.blocks, &height_key(self.height))?;
        batch.delete(&self.signatures, &height_key(self.height))?;
        batch.delete(&self.signatures_reverse, id.as_bytes())?;
        batch.delete(&self.score, &height_key(self.height))?;
        batch.commit()?;

        info!(height = self.height, block = %id, "block discarded from history");
        self.height -= 1;
        Ok(())
    }

    pub fn block_at(&self, height: u64) -> ChainResult<Option<Block>> {
        if height == 0 || height > self.height {
            return Ok(None);
        }
        Ok(self.blocks.get(&height_key(height))?)
    }

    /// Raw stored body, relayed to peers without decoding.
    pub fn block_bytes(&self, height: u64) -> ChainResult<Option<Vec<u8>>> {
        if height == 0 || height > self.height {
            return Ok(None);
        }
        Ok(self.blocks.get_raw(&height_key(height))?)
    }

    pub fn block_by_id(&self, id: &BlockId) -> ChainResult<Option<Block>> {
        match self.height_of(id)? {
            Some(height) => self.block_at(height),
            None => Ok(None),
        }
    }

    pub fn height_of(&self, id: &BlockId) -> ChainResult<Option<u64>> {
        Ok(self.signatures_reverse.get(id.as_bytes())?)
    }

    pub fn contains(&self, id: &BlockId) -> ChainResult<bool> {
        Ok(self.signatures_reverse.contains(id.as_bytes())?)
    }

    /// Cumulative score at the block with the given id.
    pub fn score_of(&self, id: &BlockId) -> ChainResult<Option<u128>> {
        match self.height_of(id)? {
            Some(height) => Ok(self.score.get(&height_key(height))?),
            None => Ok(None),
        }
    }

    /// Cumulative score at the tip, 0 for the empty chain.
    pub fn score(&self) -> ChainResult<u128> {
        if self.height == 0 {
            return Ok(0);
        }
        self.score.get(&height_key(self.height))?.ok_or_else(|| {
            ChainError::StoreInconsistent(format!("missing score at height {}", self.height))
        })
    }

    pub fn last_block(&self) -> ChainResult<Option<Block>> {
        self.block_at(self.height)
    }

    pub fn last_block_id(&self) -> ChainResult<Option<BlockId>> {
        if self.height == 0 {
            return Ok(None);
        }
        Ok(self.signatures.get(&height_key(self.height))?)
    }

    /// Up to `count` block ids walking down from the tip.
    pub fn last_block_ids(&self, count: usize) -> ChainResult<Vec<BlockId>> {
        let mut ids = Vec::with_capacity(count.min(self.height as usize));
        let mut height = self.height;
        while height > 0 && ids.len() < count {
            if let Some(id) = self.signatures.get(&height_key(height))? {
                ids.push(id);
            }
            height -= 1;
        }
        Ok(ids)
    }

    /// Ids of the blocks generated by `account` in the closed height
    /// range `[from, to]`.
    pub fn generated_by(
        &self,
        account: &AccountPubKey,
        from: u64,
        to: u64,
    ) -> ChainResult<Vec<BlockId>> {
        let mut ids = Vec::new();
        for height in from.max(1)..=to.min(self.height) {
            if let Some(block) = self.block_at(height)? {
                if block.generator() == *account {
                    ids.push(block.id());
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod history_tests {
    use super::*;
    use tidex_types::block::block_test_functions::test_block;
    use tidex_types::block::BLOCK_ID_LENGTH;

    fn genesis_ref() -> BlockId {
        BlockId::new([0; BLOCK_ID_LENGTH])
    }

    fn forger() -> AccountPubKey {
        AccountPubKey::from_label("forger")
    }

    fn open(dir: &tempfile::TempDir) -> HistoryStore {
        HistoryStore::open(dir.path(), &StoreConfig::for_testing()).unwrap()
    }

    #[test]
    fn appends_track_height_ids_and_score() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = open(&dir);
        assert!(history.is_empty());

        let b1 = test_block("b1", genesis_ref(), forger(), 10, vec![vec![1]]);
        let b2 = test_block("b2", b1.id(), forger(), 15, vec![]);
        history.append(&b1).unwrap();
        history.append(&b2).unwrap();

        assert_eq!(history.height(), 2);
        assert_eq!(history.block_at(1).unwrap().unwrap(), b1);
        assert_eq!(history.height_of(&b2.id()).unwrap(), Some(2));
        assert_eq!(history.score_of(&b1.id()).unwrap(), Some(10));
        assert_eq!(history.score().unwrap(), 25);
        assert_eq!(
            history.last_block_ids(5).unwrap(),
            vec![b2.id(), b1.id()],
            "ids must come back tip first"
        );
        assert!(history.block_bytes(1).unwrap().is_some());
        assert_eq!(history.block_at(3).unwrap(), None);
    }

    #[test]
    fn append_rejects_wrong_parent() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = open(&dir);

        let b1 = test_block("b1", genesis_ref(), forger(), 10, vec![]);
        history.append(&b1).unwrap();

        let orphan = test_block("orphan", genesis_ref(), forger(), 10, vec![]);
        assert!(matches!(
            history.append(&orphan),
            Err(ChainError::ParentMismatch { .. })
        ));
        assert_eq!(history.height(), 1);
    }

    #[test]
    fn discard_last_unwinds_all_indices() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = open(&dir);

        let b1 = test_block("b1", genesis_ref(), forger(), 10, vec![]);
        let b2 = test_block("b2", b1.id(), forger(), 15, vec![]);
        history.append(&b1).unwrap();
        history.append(&b2).unwrap();

        history.discard_last().unwrap();
        assert_eq!(history.height(), 1);
        assert_eq!(history.height_of(&b2.id()).unwrap(), None);
        assert_eq!(history.score().unwrap(), 10);

        // the discarded parent can be re-appended
        let b2_again = test_block("b2-again", b1.id(), forger(), 7, vec![]);
        history.append(&b2_again).unwrap();
        assert_eq!(history.score().unwrap(), 17);
    }

    #[test]
    fn generated_by_filters_on_generator() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = open(&dir);
        let other = AccountPubKey::from_label("other");

        let b1 = test_block("b1", genesis_ref(), forger(), 1, vec![]);
        let b2 = test_block("b2", b1.id(), other, 1, vec![]);
        let b3 = test_block("b3", b2.id(), forger(), 1, vec![]);
        for block in [&b1, &b2, &b3] {
            history.append(block).unwrap();
        }

        assert_eq!(
            history.generated_by(&forger(), 1, 3).unwrap(),
            vec![b1.id(), b3.id()]
        );
        assert_eq!(history.generated_by(&forger(), 2, 2).unwrap(), vec![]);
    }

    #[test]
    fn open_refuses_diverged_indices() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut history = open(&dir);
            let b1 = test_block("b1", genesis_ref(), forger(), 10, vec![]);
            history.append(&b1).unwrap();
        }
        {
            // tamper: an extra signature row without a body
            let store = KvStore::open(
                dir.path(),
                &StoreConfig::for_testing(),
                CHAIN_COLUMN_FAMILIES,
            )
            .unwrap();
            let signatures = store.map::<BlockId>(CF_SIGNATURES);
            signatures
                .put(&height_key(2), &BlockId::digest(b"stray"))
                .unwrap();
        }
        assert!(matches!(
            HistoryStore::open(dir.path(), &StoreConfig::for_testing()),
            Err(ChainError::StoreInconsistent(_))
        ));
    }
}
