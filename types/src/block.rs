//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0

// crate
use crate::account::AccountPubKey;

// external
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const BLOCK_ID_LENGTH: usize = 32;

/// First block version that may carry microblocks on top.
pub const NG_BLOCK_VERSION: u8 = 3;

/// Transactions reach this layer already parsed and verified by the
/// format collaborator; the chain core only moves their serialized
/// bodies around.
pub type SerializedTransaction = Vec<u8>;

/// Opaque 32-byte block identifier. For NG blocks this is the generator
/// signature over the signed body; the parser collaborator produces the
/// hash-derived ids of legacy blocks. Compared byte-wise, used as a map
/// key everywhere.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId([u8; BLOCK_ID_LENGTH]);

impl BlockId {
    pub const fn new(bytes: [u8; BLOCK_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_ID_LENGTH] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// SHA-256 content digest, the id derivation used for unsigned
    /// bodies and deterministic fixtures.
    pub fn digest(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hasher.finalize().into())
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; BLOCK_ID_LENGTH] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", hex::encode(self.0))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerData {
    pub generator: AccountPubKey,
    pub signature: BlockId,
}

/// A finalized or liquid base block. `reference` points at the parent
/// block's id; `score` is this block's own consensus score contribution,
/// cumulated by the history store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub version: u8,
    pub reference: BlockId,
    pub signer_data: SignerData,
    pub timestamp: i64,
    pub score: u64,
    pub transactions: Vec<SerializedTransaction>,
}

impl Block {
    /// The id a block is addressed by. NG blocks are identified by their
    /// signature so that a forged block inherits the total signature of
    /// the microblock it was cut at.
    pub fn id(&self) -> BlockId {
        self.signer_data.signature
    }

    pub fn generator(&self) -> AccountPubKey {
        self.signer_data.generator
    }
}

/// An incremental extension of the liquid block. `prev_res_block_sig`
/// names the id being extended (base block or previous total),
/// `total_res_block_sig` is the id of the resulting liquid block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroBlock {
    pub version: u8,
    pub generator: AccountPubKey,
    pub transactions: Vec<SerializedTransaction>,
    pub prev_res_block_sig: BlockId,
    pub total_res_block_sig: BlockId,
    pub signature: BlockId,
}

/// Deterministic builders for chain fixtures. The ids produced here are
/// content digests, not real signatures; production blocks come from the
/// parser collaborator fully formed.
#[cfg(any(test, feature = "testing"))]
pub mod block_test_functions {
    use super::*;

    pub fn test_block(
        label: &str,
        reference: BlockId,
        generator: AccountPubKey,
        score: u64,
        transactions: Vec<SerializedTransaction>,
    ) -> Block {
        Block {
            version: NG_BLOCK_VERSION,
            reference,
            signer_data: SignerData {
                generator,
                signature: BlockId::digest(label.as_bytes()),
            },
            timestamp: 0,
            score,
            transactions,
        }
    }

    pub fn test_micro(
        label: &str,
        prev: BlockId,
        generator: AccountPubKey,
        transactions: Vec<SerializedTransaction>,
    ) -> MicroBlock {
        MicroBlock {
            version: NG_BLOCK_VERSION,
            generator,
            transactions,
            prev_res_block_sig: prev,
            total_res_block_sig: BlockId::digest(label.as_bytes()),
            signature: BlockId::digest(format!("{}-seal", label).as_bytes()),
        }
    }
}
