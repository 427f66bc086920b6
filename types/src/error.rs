//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0

// crate
use crate::account::AccountPubKey;
use crate::asset::Asset;
use crate::block::BlockId;

// external
use thiserror::Error;

/// Failures of the persistent store backend or its value codec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store i/o failure: {0}")]
    Io(String),
    #[error("value codec failure: {0}")]
    Codec(String),
    #[error("column family `{0}` is missing")]
    MissingColumnFamily(&'static str),
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Rejection produced by the caller-supplied consensus validator; the
/// core surfaces it verbatim.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Error kinds surfaced by the chain subsystem.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("block {block} references {reference} which is not the last persisted block")]
    ParentMismatch { block: BlockId, reference: BlockId },
    #[error("liquid block exists, reference {0} unknown")]
    UnknownReference(BlockId),
    /// Fatal: the forged prefix failed its self-check, the liquid head
    /// is corrupted.
    #[error("forged block failed its signature self-check at {0}")]
    InvalidForgedSignature(BlockId),
    #[error("no base block in the liquid head")]
    NoBase,
    #[error("microblock generator does not match the base block generator")]
    WrongGenerator,
    #[error("first microblock does not reference the base block")]
    BlockMicroFork,
    #[error("microblock does not reference the liquid tip")]
    MicroMicroFork,
    #[error("consensus validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// Fatal: refused at open time, the four chain indices diverge.
    #[error("store indices diverge: {0}")]
    StoreInconsistent(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error kinds surfaced by the matcher order-history engine.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MatcherError {
    /// Fatal: an event application would drive a reserved balance below
    /// zero. Accounting bug, the event is not committed.
    #[error("reserved balance of {account}/{asset:?} would drop below zero by {deficit}")]
    NegativeReserved {
        account: AccountPubKey,
        asset: Asset,
        deficit: u64,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ChainResult<T> = Result<T, ChainError>;
pub type MatcherResult<T> = Result<T, MatcherError>;
