//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0

// external
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ASSET_ID_LENGTH: usize = 32;

/// Issued-asset identifier. The native chain asset has no id and is
/// represented as `None` wherever an [`Asset`] is expected.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId([u8; ASSET_ID_LENGTH]);

/// `None` is the native asset.
pub type Asset = Option<AssetId>;

impl AssetId {
    pub const fn new(bytes: [u8; ASSET_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ASSET_ID_LENGTH] {
        &self.0
    }

    /// Build an id from a short ASCII ticker, zero-padded on the right.
    pub fn from_ticker(ticker: &str) -> Self {
        let mut bytes = [0u8; ASSET_ID_LENGTH];
        let len = ticker.len().min(ASSET_ID_LENGTH);
        bytes[..len].copy_from_slice(&ticker.as_bytes()[..len]);
        Self(bytes)
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", hex::encode(self.0))
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The traded pair. Which side is spent and which is received derives
/// from the order side, see [`crate::order::Order`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    pub amount_asset: Asset,
    pub price_asset: Asset,
}

impl AssetPair {
    pub fn new(amount_asset: Asset, price_asset: Asset) -> Self {
        Self {
            amount_asset,
            price_asset,
        }
    }
}
