//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0

// external
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ACCOUNT_PUB_KEY_LENGTH: usize = 32;

/// Account keys arrive from the transaction parser as raw public key
/// bytes; key management and signature checking live with the crypto
/// collaborator, so this layer only carries the bytes and uses them as
/// map keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountPubKey([u8; ACCOUNT_PUB_KEY_LENGTH]);

impl AccountPubKey {
    pub const fn new(bytes: [u8; ACCOUNT_PUB_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_PUB_KEY_LENGTH] {
        &self.0
    }

    /// Build a key from a short ASCII label, zero-padded on the right.
    /// Used for genesis accounts and deterministic fixtures.
    pub fn from_label(label: &str) -> Self {
        let mut bytes = [0u8; ACCOUNT_PUB_KEY_LENGTH];
        let len = label.len().min(ACCOUNT_PUB_KEY_LENGTH);
        bytes[..len].copy_from_slice(&label.as_bytes()[..len]);
        Self(bytes)
    }
}

impl fmt::Debug for AccountPubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountPubKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for AccountPubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
