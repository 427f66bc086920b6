//! Copyright (c) 2022, BTI
//! SPDX-License-Identifier: Apache-2.0
//!
//! Typed column-family wrapper over the RocksDB backend. Each table is a
//! [`StoreMap`] handle: keys are raw byte strings built by the caller
//! (integer key parts are big-endian so iteration order equals numeric
//! order), values go through bincode. Mutations from one public
//! operation are grouped into a [`StoreBatch`] and committed in a single
//! `WriteBatch`, so partial updates are never observable.

// crate
use crate::error::StoreError;

// external
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub write_buffer_size: usize,
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

impl StoreConfig {
    /// Small buffers, no fsync. Unit and integration tests only.
    pub fn for_testing() -> Self {
        Self {
            write_buffer_size: 4 * 1024 * 1024,
            sync_writes: false,
        }
    }
}

/// Shared handle on one RocksDB instance and its column families.
pub struct KvStore {
    db: Arc<DB>,
    sync_writes: bool,
}

impl KvStore {
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: &StoreConfig,
        column_families: &[&'static str],
    ) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let descriptors: Vec<ColumnFamilyDescriptor> = column_families
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;
        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.sync_writes,
        })
    }

    /// Typed handle on one column family.
    pub fn map<V>(&self, cf_name: &'static str) -> StoreMap<V> {
        StoreMap {
            db: Arc::clone(&self.db),
            sync_writes: self.sync_writes,
            cf_name,
            _value: PhantomData,
        }
    }

    pub fn batch(&self) -> StoreBatch<'_> {
        StoreBatch {
            store: self,
            batch: WriteBatch::default(),
        }
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::MissingColumnFamily(name))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }
}

pub struct StoreMap<V> {
    db: Arc<DB>,
    sync_writes: bool,
    cf_name: &'static str,
    _value: PhantomData<V>,
}

impl<V> StoreMap<V> {
    pub fn name(&self) -> &'static str {
        self.cf_name
    }

    fn cf(&self) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(self.cf_name)
            .ok_or(StoreError::MissingColumnFamily(self.cf_name))
    }

    /// Stored bytes without decoding, for callers that relay raw bodies.
    pub fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get_cf(self.cf()?, key)?)
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.db.get_pinned_cf(self.cf()?, key)?.is_some())
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        Ok(self.db.delete_cf_opt(self.cf()?, key, &opts)?)
    }

    /// Number of entries. Full scan, used by open-time consistency
    /// checks only.
    pub fn count(&self) -> Result<u64, StoreError> {
        let mut entries = 0u64;
        for item in self.db.iterator_cf(self.cf()?, IteratorMode::Start) {
            item?;
            entries += 1;
        }
        Ok(entries)
    }
}

impl<V: Serialize + DeserializeOwned> StoreMap<V> {
    pub fn get(&self, key: &[u8]) -> Result<Option<V>, StoreError> {
        match self.db.get_pinned_cf(self.cf()?, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &[u8], value: &V) -> Result<(), StoreError> {
        let bytes = bincode::serialize(value)?;
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        Ok(self.db.put_cf_opt(self.cf()?, key, bytes, &opts)?)
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, V)>, StoreError> {
        let mut entries = Vec::new();
        let mode = IteratorMode::From(prefix, Direction::Forward);
        for item in self.db.iterator_cf(self.cf()?, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), bincode::deserialize(&value)?));
        }
        Ok(entries)
    }
}

/// Write set of one public operation; nothing is visible until
/// [`StoreBatch::commit`].
pub struct StoreBatch<'a> {
    store: &'a KvStore,
    batch: WriteBatch,
}

impl<'a> StoreBatch<'a> {
    pub fn put<V: Serialize>(
        &mut self,
        map: &StoreMap<V>,
        key: &[u8],
        value: &V,
    ) -> Result<(), StoreError> {
        let bytes = bincode::serialize(value)?;
        self.batch.put_cf(self.store.cf(map.cf_name)?, key, bytes);
        Ok(())
    }

    pub fn delete<V>(&mut self, map: &StoreMap<V>, key: &[u8]) -> Result<(), StoreError> {
        self.batch.delete_cf(self.store.cf(map.cf_name)?, key);
        Ok(())
    }

    pub fn commit(self) -> Result<(), StoreError> {
        Ok(self
            .store
            .db
            .write_opt(self.batch, &self.store.write_opts())?)
    }
}
