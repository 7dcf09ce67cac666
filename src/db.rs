// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Thin façade over RocksDB: open with the overlay tuning profile, point
//! reads, atomic batch writes with the WAL disabled, and raw bidirectional
//! cursors over the default column family.

use crate::{
    config::{gen_rocksdb_options, DbConfig},
    errors::{OverlayDbError, Result},
};
use rocksdb::{DBRawIterator, FlushOptions, WriteBatch, WriteOptions};
use std::path::Path;
use tracing::info;

/// Sentinels reserve the single-byte keys 0x00 and 0xff. Their presence
/// keeps raw cursors from going invalid while stepping past either end of a
/// prefix range, so view and undo prefixes must start within 0x01 - 0xfe.
pub const SENTINEL_MIN: [u8; 1] = [0x00];
pub const SENTINEL_MAX: [u8; 1] = [0xff];

pub struct Database {
    db: rocksdb::DB,
}

impl Database {
    /// Opens (or creates) the database at `path` and installs the two
    /// sentinel keys if they are missing, in one atomic batch.
    pub fn open(path: impl AsRef<Path>, config: &DbConfig) -> Result<Self> {
        let opts = gen_rocksdb_options(config);
        let db = rocksdb::DB::open(&opts, path.as_ref())
            .map_err(|e| OverlayDbError::store("open: ", e))?;
        let db = Self { db };

        let mut batch = WriteBatch::default();
        let mut installed = false;
        for sentinel in [SENTINEL_MIN, SENTINEL_MAX] {
            if db.get(&sentinel)?.is_none() {
                batch.put(sentinel, b"");
                installed = true;
            }
        }
        if installed {
            db.write(batch)?;
        }

        info!(
            path = %path.as_ref().display(),
            sentinels_installed = installed,
            "Opened overlaydb database."
        );
        Ok(db)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .db
            .get_pinned(key)
            .map_err(|e| OverlayDbError::store("get: ", e))?
            .map(|slice| slice.to_vec()))
    }

    /// Commits `batch` atomically. The WAL is disabled: the engine is an
    /// overlay, and durability of individual writes is a caller concern
    /// (see [`Database::flush`]).
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.disable_wal(true);
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| OverlayDbError::store("write batch", e))
    }

    /// Forces a memtable flush.
    pub fn flush(&self, wait: bool) -> Result<()> {
        let mut flush_opts = FlushOptions::default();
        flush_opts.set_wait(wait);
        self.db
            .flush_opt(&flush_opts)
            .map_err(|e| OverlayDbError::store("flush: ", e))
    }

    pub fn raw_iterator(&self) -> DBRawIterator<'_> {
        self.db.raw_iterator()
    }
}
