// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use rocksdb::{BlockBasedOptions, Options};

/// Tuning knobs applied when opening the backing RocksDB instance.
///
/// None of these affect the persisted layout; they only shape compaction and
/// I/O behavior.
#[derive(Clone, Debug)]
pub struct DbConfig {
    pub create_if_missing: bool,
    /// Background thread parallelism handed to RocksDB, if set.
    pub parallelism: Option<i32>,
    pub max_open_files: Option<i32>,
    pub bytes_per_sync: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            parallelism: None,
            max_open_files: None,
            bytes_per_sync: 1 << 20,
        }
    }
}

pub(crate) fn gen_rocksdb_options(config: &DbConfig) -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(config.create_if_missing);
    opts.set_level_compaction_dynamic_level_bytes(true);
    opts.set_bytes_per_sync(config.bytes_per_sync);

    if let Some(parallelism) = config.parallelism {
        opts.increase_parallelism(parallelism);
    }

    opts.optimize_level_style_compaction(256 << 20);

    if let Some(max_open_files) = config.max_open_files {
        opts.set_max_open_files(max_open_files);
    }

    let mut table_options = BlockBasedOptions::default();
    table_options.set_format_version(4);
    table_options.set_index_block_restart_interval(16);
    opts.set_block_based_table_factory(&table_options);

    opts
}
