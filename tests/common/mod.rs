// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use overlaydb::{next_prefix, Database, DbConfig, View};
use std::sync::Arc;

pub struct TestDb {
    pub db: Arc<Database>,
    _tmpdir: tempfile::TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let tmpdir = tempfile::tempdir().expect("Failed to create temp dir.");
        let db = Arc::new(
            Database::open(tmpdir.path(), &DbConfig::default()).expect("Failed to open DB."),
        );
        TestDb {
            db,
            _tmpdir: tmpdir,
        }
    }
}

/// Raw store contents in `[prefix, next_prefix(prefix))`, bypassing any
/// session overlay.
pub fn get_all(db: &Database, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let end = next_prefix(prefix);
    let mut store_it = db.raw_iterator();
    store_it.seek(prefix);
    let mut out = Vec::new();
    while store_it.valid() {
        let key = store_it.key().unwrap().to_vec();
        if !end.is_empty() && key.as_slice() >= end.as_slice() {
            break;
        }
        out.push((key, store_it.value().unwrap().to_vec()));
        store_it.next();
    }
    out
}

pub fn count_segments(db: &Database, undo_prefix: &[u8]) -> usize {
    let mut segment_prefix = undo_prefix.to_vec();
    segment_prefix.push(0x80);
    get_all(db, &segment_prefix).len()
}

/// All live pairs under `contract`, walking the view iterator forward from
/// its initial end position.
pub fn get_matching(view: &View, contract: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut it = view.iterator(contract, &[]).unwrap();
    let mut out = Vec::new();
    it.next().unwrap();
    while !it.is_end().unwrap() {
        let (key, value) = it.get_kv().unwrap().unwrap();
        out.push((key, value.to_vec()));
        it.next().unwrap();
    }
    out
}

/// Same pairs collected walking backward, returned in forward order.
pub fn get_matching_reverse(view: &View, contract: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut it = view.iterator(contract, &[]).unwrap();
    let mut out = Vec::new();
    it.prev().unwrap();
    while !it.is_end().unwrap() {
        let (key, value) = it.get_kv().unwrap().unwrap();
        out.push((key, value.to_vec()));
        it.prev().unwrap();
    }
    out.reverse();
    out
}
