// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! A write session accumulates mutations in an in-memory overlay over the
//! backing store. The overlay doubles as a read-through cache: reads go to
//! the store at most once per key, and reads after writes observe the
//! writes. Nothing reaches the store until [`WriteSession::write_changes`]
//! publishes the whole change list in one atomic batch.

use crate::{db::Database, errors::Result, metrics::OVERLAYDB_OP_LATENCY_SECONDS, undo::UndoStack};
use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{
    collections::BTreeMap,
    ops::Bound::{Excluded, Unbounded},
    sync::Arc,
};

/// One overlay entry.
///
/// `orig_value` is the store value at first touch (`None` = the key was
/// absent) and never changes afterwards; `current_value` is the logical
/// value (`None` = erased). The entry is dirty iff the two differ.
#[derive(Debug)]
pub(crate) struct CachedValue {
    /// Bumped on every erase of a present value. Iterators positioned on the
    /// entry snapshot this counter, so a later erase invalidates them
    /// deterministically instead of silently skipping.
    pub(crate) num_erases: u64,
    pub(crate) orig_value: Option<Bytes>,
    pub(crate) current_value: Option<Bytes>,
    in_change_list: bool,
}

impl CachedValue {
    fn is_dirty(&self) -> bool {
        self.orig_value != self.current_value
    }
}

/// The overlay map plus the list of keys that have been modified relative to
/// their `orig_value`, in first-dirtied order.
#[derive(Default)]
pub(crate) struct SessionCache {
    map: BTreeMap<Vec<u8>, CachedValue>,
    change_list: Vec<Vec<u8>>,
}

impl SessionCache {
    pub(crate) fn get(&self, key: &[u8]) -> Option<&CachedValue> {
        self.map.get(key)
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Inserts a clean entry for a store key touched by an iterator. No-op
    /// if the key is already cached.
    pub(crate) fn fill(&mut self, key: &[u8], value: &[u8]) {
        if !self.map.contains_key(key) {
            let value = Bytes::copy_from_slice(value);
            self.map.insert(
                key.to_vec(),
                CachedValue {
                    num_erases: 0,
                    orig_value: Some(value.clone()),
                    current_value: Some(value),
                    in_change_list: false,
                },
            );
        }
    }

    /// First cached key `>= key`.
    pub(crate) fn lower_bound_key(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.map.range(key.to_vec()..).next().map(|(k, _)| k)
    }

    /// First cached key strictly greater than `key`.
    pub(crate) fn next_key(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.map
            .range((Excluded(key.to_vec()), Unbounded))
            .next()
            .map(|(k, _)| k)
    }

    /// Last cached key strictly less than `key`.
    pub(crate) fn prev_key(&self, key: &[u8]) -> Option<&Vec<u8>> {
        self.map.range(..key.to_vec()).next_back().map(|(k, _)| k)
    }

    /// Dirty entries in first-dirtied order. Clean entries that were later
    /// reverted to their original value are filtered by the caller via
    /// [`CachedValue::is_dirty`]; membership here only means the entry was
    /// dirtied at some point.
    pub(crate) fn changes<'a>(&'a self) -> impl Iterator<Item = (&'a [u8], &'a CachedValue)> + 'a {
        self.change_list
            .iter()
            .filter_map(|key| self.map.get(key).map(|entry| (key.as_slice(), entry)))
    }

    fn mark_changed(&mut self, key: &[u8]) {
        if let Some(entry) = self.map.get_mut(key) {
            if entry.in_change_list {
                return;
            }
            entry.in_change_list = true;
        } else {
            return;
        }
        self.change_list.push(key.to_vec());
    }

    fn insert(&mut self, key: &[u8], entry: CachedValue) {
        let dirty = entry.is_dirty();
        self.map.insert(key.to_vec(), entry);
        if dirty {
            self.mark_changed(key);
        }
    }

    /// Replaces the current value of an already-cached entry, marking it
    /// dirty only if the value actually changes.
    fn update_value(&mut self, key: &[u8], value: &[u8]) {
        if let Some(entry) = self.map.get_mut(key) {
            if entry.current_value.as_deref() == Some(value) {
                return;
            }
            entry.current_value = Some(Bytes::copy_from_slice(value));
        } else {
            return;
        }
        self.mark_changed(key);
    }

    /// Erases the current value of an already-cached entry. Erasing an
    /// already-erased entry is a no-op; erasing a present value bumps
    /// `num_erases`.
    fn erase_value(&mut self, key: &[u8]) {
        if let Some(entry) = self.map.get_mut(key) {
            if entry.current_value.is_none() {
                return;
            }
            entry.num_erases += 1;
            entry.current_value = None;
        } else {
            return;
        }
        self.mark_changed(key);
    }
}

/// A unit of accumulated mutations over one [`Database`].
///
/// Not thread-safe: callers serialize all access to a database / session /
/// view / undo-stack cluster. The lock exists so iterators can repopulate
/// the cache while the session is shared.
pub struct WriteSession {
    db: Arc<Database>,
    cache: RwLock<SessionCache>,
}

impl WriteSession {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cache: RwLock::new(SessionCache::default()),
        }
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub(crate) fn cache(&self) -> RwLockReadGuard<'_, SessionCache> {
        self.cache.read()
    }

    pub(crate) fn cache_mut(&self) -> RwLockWriteGuard<'_, SessionCache> {
        self.cache.write()
    }

    /// Returns the current logical value for `key`, consulting the overlay
    /// first. A store hit is cached; a store miss is not (negative entries
    /// would bloat the cache on scans of missing keys).
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let _timer = OVERLAYDB_OP_LATENCY_SECONDS
            .with_label_values(&["get"])
            .start_timer();
        let mut cache = self.cache.write();
        if let Some(entry) = cache.get(key) {
            return Ok(entry.current_value.clone());
        }
        match self.db.get(key)? {
            None => Ok(None),
            Some(value) => {
                let value = Bytes::from(value);
                cache.insert(
                    key,
                    CachedValue {
                        num_erases: 0,
                        orig_value: Some(value.clone()),
                        current_value: Some(value.clone()),
                        in_change_list: false,
                    },
                );
                Ok(Some(value))
            }
        }
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut cache = self.cache.write();
        if cache.contains(key) {
            cache.update_value(key, value);
            return Ok(());
        }
        match self.db.get(key)? {
            None => cache.insert(
                key,
                CachedValue {
                    num_erases: 0,
                    orig_value: None,
                    current_value: Some(Bytes::copy_from_slice(value)),
                    in_change_list: false,
                },
            ),
            Some(orig) if orig == value => {
                // Same bytes as the store: record presence without dirtying.
                // Iterators rely on touched keys being in the cache.
                let orig = Bytes::from(orig);
                cache.insert(
                    key,
                    CachedValue {
                        num_erases: 0,
                        orig_value: Some(orig.clone()),
                        current_value: Some(orig),
                        in_change_list: false,
                    },
                );
            }
            Some(orig) => cache.insert(
                key,
                CachedValue {
                    num_erases: 0,
                    orig_value: Some(Bytes::from(orig)),
                    current_value: Some(Bytes::copy_from_slice(value)),
                    in_change_list: false,
                },
            ),
        }
        Ok(())
    }

    pub fn erase(&self, key: &[u8]) -> Result<()> {
        let mut cache = self.cache.write();
        if cache.contains(key) {
            cache.erase_value(key);
            return Ok(());
        }
        match self.db.get(key)? {
            // Absent in the store: record the absence as a clean entry.
            None => cache.insert(
                key,
                CachedValue {
                    num_erases: 0,
                    orig_value: None,
                    current_value: None,
                    in_change_list: false,
                },
            ),
            Some(orig) => cache.insert(
                key,
                CachedValue {
                    num_erases: 1,
                    orig_value: Some(Bytes::from(orig)),
                    current_value: None,
                    in_change_list: false,
                },
            ),
        }
        Ok(())
    }

    /// Publishes the session's change list through `undo` as one atomic
    /// batch, recording inverse operations if the undo stack has a live
    /// revision. The session keeps its cache; a session is normally
    /// discarded after its commit boundary.
    pub fn write_changes(&self, undo: &mut UndoStack) -> Result<()> {
        let cache = self.cache.read();
        undo.write_changes(&cache)
    }
}
