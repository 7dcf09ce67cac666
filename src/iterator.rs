// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Bidirectional ordered iterator merging the session overlay with the
//! backing store.
//!
//! The overlay map is the merged view; the store cursor only keeps the map
//! populated around the current position. Construction warms the cache with
//! the store keys adjacent to both range bounds, so stepping in either
//! direction can walk the map without probing the store for "what comes
//! next". The sentinels at 0x00 and 0xff guarantee the store cursor can
//! always take one step past either side of the range.

use crate::{
    errors::{OverlayDbError, Result},
    key::next_prefix,
    session::{SessionCache, WriteSession},
    view::View,
};
use bytes::Bytes;
use rocksdb::DBRawIterator;

pub struct KvIterator<'a> {
    inner: Option<IterImpl<'a>>,
}

struct IterImpl<'a> {
    session: &'a WriteSession,
    /// `view_prefix ‖ contract_be64 ‖ user_prefix` — the lower range bound.
    prefix: Vec<u8>,
    /// Length of `view_prefix ‖ contract_be64`, stripped from yielded keys.
    hidden_prefix_len: usize,
    /// Upper range bound, `next_prefix(prefix)`.
    end_prefix: Vec<u8>,
    store_it: DBRawIterator<'a>,
    /// Full key of the current overlay entry; `None` = end.
    position: Option<Vec<u8>>,
    /// `num_erases` observed when positioning; a mismatch on later use means
    /// the entry underneath was erased.
    position_num_erases: u64,
}

fn check_status(store_it: &DBRawIterator<'_>, context: &'static str) -> Result<()> {
    store_it
        .status()
        .map_err(|e| OverlayDbError::store(context, e))
}

fn fill_from_store(cache: &mut SessionCache, store_it: &DBRawIterator<'_>) {
    if store_it.valid() {
        if let (Some(key), Some(value)) = (store_it.key(), store_it.value()) {
            cache.fill(key, value);
        }
    }
}

impl<'a> KvIterator<'a> {
    pub(crate) fn new(view: &View<'a>, contract: u64, user_prefix: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: Some(IterImpl::new(view, contract, user_prefix)?),
        })
    }

    fn inner(&self) -> Result<&IterImpl<'a>> {
        self.inner
            .as_ref()
            .ok_or(OverlayDbError::IteratorNotInitialized)
    }

    fn inner_mut(&mut self) -> Result<&mut IterImpl<'a>> {
        self.inner
            .as_mut()
            .ok_or(OverlayDbError::IteratorNotInitialized)
    }

    /// Steps forward; from end, wraps to the first in-range key.
    pub fn next(&mut self) -> Result<()> {
        self.inner_mut()?.step_forward()
    }

    /// Steps backward; from end, wraps to the last in-range key.
    pub fn prev(&mut self) -> Result<()> {
        self.inner_mut()?.step_backward()
    }

    /// Positions on the first live key `>= user_key` (clamped from below to
    /// the iterator's user prefix).
    pub fn lower_bound(&mut self, user_key: &[u8]) -> Result<()> {
        self.inner_mut()?.lower_bound(user_key)
    }

    pub fn move_to_begin(&mut self) -> Result<()> {
        self.inner_mut()?.move_to_begin()
    }

    pub fn move_to_end(&mut self) -> Result<()> {
        let inner = self.inner_mut()?;
        inner.position = None;
        Ok(())
    }

    pub fn is_end(&self) -> Result<bool> {
        Ok(self.inner()?.position.is_none())
    }

    /// True if positioned on a key whose entry has not been erased since.
    pub fn is_valid(&self) -> Result<bool> {
        let inner = self.inner()?;
        Ok(match &inner.position {
            None => false,
            Some(position) => inner
                .session
                .cache()
                .get(position)
                .map_or(false, |entry| entry.num_erases == inner.position_num_erases),
        })
    }

    /// Returns the current `(user_key, value)`, with the hidden
    /// `view_prefix ‖ contract` stripped from the key. `None` at end.
    pub fn get_kv(&self) -> Result<Option<(Vec<u8>, Bytes)>> {
        let inner = self.inner()?;
        let position = match &inner.position {
            Some(position) => position,
            None => return Ok(None),
        };
        let cache = inner.session.cache();
        let value = match cache.get(position) {
            Some(entry) if entry.num_erases == inner.position_num_erases => {
                entry.current_value.clone()
            }
            _ => None,
        };
        match value {
            Some(value) => Ok(Some((position[inner.hidden_prefix_len..].to_vec(), value))),
            None => Err(OverlayDbError::IteratorAtErasedValue),
        }
    }
}

impl Default for KvIterator<'_> {
    /// A detached iterator; every operation fails until one is built through
    /// [`View::iterator`].
    fn default() -> Self {
        Self { inner: None }
    }
}

impl<'a> IterImpl<'a> {
    fn new(view: &View<'a>, contract: u64, user_prefix: &[u8]) -> Result<Self> {
        let prefix = crate::key::make_full_key(&view.prefix, contract, user_prefix);
        let hidden_prefix_len = view.prefix.len() + 8;
        let end_prefix = next_prefix(&prefix);
        let session = view.session;
        let mut store_it = session.db().raw_iterator();

        // Warm the cache with the store keys around both range bounds: the
        // first key at-or-after the range, the key just before it, and the
        // first key at-or-after the end bound. With these landmarks cached,
        // stepping never runs off the overlay map.
        {
            let mut cache = session.cache_mut();
            store_it.seek(&prefix);
            check_status(&store_it, "seek: ")?;
            fill_from_store(&mut cache, &store_it);
            if store_it.valid() {
                store_it.prev();
            }
            check_status(&store_it, "prev: ")?;
            fill_from_store(&mut cache, &store_it);
            store_it.seek(&end_prefix);
            check_status(&store_it, "seek: ")?;
            fill_from_store(&mut cache, &store_it);
        }

        Ok(Self {
            session,
            prefix,
            hidden_prefix_len,
            end_prefix,
            store_it,
            position: None,
            position_num_erases: 0,
        })
    }

    fn move_to_begin(&mut self) -> Result<()> {
        let prefix = self.prefix.clone();
        self.lower_bound_full_key(prefix)
    }

    fn lower_bound(&mut self, user_key: &[u8]) -> Result<()> {
        let user_prefix = &self.prefix[self.hidden_prefix_len..];
        let user_key = if user_key < user_prefix {
            user_prefix
        } else {
            user_key
        };
        let mut full_key = Vec::with_capacity(self.hidden_prefix_len + user_key.len());
        full_key.extend_from_slice(&self.prefix[..self.hidden_prefix_len]);
        full_key.extend_from_slice(user_key);
        self.lower_bound_full_key(full_key)
    }

    fn lower_bound_full_key(&mut self, full_key: Vec<u8>) -> Result<()> {
        let mut cache = self.session.cache_mut();
        self.store_it.seek(&full_key);
        check_status(&self.store_it, "seek: ")?;
        fill_from_store(&mut cache, &self.store_it);
        // The seek filled the first store key >= full_key, so the overlay
        // lower bound lands on it or on an overlay-only key before it.
        let mut position = cache.lower_bound_key(&full_key).cloned();
        self.finish_forward(&mut cache, &mut position)?;
        self.settle_forward(&cache, position);
        Ok(())
    }

    fn step_forward(&mut self) -> Result<()> {
        let current = match self.position.clone() {
            Some(current) => current,
            None => return self.move_to_begin(),
        };
        let mut cache = self.session.cache_mut();
        if cache
            .get(&current)
            .map_or(true, |entry| entry.num_erases != self.position_num_erases)
        {
            return Err(OverlayDbError::IteratorAtErasedValue);
        }
        let mut position = Some(current);
        self.advance_once_forward(&mut cache, &mut position)?;
        self.finish_forward(&mut cache, &mut position)?;
        self.settle_forward(&cache, position);
        Ok(())
    }

    fn step_backward(&mut self) -> Result<()> {
        let mut cache = self.session.cache_mut();
        let mut position = match self.position.clone() {
            None => {
                // Symmetric to construction-from-begin: land on the first
                // key at-or-after the end bound and walk back into range.
                let end_prefix = self.end_prefix.clone();
                self.store_it.seek(&end_prefix);
                check_status(&self.store_it, "seek: ")?;
                fill_from_store(&mut cache, &self.store_it);
                match cache.lower_bound_key(&end_prefix).cloned() {
                    Some(position) => Some(position),
                    None => {
                        self.position = None;
                        return Ok(());
                    }
                }
            }
            Some(current) => {
                if cache
                    .get(&current)
                    .map_or(true, |entry| entry.num_erases != self.position_num_erases)
                {
                    return Err(OverlayDbError::IteratorAtErasedValue);
                }
                Some(current)
            }
        };
        // Step back at least once, then keep going while the entry
        // underneath is erased.
        loop {
            let current = match position.as_ref() {
                Some(current) => current.clone(),
                None => break,
            };
            while self.store_it.valid()
                && self
                    .store_it
                    .key()
                    .map_or(false, |key| key >= current.as_slice())
            {
                self.store_it.prev();
                check_status(&self.store_it, "prev: ")?;
                fill_from_store(&mut cache, &self.store_it);
            }
            position = cache.prev_key(&current).cloned();
            let live = position.as_ref().map_or(true, |p| {
                cache
                    .get(p)
                    .map_or(false, |entry| entry.current_value.is_some())
            });
            if live {
                break;
            }
        }
        self.position = match position {
            Some(position) if position.as_slice() >= self.prefix.as_slice() => {
                self.position_num_erases =
                    cache.get(&position).map_or(0, |entry| entry.num_erases);
                Some(position)
            }
            _ => None,
        };
        Ok(())
    }

    /// Advances the store cursor past `position` (caching every key it
    /// crosses) and moves `position` to the next overlay key.
    fn advance_once_forward(
        &mut self,
        cache: &mut SessionCache,
        position: &mut Option<Vec<u8>>,
    ) -> Result<()> {
        let current = match position.as_ref() {
            Some(current) => current.clone(),
            None => return Ok(()),
        };
        while self.store_it.valid()
            && self
                .store_it
                .key()
                .map_or(false, |key| key <= current.as_slice())
        {
            self.store_it.next();
            check_status(&self.store_it, "next: ")?;
            fill_from_store(cache, &self.store_it);
        }
        *position = cache.next_key(&current).cloned();
        Ok(())
    }

    /// Skips forward past erased overlay entries.
    fn finish_forward(
        &mut self,
        cache: &mut SessionCache,
        position: &mut Option<Vec<u8>>,
    ) -> Result<()> {
        loop {
            let live = match position.as_ref() {
                None => break,
                Some(current) => cache
                    .get(current)
                    .map_or(false, |entry| entry.current_value.is_some()),
            };
            if live {
                break;
            }
            self.advance_once_forward(cache, position)?;
        }
        Ok(())
    }

    /// Applies the end bound and snapshots `num_erases`.
    fn settle_forward(&mut self, cache: &SessionCache, position: Option<Vec<u8>>) {
        self.position = match position {
            Some(position) if position.as_slice() < self.end_prefix.as_slice() => {
                self.position_num_erases =
                    cache.get(&position).map_or(0, |entry| entry.num_erases);
                Some(position)
            }
            _ => None,
        };
    }
}
