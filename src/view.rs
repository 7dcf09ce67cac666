// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! A view scopes reads and writes to `view_prefix ‖ contract_be64`, so each
//! contract sees its own ordered key space inside the shared store.

use crate::{
    errors::{OverlayDbError, Result},
    iterator::KvIterator,
    key::make_full_key,
    session::WriteSession,
};
use bytes::Bytes;

pub struct View<'a> {
    pub(crate) session: &'a WriteSession,
    pub(crate) prefix: Vec<u8>,
}

impl<'a> View<'a> {
    pub fn new(session: &'a WriteSession, prefix: Vec<u8>) -> Result<Self> {
        if prefix.is_empty() {
            return Err(OverlayDbError::EmptyViewPrefix);
        }
        // Sentinels reserve 0x00 and 0xff. This keeps store cursors from
        // going invalid during iteration and lets next_prefix() bound the
        // range.
        if prefix[0] == 0x00 || prefix[0] == 0xff {
            return Err(OverlayDbError::ReservedViewPrefix);
        }
        Ok(Self { session, prefix })
    }

    pub fn get(&self, contract: u64, key: &[u8]) -> Result<Option<Bytes>> {
        self.session
            .get(&make_full_key(&self.prefix, contract, key))
    }

    pub fn set(&self, contract: u64, key: &[u8], value: &[u8]) -> Result<()> {
        self.session
            .set(&make_full_key(&self.prefix, contract, key), value)
    }

    pub fn erase(&self, contract: u64, key: &[u8]) -> Result<()> {
        self.session
            .erase(&make_full_key(&self.prefix, contract, key))
    }

    /// Builds a bidirectional iterator over this view's keys that start with
    /// `user_prefix`, under `contract`. The iterator starts positioned at
    /// end; advancing from end wraps to the first in-range key.
    pub fn iterator(&self, contract: u64, user_prefix: &[u8]) -> Result<KvIterator<'a>> {
        KvIterator::new(self, contract, user_prefix)
    }
}
