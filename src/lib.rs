// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! A transactional key-value overlay with multi-revision undo on top of
//! RocksDB.
//!
//! Three layers:
//! * [`WriteSession`] accumulates pending mutations in an in-memory overlay
//!   that doubles as a read-through cache, and publishes them atomically.
//! * [`View`] scopes reads and writes to a byte prefix plus a 64-bit
//!   contract id, and builds a bidirectional [`KvIterator`] that merges the
//!   overlay with the store.
//! * [`UndoStack`] records inverse operations into the store itself, in
//!   segments grouped by revision, supporting push / undo / squash / commit
//!   and explicit revision numbering.
//!
//! The public API is not thread-safe; callers serialize all access to a
//! database / session / view / undo-stack cluster. The backing RocksDB
//! instance itself is shared freely.

mod codec;
mod config;
mod db;
mod errors;
mod iterator;
mod key;
mod metrics;
mod session;
mod undo;
mod view;

pub use config::DbConfig;
pub use db::{Database, SENTINEL_MAX, SENTINEL_MIN};
pub use errors::{OverlayDbError, Result};
pub use iterator::KvIterator;
pub use key::{append_u64_be, make_full_key, next_prefix};
pub use session::WriteSession;
pub use undo::UndoStack;
pub use view::View;

// Re-exported so callers can assemble batches against the façade without
// depending on rocksdb directly.
pub use rocksdb::WriteBatch;
