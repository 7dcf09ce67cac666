// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Persistent multi-revision undo log. Each revision owns a contiguous run
//! of segments, each segment a buffer of inverse operations recorded while
//! flushing a write session. The state record and the segments live in the
//! backing store itself, under the undo prefix, so the log survives reopen;
//! every mutation of the log is one atomic batch.

use crate::{
    codec::{self, RecordReader, UndoRecord},
    db::Database,
    errors::{OverlayDbError, Result},
    key::{append_u64_be, next_prefix},
    metrics::OVERLAYDB_OP_LATENCY_SECONDS,
    session::SessionCache,
};
use rocksdb::WriteBatch;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_TARGET_SEGMENT_SIZE: usize = 64 * 1024 * 1024;

/// The persisted accounting for the undo log.
///
/// `undo_stack` holds, for each live revision (oldest first), the number of
/// segments belonging to that revision; `next_undo_segment` is the next
/// segment index to assign. The sum of `undo_stack` always equals the number
/// of segment keys in the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UndoState {
    pub(crate) revision: i64,
    pub(crate) undo_stack: Vec<u64>,
    pub(crate) next_undo_segment: u64,
}

pub struct UndoStack {
    db: Arc<Database>,
    state_key: Vec<u8>,
    segment_prefix: Vec<u8>,
    segment_next_prefix: Vec<u8>,
    target_segment_size: usize,
    state: UndoState,
}

impl UndoStack {
    /// Loads (or initializes) the undo state stored under `undo_prefix`.
    pub fn new(db: Arc<Database>, undo_prefix: Vec<u8>) -> Result<Self> {
        if undo_prefix.is_empty() {
            return Err(OverlayDbError::EmptyUndoPrefix);
        }
        // Sentinels reserve 0x00 and 0xff; see [`crate::db`].
        if undo_prefix[0] == 0x00 || undo_prefix[0] == 0xff {
            return Err(OverlayDbError::ReservedUndoPrefix);
        }

        let mut state_key = undo_prefix.clone();
        state_key.push(0x00);
        let mut segment_prefix = undo_prefix;
        segment_prefix.push(0x80);
        let segment_next_prefix = next_prefix(&segment_prefix);

        let state = match db.get(&state_key)? {
            Some(record) => codec::decode_state(&record)?,
            None => UndoState::default(),
        };
        debug!(revision = state.revision, "Loaded undo state.");

        Ok(Self {
            db,
            state_key,
            segment_prefix,
            segment_next_prefix,
            target_segment_size: DEFAULT_TARGET_SEGMENT_SIZE,
            state,
        })
    }

    /// Soft cap on the serialized size of one segment. Exceeding it while
    /// recording inverse operations starts a new segment.
    pub fn set_target_segment_size(&mut self, bytes: usize) {
        self.target_segment_size = bytes;
    }

    pub fn revision(&self) -> i64 {
        self.state.revision
    }

    /// Sets the revision counter without creating history. Only legal while
    /// no revision is undoable.
    pub fn set_revision(&mut self, revision: u64) -> Result<()> {
        if !self.state.undo_stack.is_empty() {
            return Err(OverlayDbError::RevisionWithExistingUndoStack);
        }
        if revision > i64::MAX as u64 {
            return Err(OverlayDbError::RevisionTooHigh);
        }
        if (revision as i64) < self.state.revision {
            return Err(OverlayDbError::RevisionCannotDecrease);
        }
        self.state.revision = revision as i64;
        self.write_state()
    }

    /// Creates a new entry on the undo stack.
    pub fn push(&mut self) -> Result<()> {
        self.state.undo_stack.push(0);
        self.state.revision += 1;
        self.write_state()
    }

    /// Combines the top two entries on the undo stack. Their segments are
    /// concatenated; only the counts move, no segment is rewritten.
    pub fn squash(&mut self) -> Result<()> {
        if self.state.undo_stack.len() < 2 {
            return Err(OverlayDbError::NothingToSquash);
        }
        let segments = self.state.undo_stack.pop().unwrap_or(0);
        if let Some(last) = self.state.undo_stack.last_mut() {
            *last += segments;
        }
        self.state.revision -= 1;
        self.write_state()
    }

    /// Restores the store contents to the state at the top of the undo
    /// stack, applying the top revision's segments newest-first and deleting
    /// them, all in one atomic batch.
    pub fn undo(&mut self) -> Result<()> {
        let _timer = OVERLAYDB_OP_LATENCY_SECONDS
            .with_label_values(&["undo"])
            .start_timer();
        let segments = match self.state.undo_stack.last() {
            Some(&segments) => segments,
            None => return Err(OverlayDbError::NothingToUndo),
        };
        let mut batch = WriteBatch::default();

        let first = self.segment_key(self.state.next_undo_segment - segments);
        let mut store_it = self.db.raw_iterator();
        store_it.seek(&self.segment_next_prefix);
        if store_it.valid() {
            store_it.prev();
        }

        while store_it.valid() {
            let (segment_key, segment) = match (store_it.key(), store_it.value()) {
                (Some(key), Some(value)) => (key, value),
                _ => break,
            };
            if segment_key < first.as_slice() {
                break;
            }
            let mut reader = RecordReader::new(segment);
            while let Some(record) = reader.next_record()? {
                match record {
                    UndoRecord::Remove { key } => batch.delete(key),
                    UndoRecord::Put { key, value } => batch.put(key, value),
                }
            }
            batch.delete(segment_key);
            store_it.prev();
        }
        store_it
            .status()
            .map_err(|e| OverlayDbError::store("iterate: ", e))?;

        self.state.next_undo_segment -= segments;
        self.state.undo_stack.pop();
        self.state.revision -= 1;
        self.write_state_into(&mut batch)?;
        self.db.write(batch)?;
        debug!(revision = self.state.revision, "Undid one revision.");
        Ok(())
    }

    /// Discards all undo history strictly older than `revision`. Never
    /// alters currently visible contents.
    pub fn commit(&mut self, revision: i64) -> Result<()> {
        let _timer = OVERLAYDB_OP_LATENCY_SECONDS
            .with_label_values(&["commit"])
            .start_timer();
        let revision = revision.min(self.state.revision);
        let first_revision = self.state.revision - self.state.undo_stack.len() as i64;
        if first_revision < revision {
            let mut batch = WriteBatch::default();
            self.state
                .undo_stack
                .drain(..(revision - first_revision) as usize);
            let keep = self.state.next_undo_segment - self.state.undo_stack.iter().sum::<u64>();
            if keep > 0 {
                // delete_range is half-open, so the bound is one past the
                // last discarded segment.
                batch.delete_range(self.segment_key(0), self.segment_key(keep));
            }
            self.write_state_into(&mut batch)?;
            self.db.write(batch)?;
            debug!(
                revision = revision,
                first_kept_segment = keep,
                "Committed undo history."
            );
        }
        Ok(())
    }

    /// The flush path: applies every dirty cache entry to one atomic batch,
    /// recording inverse operations into segments when the undo stack has a
    /// live revision, and writes the updated state record into the same
    /// batch.
    pub(crate) fn write_changes(&mut self, cache: &SessionCache) -> Result<()> {
        let _timer = OVERLAYDB_OP_LATENCY_SECONDS
            .with_label_values(&["write_changes"])
            .start_timer();
        let mut batch = WriteBatch::default();
        let mut segment: Vec<u8> = Vec::new();

        for (key, entry) in cache.changes() {
            if entry.orig_value == entry.current_value {
                continue;
            }

            match &entry.current_value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }

            if !self.state.undo_stack.is_empty() {
                let record_len = match &entry.orig_value {
                    Some(orig) => codec::put_record_len(key.len(), orig.len()),
                    None => codec::remove_record_len(key.len()),
                };
                if segment.len() + record_len > self.target_segment_size {
                    self.write_segment(&mut batch, &mut segment);
                }
                match &entry.orig_value {
                    Some(orig) => codec::append_put(&mut segment, key, orig)?,
                    None => codec::append_remove(&mut segment, key)?,
                }
            }
        }

        self.write_segment(&mut batch, &mut segment);
        self.write_state_into(&mut batch)?;
        self.db.write(batch)
    }

    fn write_segment(&mut self, batch: &mut WriteBatch, segment: &mut Vec<u8>) {
        if segment.is_empty() {
            return;
        }
        let key = self.segment_key(self.state.next_undo_segment);
        self.state.next_undo_segment += 1;
        batch.put(key, &segment);
        if let Some(count) = self.state.undo_stack.last_mut() {
            *count += 1;
        }
        segment.clear();
    }

    fn write_state_into(&self, batch: &mut WriteBatch) -> Result<()> {
        batch.put(&self.state_key, codec::encode_state(&self.state)?);
        Ok(())
    }

    fn write_state(&self) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.write_state_into(&mut batch)?;
        self.db.write(batch)
    }

    fn segment_key(&self, segment: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.segment_prefix.len() + 8);
        key.extend_from_slice(&self.segment_prefix);
        append_u64_be(&mut key, segment);
        key
    }
}
