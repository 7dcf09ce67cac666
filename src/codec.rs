// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Byte codec for the two persisted undo records: the state record stored at
//! `undo_prefix ‖ 0x00` and the inverse-operation streams stored in segments
//! at `undo_prefix ‖ 0x80 ‖ index_be64`. The format is stable; the leading
//! byte of the state record is its version tag.

use crate::{
    errors::{OverlayDbError, Result},
    undo::UndoState,
};
use byteorder::{LittleEndian, ReadBytesExt};

pub(crate) const UNDO_FORMAT_VERSION: u8 = 0;

const UNDO_TYPE_REMOVE: u8 = 0;
const UNDO_TYPE_PUT: u8 = 1;

/// One inverse operation parsed out of a segment, borrowing from the segment
/// buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum UndoRecord<'a> {
    Remove { key: &'a [u8] },
    Put { key: &'a [u8], value: &'a [u8] },
}

fn write_varuint32(out: &mut Vec<u8>, value: usize) -> Result<()> {
    if value > u32::MAX as usize {
        return Err(OverlayDbError::BytesTooBig);
    }
    let mut v = value as u32;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return Ok(());
        }
        out.push(byte | 0x80);
    }
}

fn read_varuint32(input: &mut &[u8]) -> Result<u32> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let (&byte, rest) = input.split_first().ok_or(OverlayDbError::BadBytesSize)?;
        *input = rest;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 35 {
            return Err(OverlayDbError::BytesTooBig);
        }
    }
    if value > u64::from(u32::MAX) {
        return Err(OverlayDbError::BytesTooBig);
    }
    Ok(value as u32)
}

fn varuint32_len(value: usize) -> usize {
    let mut len = 1;
    let mut v = value >> 7;
    while v > 0 {
        len += 1;
        v >>= 7;
    }
    len
}

fn append_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    write_varuint32(out, bytes.len())?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_bytes<'a>(input: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = read_varuint32(input)? as usize;
    if len > input.len() {
        return Err(OverlayDbError::BadBytesSize);
    }
    let (bytes, rest) = input.split_at(len);
    *input = rest;
    Ok(bytes)
}

pub(crate) fn append_remove(out: &mut Vec<u8>, key: &[u8]) -> Result<()> {
    out.push(UNDO_TYPE_REMOVE);
    append_bytes(out, key)
}

pub(crate) fn append_put(out: &mut Vec<u8>, key: &[u8], value: &[u8]) -> Result<()> {
    out.push(UNDO_TYPE_PUT);
    append_bytes(out, key)?;
    append_bytes(out, value)
}

pub(crate) fn remove_record_len(key_len: usize) -> usize {
    1 + varuint32_len(key_len) + key_len
}

pub(crate) fn put_record_len(key_len: usize, value_len: usize) -> usize {
    1 + varuint32_len(key_len) + key_len + varuint32_len(value_len) + value_len
}

/// Streaming reader over a segment's concatenated records.
pub(crate) struct RecordReader<'a> {
    input: &'a [u8],
}

impl<'a> RecordReader<'a> {
    pub(crate) fn new(segment: &'a [u8]) -> Self {
        Self { input: segment }
    }

    pub(crate) fn next_record(&mut self) -> Result<Option<UndoRecord<'a>>> {
        let (&undo_type, rest) = match self.input.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };
        self.input = rest;
        match undo_type {
            UNDO_TYPE_REMOVE => Ok(Some(UndoRecord::Remove {
                key: read_bytes(&mut self.input)?,
            })),
            UNDO_TYPE_PUT => Ok(Some(UndoRecord::Put {
                key: read_bytes(&mut self.input)?,
                value: read_bytes(&mut self.input)?,
            })),
            _ => Err(OverlayDbError::UnknownUndoType),
        }
    }
}

pub(crate) fn encode_state(state: &UndoState) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1 + 8 + 5 + state.undo_stack.len() * 8 + 8);
    out.push(UNDO_FORMAT_VERSION);
    out.extend_from_slice(&state.revision.to_le_bytes());
    write_varuint32(&mut out, state.undo_stack.len())?;
    for &segments in &state.undo_stack {
        out.extend_from_slice(&segments.to_le_bytes());
    }
    out.extend_from_slice(&state.next_undo_segment.to_le_bytes());
    Ok(out)
}

pub(crate) fn decode_state(input: &[u8]) -> Result<UndoState> {
    let mut buf = input;
    let version = buf
        .read_u8()
        .map_err(|_| OverlayDbError::InvalidUndoFormat)?;
    if version != UNDO_FORMAT_VERSION {
        return Err(OverlayDbError::InvalidUndoFormat);
    }
    let revision = buf
        .read_i64::<LittleEndian>()
        .map_err(|_| OverlayDbError::InvalidUndoFormat)?;
    let count = read_varuint32(&mut buf).map_err(|_| OverlayDbError::InvalidUndoFormat)? as usize;
    let mut undo_stack = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        undo_stack.push(
            buf.read_u64::<LittleEndian>()
                .map_err(|_| OverlayDbError::InvalidUndoFormat)?,
        );
    }
    let next_undo_segment = buf
        .read_u64::<LittleEndian>()
        .map_err(|_| OverlayDbError::InvalidUndoFormat)?;
    Ok(UndoState {
        revision,
        undo_stack,
        next_undo_segment,
    })
}
