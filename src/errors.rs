// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! This module defines error types used by `overlaydb`.

use thiserror::Error;

/// This enum defines errors commonly used among `overlaydb` APIs.
///
/// Every variant renders the exact message callers (and tests) match on.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OverlayDbError {
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to squash")]
    NothingToSquash,
    #[error("cannot set revision while there is an existing undo stack")]
    RevisionWithExistingUndoStack,
    #[error("revision cannot decrease")]
    RevisionCannotDecrease,
    #[error("revision to set is too high")]
    RevisionTooHigh,
    #[error("undo_stack may not have a prefix which begins with 0x00 or 0xff")]
    ReservedUndoPrefix,
    #[error("view may not have a prefix which begins with 0x00 or 0xff")]
    ReservedViewPrefix,
    #[error("kv view may not have empty prefix")]
    EmptyViewPrefix,
    #[error("undo_prefix is empty")]
    EmptyUndoPrefix,
    #[error("kv iterator is at an erased value")]
    IteratorAtErasedValue,
    #[error("kv iterator is not initialized")]
    IteratorNotInitialized,
    #[error("bytes is too big")]
    BytesTooBig,
    #[error("bad size for bytes")]
    BadBytesSize,
    #[error("unknown undo_type")]
    UnknownUndoType,
    #[error("invalid undo format")]
    InvalidUndoFormat,
    /// A backing-store error, prefixed with the operation that hit it
    /// (`"get: "`, `"seek: "`, `"write batch"`, ...).
    #[error("{context}{message}")]
    Store {
        context: &'static str,
        message: String,
    },
    /// Other non-classified error.
    #[error("{0}")]
    Other(String),
}

impl OverlayDbError {
    pub(crate) fn store(context: &'static str, error: rocksdb::Error) -> Self {
        Self::Store {
            context,
            message: error.into_string(),
        }
    }
}

impl From<anyhow::Error> for OverlayDbError {
    fn from(error: anyhow::Error) -> Self {
        Self::Other(format!("{}", error))
    }
}

pub type Result<T, E = OverlayDbError> = std::result::Result<T, E>;
