// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{get_matching, get_matching_reverse, TestDb};
use overlaydb::{KvIterator, UndoStack, View, WriteSession};

fn kv(key: &[u8], value: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (key.to_vec(), value.to_vec())
}

fn kv_at(it: &KvIterator) -> Option<(Vec<u8>, Vec<u8>)> {
    it.get_kv().unwrap().map(|(key, value)| (key, value.to_vec()))
}

fn view_test(reload_session: bool) {
    let test_db = TestDb::new();
    let db = &test_db.db;
    let mut undo_stack = UndoStack::new(db.clone(), vec![0x10]).unwrap();
    let mut session = WriteSession::new(db.clone());

    {
        let view = View::new(&session, vec![0x70]).unwrap();
        for contract in [0x1234, 0x5678, 0x9abc] {
            assert!(get_matching(&view, contract).is_empty());
            assert_eq!(
                get_matching(&view, contract),
                get_matching_reverse(&view, contract),
            );
        }

        view.set(0x1234, &[0x30, 0x40], &[0x50, 0x60]).unwrap();
        view.set(0x5678, &[0x30, 0x41], &[0x51, 0x61]).unwrap();
        view.set(0x9abc, &[0x30, 0x42], &[0x52, 0x62]).unwrap();
    }

    if reload_session {
        session.write_changes(&mut undo_stack).unwrap();
        session = WriteSession::new(db.clone());
    }
    let view = View::new(&session, vec![0x70]).unwrap();

    // Each contract sees exactly its own pair.
    assert_eq!(
        get_matching(&view, 0x1234),
        vec![kv(&[0x30, 0x40], &[0x50, 0x60])],
    );
    assert_eq!(
        get_matching(&view, 0x5678),
        vec![kv(&[0x30, 0x41], &[0x51, 0x61])],
    );
    assert_eq!(
        get_matching(&view, 0x9abc),
        vec![kv(&[0x30, 0x42], &[0x52, 0x62])],
    );
    for contract in [0x1234, 0x5678, 0x9abc] {
        assert_eq!(
            get_matching(&view, contract),
            get_matching_reverse(&view, contract),
        );
    }

    assert_eq!(
        view.get(0x1234, &[0x30, 0x40]).unwrap().as_deref(),
        Some([0x50, 0x60].as_slice()),
    );
    assert_eq!(view.get(0x1234, &[0x30, 0x41]).unwrap(), None);
}

#[test]
fn test_view() {
    view_test(false);
    view_test(true);
}

#[test]
fn test_view_prefix_validation() {
    let test_db = TestDb::new();
    let session = WriteSession::new(test_db.db.clone());

    assert_eq!(
        View::new(&session, vec![]).unwrap_err().to_string(),
        "kv view may not have empty prefix",
    );
    for prefix in [vec![0x00], vec![0xff], vec![0x00, 0x70]] {
        assert_eq!(
            View::new(&session, prefix).unwrap_err().to_string(),
            "view may not have a prefix which begins with 0x00 or 0xff",
        );
    }
}

#[test]
fn test_iterator_merges_overlay_and_store() {
    let test_db = TestDb::new();
    let db = &test_db.db;
    let mut undo_stack = UndoStack::new(db.clone(), vec![0x10]).unwrap();

    // Two keys reach the store...
    {
        let session = WriteSession::new(db.clone());
        let view = View::new(&session, vec![0x70]).unwrap();
        view.set(0x42, b"aa", b"1").unwrap();
        view.set(0x42, b"ab", b"2").unwrap();
        session.write_changes(&mut undo_stack).unwrap();
    }

    // ...then a fresh overlay erases one and adds another.
    let session = WriteSession::new(db.clone());
    let view = View::new(&session, vec![0x70]).unwrap();
    view.erase(0x42, b"ab").unwrap();
    view.set(0x42, b"b", b"3").unwrap();

    assert_eq!(
        get_matching(&view, 0x42),
        vec![kv(b"aa", b"1"), kv(b"b", b"3")],
    );
    assert_eq!(get_matching(&view, 0x42), get_matching_reverse(&view, 0x42));

    let mut it = view.iterator(0x42, &[]).unwrap();
    assert!(it.is_end().unwrap());

    // lower_bound lands on the first live key at or after the target,
    // skipping the erased "ab".
    it.lower_bound(b"ab").unwrap();
    assert_eq!(kv_at(&it), Some(kv(b"b", b"3")));

    it.prev().unwrap();
    assert_eq!(kv_at(&it), Some(kv(b"aa", b"1")));
    it.prev().unwrap();
    assert!(it.is_end().unwrap());

    // Wrap-around: ++ from end goes to begin, -- from end to the last key.
    it.next().unwrap();
    assert_eq!(kv_at(&it), Some(kv(b"aa", b"1")));
    it.move_to_end().unwrap();
    it.prev().unwrap();
    assert_eq!(kv_at(&it), Some(kv(b"b", b"3")));
}

#[test]
fn test_iterator_user_prefix_bounds() {
    let test_db = TestDb::new();
    let session = WriteSession::new(test_db.db.clone());
    let view = View::new(&session, vec![0x70]).unwrap();

    view.set(0x7, &[0x2f], b"low").unwrap();
    view.set(0x7, &[0x30, 0x40], b"in1").unwrap();
    view.set(0x7, &[0x30, 0x41], b"in2").unwrap();
    view.set(0x7, &[0x31], b"high").unwrap();

    let mut it = view.iterator(0x7, &[0x30]).unwrap();
    it.next().unwrap();
    // Yielded keys keep the full user key; the user prefix only bounds the
    // range.
    assert_eq!(
        kv_at(&it),
        Some((vec![0x30, 0x40], b"in1".to_vec())),
    );
    it.next().unwrap();
    assert_eq!(
        kv_at(&it),
        Some((vec![0x30, 0x41], b"in2".to_vec())),
    );
    it.next().unwrap();
    assert!(it.is_end().unwrap());

    // lower_bound clamps from below to the user prefix.
    it.lower_bound(&[0x00]).unwrap();
    assert_eq!(
        kv_at(&it),
        Some((vec![0x30, 0x40], b"in1".to_vec())),
    );
}

#[test]
fn test_iterator_at_erased_value() {
    let test_db = TestDb::new();
    let session = WriteSession::new(test_db.db.clone());
    let view = View::new(&session, vec![0x70]).unwrap();

    view.set(0x1, b"k1", b"v1").unwrap();
    view.set(0x1, b"k2", b"v2").unwrap();

    let mut it = view.iterator(0x1, &[]).unwrap();
    it.next().unwrap();
    assert_eq!(kv_at(&it), Some(kv(b"k1", b"v1")));
    assert!(it.is_valid().unwrap());

    view.erase(0x1, b"k1").unwrap();
    assert!(!it.is_valid().unwrap());
    assert_eq!(
        it.get_kv().unwrap_err().to_string(),
        "kv iterator is at an erased value",
    );
    assert_eq!(
        it.next().unwrap_err().to_string(),
        "kv iterator is at an erased value",
    );
    assert_eq!(
        it.prev().unwrap_err().to_string(),
        "kv iterator is at an erased value",
    );

    // Repositioning recovers, skipping the erased key.
    it.move_to_begin().unwrap();
    assert_eq!(kv_at(&it), Some(kv(b"k2", b"v2")));
}

#[test]
fn test_detached_iterator() {
    let mut it = KvIterator::default();
    assert_eq!(
        it.get_kv().unwrap_err().to_string(),
        "kv iterator is not initialized",
    );
    assert_eq!(
        it.next().unwrap_err().to_string(),
        "kv iterator is not initialized",
    );
    assert_eq!(
        it.is_end().unwrap_err().to_string(),
        "kv iterator is not initialized",
    );
}

#[test]
fn test_session_overlay_reads() {
    let test_db = TestDb::new();
    let db = &test_db.db;
    let mut undo_stack = UndoStack::new(db.clone(), vec![0x10]).unwrap();

    {
        let session = WriteSession::new(db.clone());
        let view = View::new(&session, vec![0x70]).unwrap();
        view.set(0x1, b"k", b"stored").unwrap();
        session.write_changes(&mut undo_stack).unwrap();
    }

    let session = WriteSession::new(db.clone());
    let view = View::new(&session, vec![0x70]).unwrap();

    // Read-through, then reads observe overlay writes before any flush.
    assert_eq!(
        view.get(0x1, b"k").unwrap().as_deref(),
        Some(b"stored".as_slice()),
    );
    view.set(0x1, b"k", b"updated").unwrap();
    assert_eq!(
        view.get(0x1, b"k").unwrap().as_deref(),
        Some(b"updated".as_slice()),
    );
    view.erase(0x1, b"k").unwrap();
    assert_eq!(view.get(0x1, b"k").unwrap(), None);

    // Present-but-empty is distinct from missing.
    view.set(0x1, b"empty", b"").unwrap();
    assert_eq!(
        view.get(0x1, b"empty").unwrap().as_deref(),
        Some(b"".as_slice()),
    );
    assert_eq!(view.get(0x1, b"missing").unwrap(), None);
}
