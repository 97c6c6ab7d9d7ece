//! E2E Test Suite 02: Deduplication
//!
//! At most one slot ever holds a given value: repeated Adds return the
//! original handle and leave the count unchanged.

extern crate handex;

use handex::{ShortStore, WideStore};

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: a thousand Adds of one value
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_thousand_adds_one_slot() {
    let store: WideStore<String> = WideStore::new(8);
    let x = "x".to_string();

    let first = store.add(&x).unwrap();
    for _ in 0..999 {
        assert_eq!(store.add(&x).unwrap(), first);
    }
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(first).unwrap(), Some(x));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: re-adds interleaved with fresh values
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_interleaved_re_adds_do_not_inflate_count() {
    let store: WideStore<String> = WideStore::new(8);
    let mut handles = Vec::new();

    for n in 0..200 {
        let v = format!("item-{n}");
        handles.push(store.add(&v).unwrap());
        // Every insert is followed by a re-add of an earlier value.
        let back = format!("item-{}", n / 2);
        assert_eq!(store.add(&back).unwrap(), handles[n / 2]);
    }
    assert_eq!(store.len(), 200);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: add and find agree on the handle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_find_equals_add_for_every_value() {
    let store: WideStore<String> = WideStore::new(8);
    for n in 0..500 {
        let v = format!("agree-{n}");
        let added = store.add(&v).unwrap();
        assert_eq!(store.find(&v).unwrap(), added);
        // Adding again changes nothing.
        assert_eq!(store.add(&v).unwrap(), added);
    }
    assert_eq!(store.len(), 500);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: dedup survives vertical growth (short store, tiny rows)
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_dedup_across_growth() {
    // Bit width 9 means single-slot rows, so growth happens constantly;
    // handles issued before a split must still deduplicate after it.
    let store: ShortStore<String> = ShortStore::new(9);
    let mut issued = Vec::new();
    for n in 0..2_000 {
        let v = format!("grown-{n}");
        issued.push((v.clone(), store.add(&v).unwrap()));
    }
    assert!(store.bit_width() > 9);
    for (v, h) in &issued {
        assert_eq!(store.add(v).unwrap(), *h, "re-add of {v} moved its handle");
    }
    assert_eq!(store.len(), 2_000);
}
