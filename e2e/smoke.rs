//! E2E Test Suite 01: Smoke
//!
//! Basic wide-store behavior: insert a few strings, look them up by value
//! and by handle, and confirm the null sentinel semantics:
//! - handle 0 is null and never issued
//! - absent values find the null handle
//! - every issued handle round-trips to its value

extern crate handex;

use handex::{WideHandle, WideStore};

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: three inserts, count and lookups
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_insert_three_strings_and_look_them_up() {
    let store: WideStore<String> = WideStore::new(8);

    let hello = store.add(&"hello".to_string()).unwrap();
    let world = store.add(&"world".to_string()).unwrap();
    let string = store.add(&"string".to_string()).unwrap();

    assert_eq!(store.len(), 3);
    assert!(!hello.is_null() && !world.is_null() && !string.is_null());

    // Find returns the handle Add issued.
    assert_eq!(store.find(&"world".to_string()).unwrap(), world);
    assert_eq!(store.find(&"hello".to_string()).unwrap(), hello);

    // A value never inserted finds the null handle.
    assert!(store.find(&"name".to_string()).unwrap().is_null());
    assert!(!store.contains(&"name".to_string()).unwrap());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: null sentinel
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_null_handle_resolves_to_nothing() {
    let store: WideStore<String> = WideStore::new(8);
    store.add(&"occupant".to_string()).unwrap();

    assert_eq!(store.get(WideHandle::NULL).unwrap(), None);
    assert_eq!(store.get(WideHandle::from_bits(0)).unwrap(), None);
}

#[test]
fn test_issued_handles_are_never_zero() {
    let store: WideStore<String> = WideStore::new(8);
    for n in 0..500 {
        let h = store.add(&format!("value-{n}")).unwrap();
        assert!(!h.is_null(), "issued a null handle for value-{n}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: handle ↔ value round trip
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_round_trip_for_a_batch_of_values() {
    let store: WideStore<String> = WideStore::new(8);
    let mut issued = Vec::new();
    for n in 0..1_000 {
        let v = format!("round-trip-{n}");
        let h = store.add(&v).unwrap();
        issued.push((h, v));
    }
    for (h, v) in &issued {
        assert_eq!(store.get(*h).unwrap().as_ref(), Some(v));
        assert_eq!(store.find(v).unwrap(), *h);
    }
    assert_eq!(store.len(), 1_000);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: garbage handles resolve tolerantly
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_unissued_handles_resolve_to_none() {
    let store: WideStore<String> = WideStore::new(8);
    store.add(&"lone".to_string()).unwrap();

    // Row far beyond the vector, and a plausible row with an absurd index.
    assert_eq!(
        store.get(WideHandle::from_bits(0xFFFF_FFFF_0000_0001)).unwrap(),
        None
    );
    assert_eq!(store.get(WideHandle::from_bits(0x0000_0001_00FF_FFFF)).unwrap(), None);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: observability
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_bit_width_and_stats_are_visible() {
    let store: WideStore<String> = WideStore::new(8);
    assert_eq!(store.bit_width(), 8);
    assert!(store.is_empty());

    store.add(&"a".to_string()).unwrap();
    let stats = store.stats();
    assert_eq!(stats.bit_width, 8);
    assert_eq!(stats.total_rows, 256);
    assert_eq!(stats.len, 1);
    assert!(stats.allocated_rows >= 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: byte payloads work the same way
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_byte_vector_payloads() {
    let store: WideStore<Vec<u8>> = WideStore::new(8);
    let blob: Vec<u8> = (0u8..=255).collect();
    let h = store.add(&blob).unwrap();
    assert_eq!(store.get(h).unwrap(), Some(blob.clone()));
    assert_eq!(store.find(&blob).unwrap(), h);
    assert!(store.find(&vec![1u8, 2, 3]).unwrap().is_null());
}
