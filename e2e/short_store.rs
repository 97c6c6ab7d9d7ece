//! E2E Test Suite 04: Short store
//!
//! The 32-bit variant: tiny row thresholds, frequent vertical growth, and,
//! at the maximum bit width, the 4-way alternate-row overflow scheme ending
//! in `OutOfCapacity` when all candidate rows are full.

extern crate handex;

use std::borrow::Cow;

use handex::{EncodingError, Fingerprint, Intern, ShortHandle, ShortStore, StoreError};

/// Payload with a pinned primary hash (see the growth suite).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pinned {
    name: String,
    hash: u32,
}

impl Pinned {
    fn new(name: impl Into<String>, hash: u32) -> Self {
        Pinned {
            name: name.into(),
            hash,
        }
    }
}

impl Intern for Pinned {
    fn canonical_bytes(&self) -> Result<Cow<'_, [u8]>, EncodingError> {
        Ok(Cow::Borrowed(self.name.as_bytes()))
    }

    fn fingerprint(&self) -> Result<Fingerprint, EncodingError> {
        Ok(Fingerprint {
            hash: self.hash,
            sig: Fingerprint::of(self.name.as_bytes()).sig,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: basic round trip and 32-bit handle layout
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_round_trip_and_handle_layout() {
    let store: ShortStore<String> = ShortStore::new(10);
    let v = String::from("short-lived name, long-lived handle");
    let h = store.add(&v).unwrap();
    assert_eq!(store.get(h).unwrap(), Some(v.clone()));
    assert_eq!(store.find(&v).unwrap(), h);

    // Row in bits 31..8, index in bits 7..0; no high row bits beyond the
    // mask at issue time (bit width 10 ⇒ row < 1024).
    let bits = h.to_bits();
    assert!(bits >> 8 < 1024, "row {} exceeds the issue-time mask", bits >> 8);
    assert_eq!(ShortHandle::from_bits(bits), h);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: handle stability through constant vertical growth
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_handles_survive_aggressive_widening() {
    // Width 9 rows hold one value each, so nearly every colliding insert
    // triggers a split; this is the harshest growth schedule the store has.
    let store: ShortStore<String> = ShortStore::new(9);
    let mut issued = Vec::new();
    for n in 0..5_000 {
        let v = format!("churn-{n}");
        issued.push((store.add(&v).unwrap(), v));
    }
    assert!(store.bit_width() > 9);
    for (h, v) in &issued {
        assert_eq!(store.get(*h).unwrap().as_ref(), Some(v));
        assert_eq!(store.find(v).unwrap(), *h);
    }
    assert_eq!(store.len(), 5_000);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: alternate-row overflow at maximum width, then OutOfCapacity
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_overflow_walks_the_alternate_rows_then_fails() {
    // Maximum width: 2²⁴ rows of up to 256 slots, no growth left. Every
    // insert shares one pinned hash, so a single handex absorbs them all.
    let hash = 0x00AB_C123u32;
    let mask = 0x00FF_FFFF;
    let primary = hash & mask;
    let r2 = !primary & mask;
    let r3 = ((primary << 12) | (primary >> 12)) & mask;
    let r4 = !r3 & mask;

    let store: ShortStore<Pinned> = ShortStore::new(24);
    assert_eq!(store.bit_width(), 24);

    let mut issued = Vec::new();
    for n in 0..1024 {
        let v = Pinned::new(format!("packed-{n}"), hash);
        let h = store.add(&v).unwrap();
        issued.push((h, v));
    }

    // The first 256 landed in the primary row; the 257th went to r2, and
    // the probe order filled r2, r3, r4 in turn.
    assert_eq!(issued[0].0.to_bits() >> 8, primary);
    assert_eq!(issued[255].0.to_bits() >> 8, primary);
    assert_eq!(issued[256].0.to_bits() >> 8, r2);
    assert_eq!(issued[511].0.to_bits() >> 8, r2);
    assert_eq!(issued[512].0.to_bits() >> 8, r3);
    assert_eq!(issued[768].0.to_bits() >> 8, r4);

    // Find locates overflowed values and agrees with the issued handle.
    for probe in [0usize, 255, 256, 300, 512, 700, 1023] {
        let (h, v) = &issued[probe];
        assert_eq!(store.find(v).unwrap(), *h, "find disagreed at {probe}");
        assert_eq!(store.get(*h).unwrap().as_ref(), Some(v));
        assert_eq!(store.add(v).unwrap(), *h, "re-add disagreed at {probe}");
    }
    assert_eq!(store.len(), 1024);

    // All four candidate rows are full: the 1025th insert has nowhere left.
    let overflow = Pinned::new("packed-1024", hash);
    assert_eq!(store.add(&overflow), Err(StoreError::OutOfCapacity));
    assert!(store.find(&overflow).unwrap().is_null());
    assert_eq!(store.len(), 1024, "failed insert must not change the store");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: values absent from a narrow store stay absent
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_absent_values_and_null_handle() {
    let store: ShortStore<String> = ShortStore::new(10);
    store.add(&"present".to_string()).unwrap();
    assert!(store.find(&"absent".to_string()).unwrap().is_null());
    assert!(!store.contains(&"absent".to_string()).unwrap());
    assert_eq!(store.get(ShortHandle::NULL).unwrap(), None);
    assert_eq!(store.get(ShortHandle::from_bits(0xDEAD_BE00)).unwrap(), None);
}
