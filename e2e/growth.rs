//! E2E Test Suite 03: Growth
//!
//! Horizontal growth (a single row's capacity) and vertical growth (the row
//! count doubles) with the property the whole design hinges on: every
//! handle issued before an enlargement still resolves to its value after
//! it, and re-adding a value keeps returning its original handle.
//!
//! Collisions are forced with a payload type that pins its primary hash, so
//! row placement is fully controlled.

extern crate handex;

use std::borrow::Cow;

use handex::{EncodingError, Fingerprint, Intern, WideStore};

/// A payload whose primary hash is chosen by the test; the signature stays
/// content-derived so row scans behave normally.
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
// Test 1: horizontal growth: 64 values forced into one row
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_one_row_absorbs_its_full_threshold() {
    // Bit width 8: the row threshold is 64. All 64 inserts share a hash, so
    // they all land in row 0x37 and walk the capacity progression there.
    let store: WideStore<Pinned> = WideStore::new(8);
    let mut issued = Vec::new();
    for n in 0..64 {
        let v = Pinned::new(format!("collider-{n}"), 0x37);
        issued.push((store.add(&v).unwrap(), v));
    }

    assert_eq!(store.len(), 64);
    assert_eq!(store.bit_width(), 8, "no vertical growth yet");
    for (h, v) in &issued {
        assert_eq!(store.find(v).unwrap(), *h);
        assert_eq!(store.get(*h).unwrap().as_ref(), Some(v));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: a saturated row forces vertical growth, then keeps absorbing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_saturated_row_widens_the_store() {
    let store: WideStore<Pinned> = WideStore::new(8);
    for n in 0..64 {
        store.add(&Pinned::new(format!("collider-{n}"), 0x37)).unwrap();
    }
    assert_eq!(store.bit_width(), 8);

    // The 65th insert has nowhere to go at width 8. The store widens; the
    // shared hash has bit 8 clear so nothing even moves, but the threshold
    // rises from 64 to 81 and the insert lands after a horizontal step.
    let extra = Pinned::new("collider-64", 0x37);
    let h = store.add(&extra).unwrap();
    assert_eq!(store.bit_width(), 9);
    assert_eq!(store.get(h).unwrap(), Some(extra));
    assert_eq!(store.len(), 65);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: vertical growth with controlled movers, handle preservation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_handles_survive_a_controlled_split() {
    // Hashes share the low 8 bits (row 0x37 at width 8) and alternate bit 8,
    // so a split moves exactly every other value to row 0x137.
    let store: WideStore<Pinned> = WideStore::new(8);
    let mut issued = Vec::new();
    for n in 0..64u32 {
        let v = Pinned::new(format!("mover-{n}"), 0x37 | (n << 8));
        issued.push((store.add(&v).unwrap(), v));
    }
    assert_eq!(store.bit_width(), 8);

    // Saturate the row once more to trigger the split.
    let trigger = Pinned::new("trigger", 0x37 | (64 << 8));
    store.add(&trigger).unwrap();
    assert_eq!(store.bit_width(), 9);

    // Every pre-growth handle resolves to its original value, whether the
    // value stayed or moved, and find/add still return the issued handle.
    for (h, v) in &issued {
        assert_eq!(store.get(*h).unwrap().as_ref(), Some(v), "{} broke", v.name);
        assert_eq!(store.find(v).unwrap(), *h);
        assert_eq!(store.add(v).unwrap(), *h);
    }
    assert_eq!(store.len(), 65);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: organic vertical growth under real hashing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_handles_survive_organic_growth() {
    let store: WideStore<String> = WideStore::new(8);
    let mut issued = Vec::new();

    let mut n = 0u32;
    while store.bit_width() == 8 {
        let v = format!("organic-{n}");
        issued.push((store.add(&v).unwrap(), v));
        n += 1;
        assert!(n < 200_000, "no row ever reached its threshold");
    }
    assert_eq!(store.bit_width(), 9);

    for (h, v) in &issued {
        assert_eq!(store.get(*h).unwrap().as_ref(), Some(v));
        assert_eq!(store.find(v).unwrap(), *h);
    }
    assert_eq!(store.len(), issued.len());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: growth repeats: several widenings back to back
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_handles_survive_repeated_widening() {
    // Same low byte, distinct high bits: the cohort re-collides after every
    // split until the widths separate them, forcing several enlargements.
    let store: WideStore<Pinned> = WideStore::new(8);
    let mut issued = Vec::new();
    for n in 0..300u32 {
        let v = Pinned::new(format!("wave-{n}"), 0x21 | (n << 8));
        issued.push((store.add(&v).unwrap(), v));
    }
    assert!(
        store.bit_width() >= 10,
        "expected at least two widenings, at {}",
        store.bit_width()
    );
    for (h, v) in &issued {
        assert_eq!(store.get(*h).unwrap().as_ref(), Some(v));
        assert_eq!(store.find(v).unwrap(), *h);
    }
    assert_eq!(store.len(), 300);
}
