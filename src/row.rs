//! Row storage: parallel slot arrays plus a free-index stack.
//!
//! A row holds the values whose primary hash lands on one handex, along with
//! each slot's 8-bit signature, retained 32-bit hash, and the hash bit width
//! in force when the slot was filled. The logical length is `fill`; slots
//! below it are either occupied, empty (reusable via the `free` stack), or
//! tombstones left behind by vertical enlargement.
//!
//! Two rules keep every issued handle valid forever:
//!
//! * a value never changes its slot index, in this row or any row it is
//!   moved to;
//! * when enlargement moves a value out, the vacated slot becomes a
//!   [`Slot::Moved`] tombstone that keeps the retained hash; masking that
//!   hash with the store's current mask names the row the value lives in
//!   now. Tombstones are never reused, so an old handle can always be
//!   forwarded.
//!
//! Rows are allocated lazily: the outer vector stores a [`RowSlot`] per
//! handex, which is just the row's byte lock plus an empty cell until the
//! first insert hits that handex.

use std::cell::UnsafeCell;
use std::time::Instant;

use log::trace;

use crate::fingerprint::Fingerprint;
use crate::rowlock::RowLock;
use crate::scan::SigScan;
use crate::value::Intern;

/// Smallest integer `s` with `s² ≥ n`.
fn isqrt_ceil(n: usize) -> usize {
    let mut s = (n as f64).sqrt() as usize;
    while s * s < n {
        s += 1;
    }
    while s > 0 && (s - 1) * (s - 1) >= n {
        s -= 1;
    }
    s
}

/// Square-progression growth step: the next perfect square strictly above
/// `cur` by one side length (32 → 49 → 64 → 81 → …). Bounds amortized copy
/// cost while keeping small rows dense.
#[inline]
pub(crate) fn next_square_capacity(cur: usize) -> usize {
    let side = isqrt_ceil(cur) + 1;
    side * side
}

/// One storage slot.
enum Slot<T> {
    /// Never filled, or skipped during a row split; reusable via the free
    /// stack.
    Empty,
    /// Holds an interned value.
    Full(T),
    /// The value moved to another row during vertical enlargement. The
    /// parallel `hashes` entry still holds its hash; the slot is permanently
    /// reserved so the value's original handle keeps resolving.
    Moved,
}

/// A positive find: the slot index plus the bit width recorded at insertion
/// (from which the issue-time handle row is reconstructed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowHit {
    pub(crate) index: u32,
    pub(crate) born_bits: u8,
}

/// Outcome of resolving one slot by handle coordinates.
pub(crate) enum Resolved<'a, T> {
    Value(&'a T),
    /// The value moved out during enlargement; its retained hash, masked
    /// with the current hash mask, is the row it lives in now.
    Forwarded(u32),
    Absent,
}

/// One row: parallel `slots` / `sigs` / `hashes` / `born` arrays of equal
/// capacity, a `fill` watermark, and the stack of reusable indices below it.
pub(crate) struct Row<T> {
    slots: Box<[Slot<T>]>,
    sigs: Box<[u8]>,
    hashes: Box<[u32]>,
    born: Box<[u8]>,
    free: Vec<u32>,
    fill: usize,
}

impl<T> Row<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity >= 1);
        Row {
            slots: std::iter::repeat_with(|| Slot::Empty).take(capacity).collect(),
            sigs: vec![0u8; capacity].into_boxed_slice(),
            hashes: vec![0u32; capacity].into_boxed_slice(),
            born: vec![0u8; capacity].into_boxed_slice(),
            free: Vec::new(),
            fill: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn fill(&self) -> usize {
        self.fill
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The stored value at `index`: `None` for empties, tombstones, and
    /// indices at or beyond `fill`.
    #[cfg(test)]
    pub(crate) fn value(&self, index: usize) -> Option<&T> {
        if index >= self.fill {
            return None;
        }
        match &self.slots[index] {
            Slot::Full(v) => Some(v),
            _ => None,
        }
    }

    /// Resolve handle coordinates against this row.
    pub(crate) fn resolve(&self, index: usize) -> Resolved<'_, T> {
        if index >= self.fill {
            return Resolved::Absent;
        }
        match &self.slots[index] {
            Slot::Full(v) => Resolved::Value(v),
            Slot::Moved => Resolved::Forwarded(self.hashes[index]),
            Slot::Empty => Resolved::Absent,
        }
    }

    /// Reserve slot 0 as the null sentinel. Applied to row 0 at store
    /// construction so handle value 0 is never issued for a user value.
    pub(crate) fn reserve_null_slot(&mut self) {
        debug_assert_eq!(self.fill, 0);
        self.fill = 1;
    }
}

impl<T: Intern> Row<T> {
    /// Locate `value` in this row: signature candidates in ascending slot
    /// order, confirmed by retained hash and payload equality.
    pub(crate) fn find(&self, fp: Fingerprint, value: &T) -> Option<RowHit> {
        for i in SigScan::new(&self.sigs[..self.fill], fp.sig) {
            if self.hashes[i] != fp.hash {
                continue;
            }
            if let Slot::Full(stored) = &self.slots[i] {
                if stored == value {
                    return Some(RowHit {
                        index: i as u32,
                        born_bits: self.born[i],
                    });
                }
            }
        }
        None
    }

    /// Insert `value` into a reusable slot if one exists, else append,
    /// growing in place up to `threshold`. `bits` is the store's current
    /// hash bit width, recorded per slot. Returns the slot index, or `None`
    /// when the row is saturated and the caller must enlarge vertically or
    /// overflow.
    pub(crate) fn insert(
        &mut self,
        fp: Fingerprint,
        value: T,
        threshold: usize,
        bits: u32,
    ) -> Option<u32> {
        let index = match self.free.pop() {
            Some(i) => i as usize,
            None => {
                if self.fill == self.capacity() {
                    if self.capacity() >= threshold {
                        return None;
                    }
                    self.grow(threshold);
                }
                let i = self.fill;
                self.fill += 1;
                i
            }
        };
        debug_assert!(
            matches!(self.slots[index], Slot::Empty),
            "insert into non-empty slot"
        );
        self.slots[index] = Slot::Full(value);
        self.sigs[index] = fp.sig;
        self.hashes[index] = fp.hash;
        self.born[index] = bits as u8;
        debug_assert!(self.fill <= self.capacity() && self.capacity() <= threshold);
        Some(index as u32)
    }

    /// Horizontal enlargement: fresh arrays one square step larger (capped
    /// at `threshold`), live prefix carried over. Slot indices, and with
    /// them every issued handle, are unchanged.
    fn grow(&mut self, threshold: usize) {
        let old_cap = self.capacity();
        let new_cap = next_square_capacity(old_cap).min(threshold);
        debug_assert!(new_cap > old_cap);
        trace!("row grows horizontally: {old_cap} -> {new_cap} slots");

        let mut slots: Box<[Slot<T>]> =
            std::iter::repeat_with(|| Slot::Empty).take(new_cap).collect();
        let mut sigs = vec![0u8; new_cap].into_boxed_slice();
        let mut hashes = vec![0u32; new_cap].into_boxed_slice();
        let mut born = vec![0u8; new_cap].into_boxed_slice();
        for i in 0..self.fill {
            slots[i] = std::mem::replace(&mut self.slots[i], Slot::Empty);
        }
        sigs[..self.fill].copy_from_slice(&self.sigs[..self.fill]);
        hashes[..self.fill].copy_from_slice(&self.hashes[..self.fill]);
        born[..self.fill].copy_from_slice(&self.born[..self.fill]);

        self.slots = slots;
        self.sigs = sigs;
        self.hashes = hashes;
        self.born = born;
    }

    /// Vertical-enlargement split: extract every occupied slot whose
    /// retained hash has `moved_bit` set into a new row, **at the same slot
    /// index**. Each vacated slot becomes a tombstone that forwards old
    /// handles by its retained hash; indices the new row did not receive
    /// pre-populate its free stack. Returns `None` when nothing moves (the
    /// destination row stays unallocated).
    pub(crate) fn split_high(&mut self, moved_bit: u32) -> Option<Row<T>> {
        let migrates = (0..self.fill).any(|i| {
            matches!(self.slots[i], Slot::Full(_)) && self.hashes[i] & moved_bit != 0
        });
        if !migrates {
            return None;
        }

        let mut dest = Row::with_capacity(self.capacity());
        dest.fill = self.fill;
        for i in 0..self.fill {
            let moves =
                matches!(self.slots[i], Slot::Full(_)) && self.hashes[i] & moved_bit != 0;
            if moves {
                dest.slots[i] = std::mem::replace(&mut self.slots[i], Slot::Moved);
                dest.sigs[i] = self.sigs[i];
                dest.hashes[i] = self.hashes[i];
                dest.born[i] = self.born[i];
                // The tombstone keeps hashes[i] for forwarding; the
                // signature is cleared so scans skip it cheaply.
                self.sigs[i] = 0;
            } else {
                dest.free.push(i as u32);
            }
        }
        Some(dest)
    }

    /// Count of occupied slots. Growth diagnostics only.
    pub(crate) fn occupied(&self) -> usize {
        (0..self.fill)
            .filter(|&i| matches!(self.slots[i], Slot::Full(_)))
            .count()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RowSlot: lazily-allocated row behind its byte lock
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of the outer row vector: the row's byte lock plus the row
/// itself, unallocated until first use.
///
/// Interior mutability is gated by [`RowLock`]: shared access to the cell
/// requires a held read admission, exclusive access a held write admission.
/// The RAII guards below are the only way into the cell while the store is
/// shared; vertical enlargement reaches it through `&mut self` instead,
/// which the storage gate makes exclusive.
pub(crate) struct RowSlot<T> {
    lock: RowLock,
    row: UnsafeCell<Option<Box<Row<T>>>>,
}

// SAFETY: the cell is only dereferenced under the row lock discipline
// documented above, so shared references never coexist with mutation.
unsafe impl<T: Send> Send for RowSlot<T> {}
unsafe impl<T: Send + Sync> Sync for RowSlot<T> {}

impl<T> RowSlot<T> {
    pub(crate) fn empty() -> Self {
        RowSlot {
            lock: RowLock::new(),
            row: UnsafeCell::new(None),
        }
    }

    /// Admit a reader. `None` only on deadline expiry.
    pub(crate) fn read(&self, deadline: Option<Instant>) -> Option<RowReadGuard<'_, T>> {
        // Guard construction must stay behind the acquisition check: a
        // guard's drop releases the lock.
        if self.lock.acquire_read(deadline) {
            Some(RowReadGuard { slot: self })
        } else {
            None
        }
    }

    /// Admit the writer. `None` only on deadline expiry.
    pub(crate) fn write(&self, deadline: Option<Instant>) -> Option<RowWriteGuard<'_, T>> {
        if self.lock.acquire_write(deadline) {
            Some(RowWriteGuard { slot: self })
        } else {
            None
        }
    }

    /// Direct access under exclusive ownership of the whole store (held by
    /// the enlargement engine via the storage gate).
    pub(crate) fn row_mut(&mut self) -> &mut Option<Box<Row<T>>> {
        debug_assert!(self.lock.is_idle(), "row lock held during exclusive access");
        self.row.get_mut()
    }
}

/// Shared view of one row, released on drop.
pub(crate) struct RowReadGuard<'a, T> {
    slot: &'a RowSlot<T>,
}

impl<'a, T> RowReadGuard<'a, T> {
    #[inline]
    pub(crate) fn row(&self) -> Option<&Row<T>> {
        // SAFETY: read admission is held for the guard's lifetime; writers
        // are excluded, other readers only take shared references.
        unsafe { (*self.slot.row.get()).as_deref() }
    }
}

impl<'a, T> Drop for RowReadGuard<'a, T> {
    fn drop(&mut self) {
        self.slot.lock.release_read();
    }
}

/// Exclusive view of one row, released on drop.
pub(crate) struct RowWriteGuard<'a, T> {
    slot: &'a RowSlot<T>,
}

impl<'a, T> RowWriteGuard<'a, T> {
    /// The row, allocating it with `capacity` slots on first use. Also
    /// reports whether this call performed the allocation.
    #[inline]
    pub(crate) fn row_or_alloc(&mut self, capacity: usize) -> (&mut Row<T>, bool) {
        // SAFETY: write admission is held and all readers have drained; this
        // guard is the only access path until drop.
        let cell = unsafe { &mut *self.slot.row.get() };
        let allocated = cell.is_none();
        let row = cell.get_or_insert_with(|| Box::new(Row::with_capacity(capacity)));
        (row, allocated)
    }
}

impl<'a, T> Drop for RowWriteGuard<'a, T> {
    fn drop(&mut self) {
        self.slot.lock.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::of(s.as_bytes())
    }

    fn insert(row: &mut Row<String>, f: Fingerprint, v: &str, threshold: usize) -> Option<u32> {
        row.insert(f, v.to_owned(), threshold, 8)
    }

    #[test]
    fn square_progression_from_32() {
        assert_eq!(next_square_capacity(32), 49);
        assert_eq!(next_square_capacity(49), 64);
        assert_eq!(next_square_capacity(1), 4);
        assert_eq!(next_square_capacity(4), 9);
        assert_eq!(next_square_capacity(9), 16);
    }

    #[test]
    fn insert_walks_the_square_progression_up_to_threshold() {
        let mut row: Row<String> = Row::with_capacity(32);
        let mut seen_caps = vec![row.capacity()];
        for n in 0..64 {
            let v = format!("value-{n}");
            assert!(insert(&mut row, fp(&v), &v, 64).is_some());
            if *seen_caps.last().unwrap() != row.capacity() {
                seen_caps.push(row.capacity());
            }
            assert!(row.fill() <= row.capacity() && row.capacity() <= 64);
        }
        assert_eq!(seen_caps, vec![32, 49, 64]);
        // Saturated: the 65th insert is refused.
        assert_eq!(insert(&mut row, fp("overflow"), "overflow", 64), None);
    }

    #[test]
    fn find_confirms_signature_candidates_by_value() {
        let mut row: Row<String> = Row::with_capacity(8);
        let a = String::from("alpha");
        let b = String::from("beta");
        let ia = insert(&mut row, fp(&a), &a, 64).unwrap();
        let ib = insert(&mut row, fp(&b), &b, 64).unwrap();
        assert_eq!(row.find(fp(&a), &a).unwrap().index, ia);
        assert_eq!(row.find(fp(&b), &b).unwrap().index, ib);
        assert!(row.find(fp("gamma"), &String::from("gamma")).is_none());
    }

    #[test]
    fn find_reports_the_bit_width_recorded_at_insertion() {
        let mut row: Row<String> = Row::with_capacity(4);
        let v = String::from("early");
        row.insert(fp(&v), v.clone(), 64, 9).unwrap();
        assert_eq!(row.find(fp(&v), &v).unwrap().born_bits, 9);
    }

    #[test]
    fn growth_preserves_slot_indices() {
        let mut row: Row<String> = Row::with_capacity(1);
        let mut slots = Vec::new();
        for n in 0..20 {
            let v = format!("v{n}");
            slots.push((insert(&mut row, fp(&v), &v, 64).unwrap(), v));
        }
        for (i, v) in &slots {
            assert_eq!(row.value(*i as usize), Some(v));
        }
    }

    #[test]
    fn split_moves_matching_hashes_at_same_index() {
        let moved_bit = 1u32 << 4;
        let mut row: Row<String> = Row::with_capacity(8);
        let mut expectations = Vec::new();
        for n in 0..6u32 {
            let v = format!("v{n}");
            // Alternate the moved bit by hand so the split is deterministic.
            let f = Fingerprint {
                hash: if n % 2 == 0 { n } else { n | moved_bit },
                sig: fp(&v).sig,
            };
            let i = insert(&mut row, f, &v, 64).unwrap();
            expectations.push((i as usize, v, n % 2 != 0));
        }

        let dest = row.split_high(moved_bit).expect("half the slots migrate");
        assert_eq!(dest.fill(), row.fill());
        for (i, v, moved) in expectations {
            if moved {
                assert_eq!(dest.value(i), Some(&v));
                assert_eq!(row.value(i), None);
                // The vacated slot forwards by the retained hash.
                assert!(matches!(row.resolve(i), Resolved::Forwarded(h) if h & moved_bit != 0));
            } else {
                assert_eq!(row.value(i), Some(&v));
                assert_eq!(dest.value(i), None);
            }
        }
        assert_eq!(row.occupied(), 3);
        assert_eq!(dest.occupied(), 3);
    }

    #[test]
    fn split_with_no_migrants_allocates_nothing() {
        let mut row: Row<String> = Row::with_capacity(4);
        let f = Fingerprint { hash: 3, sig: 7 };
        row.insert(f, String::from("stay"), 64, 8).unwrap();
        assert!(row.split_high(1 << 8).is_none());
    }

    #[test]
    fn tombstones_are_not_reused_but_skipped_indices_are() {
        let moved_bit = 1u32 << 3;
        let mut row: Row<String> = Row::with_capacity(8);
        for n in 0..4u32 {
            let v = format!("v{n}");
            let f = Fingerprint {
                hash: moved_bit | n,
                sig: 1,
            };
            insert(&mut row, f, &v, 64).unwrap();
        }
        // Everything migrates; the source keeps four tombstones.
        let mut dest = row.split_high(moved_bit).unwrap();
        assert_eq!(row.occupied(), 0);
        assert_eq!(row.fill(), 4);

        // Source tombstones stay reserved: a fresh insert appends past them.
        let i = row
            .insert(Fingerprint { hash: 0, sig: 2 }, String::from("fresh"), 64, 9)
            .unwrap();
        assert_eq!(i, 4);

        // Destination skipped indices are genuinely free, popped from the
        // top of the stack, but nothing was skipped here, so its stack is
        // empty and an insert appends at the watermark.
        let j = dest
            .insert(Fingerprint { hash: 9, sig: 3 }, String::from("dest"), 64, 9)
            .unwrap();
        assert_eq!(j, 4);
    }

    #[test]
    fn destination_free_stack_reuses_skipped_indices_from_the_top() {
        let moved_bit = 1u32 << 3;
        let mut row: Row<String> = Row::with_capacity(8);
        // Slots 0 and 2 migrate, slots 1 and 3 stay.
        for n in 0..4u32 {
            let v = format!("v{n}");
            let f = Fingerprint {
                hash: if n % 2 == 0 { moved_bit | n } else { n },
                sig: 1,
            };
            insert(&mut row, f, &v, 64).unwrap();
        }
        let mut dest = row.split_high(moved_bit).unwrap();
        // Skipped indices 1 and 3 are free in the destination; 3 pops first.
        let i = dest
            .insert(Fingerprint { hash: 8, sig: 2 }, String::from("reuse"), 64, 9)
            .unwrap();
        assert_eq!(i, 3);
        let i = dest
            .insert(Fingerprint { hash: 16, sig: 2 }, String::from("reuse2"), 64, 9)
            .unwrap();
        assert_eq!(i, 1);
        assert_eq!(dest.fill(), 4, "reuse must not advance the watermark");
    }

    #[test]
    fn sentinel_slot_is_never_handed_out() {
        let mut row: Row<String> = Row::with_capacity(4);
        row.reserve_null_slot();
        let i = insert(&mut row, fp("first"), "first", 64).unwrap();
        assert_eq!(i, 1);
        assert_eq!(row.value(0), None);
        assert!(matches!(row.resolve(0), Resolved::Absent));
    }
}
