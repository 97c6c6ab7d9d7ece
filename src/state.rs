//! Shared store core: the row vector, the `bit_width`/`hash_mask` pair, and
//! the vertical enlargement engine.
//!
//! Both store variants are the same machine with different geometry, so the
//! variant-specific numbers (bit-width range, row threshold, seed capacity)
//! live behind the [`Geometry`] trait and everything else is written once.
//!
//! Concurrency shape: a shared `&State` supports row-level operations (each
//! internally takes the row's byte lock); `&mut State`, obtainable only
//! through the storage gate's exclusive write access, is required for
//! vertical enlargement. That borrow split is the whole safety argument for
//! mutating `bit_width`, `hash_mask`, and the row vector without tearing.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use log::debug;

use crate::fingerprint::Fingerprint;
use crate::row::{Resolved, Row, RowSlot};
use crate::value::Intern;

/// Hash mask in force at a given bit width.
#[inline]
fn mask_for(bits: u8) -> u32 {
    (1u32 << bits) - 1
}

/// Row-lock or gate acquisition missed its deadline. Converted to
/// [`StoreError::LockTimeout`](crate::StoreError::LockTimeout) at the public
/// surface.
pub(crate) struct LockExpired;

/// Variant-specific sizing.
pub(crate) trait Geometry: 'static {
    /// Inclusive bit-width range; requested widths clamp into it.
    const MIN_BITS: u32;
    const MAX_BITS: u32;
    /// Width used by `Default` construction (clamped like any other).
    const DEFAULT_BITS: u32;
    /// Variant tag for diagnostics.
    const VARIANT: &'static str;

    /// Maximum slots a row may hold at the given bit width.
    fn row_threshold(bits: u32) -> usize;

    /// Capacity of a freshly allocated row, fixed at construction time from
    /// the store's initial bit width.
    fn seed_capacity(initial_bits: u32) -> usize;
}

/// Geometry of the wide store: 64-bit handles, up to 2³¹ rows.
pub(crate) struct WideGeometry;

impl Geometry for WideGeometry {
    const MIN_BITS: u32 = 8;
    const MAX_BITS: u32 = 31;
    const DEFAULT_BITS: u32 = 4;
    const VARIANT: &'static str = "wide";

    #[inline]
    fn row_threshold(bits: u32) -> usize {
        (bits * bits) as usize
    }

    #[inline]
    fn seed_capacity(initial_bits: u32) -> usize {
        Self::row_threshold(initial_bits) / 2
    }
}

/// Geometry of the short store: 32-bit handles, up to 2²⁴ rows, 8-bit slot
/// index.
pub(crate) struct ShortGeometry;

impl Geometry for ShortGeometry {
    const MIN_BITS: u32 = 9;
    const MAX_BITS: u32 = 24;
    const DEFAULT_BITS: u32 = 10;
    const VARIANT: &'static str = "short";

    #[inline]
    fn row_threshold(bits: u32) -> usize {
        ((bits - 8) * (bits - 8)) as usize
    }

    #[inline]
    fn seed_capacity(_initial_bits: u32) -> usize {
        1
    }
}

/// Point-in-time store observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Current hash bit width (grows by one per vertical enlargement).
    pub bit_width: u32,
    /// Rows addressable at the current bit width (`2^bit_width`).
    pub total_rows: u64,
    /// Rows that have actually been allocated.
    pub allocated_rows: u64,
    /// User-inserted values (the null sentinel is not counted).
    pub len: usize,
}

/// Outcome of a row-level add.
pub(crate) enum Placed {
    /// The value was already present.
    Found { row: u32, index: u32 },
    /// The value was stored in a fresh or vacated slot.
    Inserted { row: u32, index: u32 },
    /// The row is at its threshold with no free slot; the caller must
    /// enlarge vertically or overflow to an alternate row.
    Saturated,
}

pub(crate) struct State<T, G> {
    rows: Vec<RowSlot<T>>,
    bit_width: u32,
    hash_mask: u32,
    seed_capacity: usize,
    count: AtomicU64,
    allocated_rows: AtomicU32,
    _geometry: PhantomData<G>,
}

impl<T: Intern, G: Geometry> State<T, G> {
    pub(crate) fn new(requested_bits: u32) -> Self {
        let bits = requested_bits.clamp(G::MIN_BITS, G::MAX_BITS);
        let mut state = State {
            rows: (0..1usize << bits).map(|_| RowSlot::empty()).collect(),
            bit_width: bits,
            hash_mask: (1u32 << bits) - 1,
            seed_capacity: G::seed_capacity(bits),
            count: AtomicU64::new(0),
            allocated_rows: AtomicU32::new(1),
            _geometry: PhantomData,
        };
        // Row 0 exists from the start with slot 0 reserved, so handle value
        // 0 always means null and is never issued.
        let mut row0 = Row::with_capacity(state.seed_capacity);
        row0.reserve_null_slot();
        *state.rows[0].row_mut() = Some(Box::new(row0));
        state
    }

    #[inline]
    pub(crate) fn bit_width(&self) -> u32 {
        self.bit_width
    }

    #[inline]
    pub(crate) fn hash_mask(&self) -> u32 {
        self.hash_mask
    }

    #[inline]
    pub(crate) fn row_of(&self, hash: u32) -> u32 {
        hash & self.hash_mask
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub(crate) fn row_threshold(&self) -> usize {
        G::row_threshold(self.bit_width)
    }

    pub(crate) fn stats(&self) -> StoreStats {
        StoreStats {
            bit_width: self.bit_width,
            total_rows: self.rows.len() as u64,
            allocated_rows: self.allocated_rows.load(Ordering::Relaxed) as u64,
            len: self.len(),
        }
    }

    /// The handle row a slot was issued under. Values found in their
    /// hash-home row were issued at the bit width recorded in the slot;
    /// re-masking the hash reconstructs the original handle, so repeated
    /// adds and finds keep returning it across enlargements. Values sitting
    /// in an alternate (overflow) row were issued under that row directly.
    #[inline]
    fn issued_row(&self, current_row: u32, hash: u32, born_bits: u8) -> u32 {
        if self.row_of(hash) == current_row {
            hash & mask_for(born_bits)
        } else {
            current_row
        }
    }

    /// Search one row for `value` under its read lock. A hit yields the
    /// issue-time `(row, index)` handle coordinates.
    pub(crate) fn find_in_row(
        &self,
        row: u32,
        fp: Fingerprint,
        value: &T,
        deadline: Option<Instant>,
    ) -> Result<Option<(u32, u32)>, LockExpired> {
        let guard = self.rows[row as usize].read(deadline).ok_or(LockExpired)?;
        Ok(guard
            .row()
            .and_then(|r| r.find(fp, value))
            .map(|hit| (self.issued_row(row, fp.hash, hit.born_bits), hit.index)))
    }

    /// Add `value` to one specific row under its writer lock, deduplicating
    /// against concurrent adds by re-running the find while exclusive.
    pub(crate) fn add_to_row(
        &self,
        row: u32,
        fp: Fingerprint,
        value: &T,
        deadline: Option<Instant>,
    ) -> Result<Placed, LockExpired> {
        let threshold = G::row_threshold(self.bit_width);
        let mut guard = self.rows[row as usize].write(deadline).ok_or(LockExpired)?;
        let (slots, newly_allocated) = guard.row_or_alloc(self.seed_capacity);
        if newly_allocated {
            self.allocated_rows.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(hit) = slots.find(fp, value) {
            return Ok(Placed::Found {
                row: self.issued_row(row, fp.hash, hit.born_bits),
                index: hit.index,
            });
        }
        match slots.insert(fp, value.clone(), threshold, self.bit_width) {
            Some(index) => {
                self.count.fetch_add(1, Ordering::Relaxed);
                Ok(Placed::Inserted { row, index })
            }
            None => Ok(Placed::Saturated),
        }
    }

    /// Resolve `(row, index)` to a value. Tolerant: rows beyond the vector,
    /// indices beyond the row's fill, empty slots, and unallocated rows all
    /// resolve to `None`.
    ///
    /// A tombstone left by vertical enlargement forwards the lookup: its
    /// retained hash masked with the current hash mask is the row the value
    /// was moved to, where it still sits at the same index. One hop always
    /// suffices: the forward target is the value's current home by
    /// definition. The source guard is dropped before the second row is
    /// locked; the held storage lease keeps enlargement from moving anything
    /// in between.
    pub(crate) fn get(
        &self,
        row: u32,
        index: u32,
        deadline: Option<Instant>,
    ) -> Result<Option<T>, LockExpired> {
        let Some(slot) = self.rows.get(row as usize) else {
            return Ok(None);
        };
        let forwarded = {
            let guard = slot.read(deadline).ok_or(LockExpired)?;
            match guard.row() {
                None => return Ok(None),
                Some(r) => match r.resolve(index as usize) {
                    Resolved::Value(v) => return Ok(Some(v.clone())),
                    Resolved::Forwarded(hash) => hash,
                    Resolved::Absent => return Ok(None),
                },
            }
        };
        let home = self.row_of(forwarded);
        debug_assert_ne!(home, row, "tombstone forwarding to its own row");
        let guard = self.rows[home as usize].read(deadline).ok_or(LockExpired)?;
        match guard.row().map(|r| r.resolve(index as usize)) {
            Some(Resolved::Value(v)) => Ok(Some(v.clone())),
            _ => Ok(None),
        }
    }

    /// Vertical enlargement: double the row vector and re-partition every
    /// row by the new hash bit, preserving slot indices.
    ///
    /// Requires exclusive access (no read lease outstanding), which the
    /// storage gate provides. Every value whose retained hash has bit
    /// `bit_width` set moves to row `r | (1 << bit_width)` at its old index;
    /// since issued handles all predate the new bit, their row part is
    /// unchanged by the move and they keep resolving.
    pub(crate) fn grow_vertical(&mut self) {
        debug_assert!(self.bit_width < G::MAX_BITS);
        let old_bits = self.bit_width;
        let moved_bit = 1u32 << old_bits;
        let old_len = self.rows.len();

        self.rows.reserve_exact(old_len);
        for _ in 0..old_len {
            self.rows.push(RowSlot::empty());
        }

        let mut moved_values = 0usize;
        let mut rows_created = 0u32;
        let (low, high) = self.rows.split_at_mut(old_len);
        for (src_slot, dst_slot) in low.iter_mut().zip(high.iter_mut()) {
            let Some(src) = src_slot.row_mut().as_deref_mut() else {
                continue;
            };
            if let Some(dest) = src.split_high(moved_bit) {
                moved_values += dest.occupied();
                rows_created += 1;
                *dst_slot.row_mut() = Some(Box::new(dest));
            }
        }
        self.allocated_rows.fetch_add(rows_created, Ordering::Relaxed);

        self.bit_width = old_bits + 1;
        self.hash_mask = (self.hash_mask << 1) | 1;
        debug!(
            "{} store grows vertically: bit width {} -> {}, {} rows created, {} values moved",
            G::VARIANT,
            old_bits,
            self.bit_width,
            rows_created,
            moved_values,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    use crate::error::EncodingError;

    /// Payload with a caller-chosen hash so tests control row placement.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Pinned {
        name: String,
        hash: u32,
    }

    impl Pinned {
        fn new(name: &str, hash: u32) -> Self {
            Pinned {
                name: name.to_owned(),
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

    fn add(state: &State<Pinned, WideGeometry>, v: &Pinned) -> (u32, u32) {
        let fp = v.fingerprint().unwrap();
        match state.add_to_row(state.row_of(fp.hash), fp, v, None) {
            Ok(Placed::Inserted { row, index }) | Ok(Placed::Found { row, index }) => (row, index),
            _ => panic!("row saturated in test"),
        }
    }

    #[test]
    fn construction_clamps_bits_and_reserves_the_sentinel() {
        let state: State<Pinned, WideGeometry> = State::new(4);
        assert_eq!(state.bit_width(), 8);
        assert_eq!(state.hash_mask(), 0xFF);
        assert_eq!(state.stats().total_rows, 256);
        assert_eq!(state.stats().allocated_rows, 1);
        // Slot (0, 0) is reserved: the first value in row 0 gets index 1.
        let v = Pinned::new("first", 0);
        assert_eq!(add(&state, &v), (0, 1));
    }

    #[test]
    fn add_find_get_round_trip() {
        let state: State<Pinned, WideGeometry> = State::new(8);
        let v = Pinned::new("payload", 0x0000_1234);
        let (row, index) = add(&state, &v);
        assert_eq!(row, 0x34);
        let fp = v.fingerprint().unwrap();
        assert_eq!(
            state.find_in_row(row, fp, &v, None).ok().flatten(),
            Some((row, index))
        );
        assert_eq!(state.get(row, index, None).ok().flatten(), Some(v));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn get_is_tolerant_of_nonsense_coordinates() {
        let state: State<Pinned, WideGeometry> = State::new(8);
        assert!(state.get(0xFFFF, 0, None).ok().flatten().is_none());
        assert!(state.get(5, 0, None).ok().flatten().is_none()); // unallocated row
        assert!(state.get(0, 99, None).ok().flatten().is_none()); // beyond fill
    }

    #[test]
    fn vertical_growth_preserves_coordinates_and_separates_by_new_bit() {
        let mut state: State<Pinned, WideGeometry> = State::new(8);
        // Hashes agree on the low 8 bits (row 0x42) and differ on bit 8.
        let stays = Pinned::new("stays", 0x0000_0042);
        let moves = Pinned::new("moves", 0x0000_0142);
        let (row_s, idx_s) = add(&state, &stays);
        let (row_m, idx_m) = add(&state, &moves);
        assert_eq!((row_s, row_m), (0x42, 0x42));

        state.grow_vertical();
        assert_eq!(state.bit_width(), 9);
        assert_eq!(state.hash_mask(), 0x1FF);

        // Old coordinates still resolve for the value that stayed...
        assert_eq!(state.get(0x42, idx_s, None).ok().flatten(), Some(stays.clone()));
        // ...and for the mover, whose old slot forwards to row 0x142 where
        // it kept its slot index.
        assert_eq!(state.get(0x42, idx_m, None).ok().flatten(), Some(moves.clone()));
        assert_eq!(state.get(0x142, idx_m, None).ok().flatten(), Some(moves.clone()));

        // Post-growth placement agrees with the widened mask, and the find
        // reports the issue-time handle row, not the current one.
        let fp = moves.fingerprint().unwrap();
        assert_eq!(state.row_of(fp.hash), 0x142);
        assert_eq!(
            state.find_in_row(0x142, fp, &moves, None).ok().flatten(),
            Some((0x42, idx_m))
        );
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn growth_leaves_unrelated_rows_unallocated() {
        let mut state: State<Pinned, WideGeometry> = State::new(8);
        let v = Pinned::new("lone", 0x0000_0007);
        add(&state, &v);
        let before = state.stats().allocated_rows;
        state.grow_vertical();
        // Nothing had bit 8 set, so no new row came into being.
        assert_eq!(state.stats().allocated_rows, before);
        assert_eq!(state.stats().total_rows, 512);
    }

    #[test]
    fn short_geometry_thresholds() {
        assert_eq!(ShortGeometry::row_threshold(9), 1);
        assert_eq!(ShortGeometry::row_threshold(10), 4);
        assert_eq!(ShortGeometry::row_threshold(24), 256);
        assert_eq!(WideGeometry::row_threshold(8), 64);
        assert_eq!(WideGeometry::row_threshold(31), 961);
        assert_eq!(WideGeometry::seed_capacity(8), 32);
        assert_eq!(ShortGeometry::seed_capacity(10), 1);
    }
}
