//! The short store: 32-bit handles, up to 2²⁴ rows of at most 256 slots.
//!
//! Same machine as the wide store with tighter geometry, plus one extra
//! mechanism: once the bit width is maxed out, a full primary row overflows
//! into three alternate rows derived deterministically from it. Lookups
//! probe the same rows in the same fixed order, so the first positive result
//! is also the canonical one. Only when all four candidate rows are full
//! does [`add`](ShortStore::add) fail with
//! [`StoreError::OutOfCapacity`].

use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::fingerprint::Fingerprint;
use crate::gate::StorageGate;
use crate::handle::ShortHandle;
use crate::state::{Geometry, Placed, ShortGeometry, State, StoreStats};
use crate::value::Intern;

/// Alternate-row probing applies once rows can hold 256 entries, i.e. at the
/// maximum bit width.
const ALTERNATE_MIN_THRESHOLD: usize = 256;

/// The three overflow rows for `row`, in probe order: bitwise complement,
/// 24-bit rotation by 12, complement of the rotation. All masked to the
/// current row range.
fn alternate_rows(row: u32, mask: u32) -> [u32; 3] {
    let r2 = !row & mask;
    let r3 = ((row << 12) | (row >> 12)) & mask;
    let r4 = !r3 & mask;
    [r2, r3, r4]
}

/// Probe order with the primary row first and duplicate candidates dropped
/// (the derivations can coincide, e.g. row 0's rotation is row 0).
fn candidate_rows(primary: u32, mask: u32) -> Vec<u32> {
    let mut rows = Vec::with_capacity(4);
    rows.push(primary);
    for alt in alternate_rows(primary, mask) {
        if !rows.contains(&alt) {
            rows.push(alt);
        }
    }
    rows
}

/// Hash-indexed interning store issuing 32-bit handles.
///
/// The compact cousin of [`WideStore`](crate::WideStore): half the handle
/// width, bounded row size, and a 4-way overflow scheme once the row count
/// is maxed out.
pub struct ShortStore<T: Intern> {
    gate: StorageGate<State<T, ShortGeometry>>,
    lock_timeout: Option<Duration>,
}

impl<T: Intern> ShortStore<T> {
    /// Create a store with the given hash bit width, clamped to `[9, 24]`.
    pub fn new(bit_width: u32) -> Self {
        ShortStore {
            gate: StorageGate::new(State::new(bit_width)),
            lock_timeout: None,
        }
    }

    /// Arm every lock acquisition in this store with a deadline. Expiry
    /// surfaces as [`StoreError::LockTimeout`] and leaves the store
    /// unchanged.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    #[inline]
    fn deadline(&self) -> Option<Instant> {
        self.lock_timeout.map(|t| Instant::now() + t)
    }

    #[inline]
    fn timeout_error(&self) -> StoreError {
        StoreError::LockTimeout(self.lock_timeout.unwrap_or_default())
    }

    /// Intern `value`, returning its handle. Returns the existing handle for
    /// a value already present. Fails with
    /// [`StoreError::OutOfCapacity`] only when the bit width is at its
    /// maximum and all four candidate rows are full.
    pub fn add(&self, value: &T) -> Result<ShortHandle, StoreError> {
        let fp = value.fingerprint()?;
        let deadline = self.deadline();
        loop {
            let (placed, observed_bits) = {
                let state = self
                    .gate
                    .read_lease(deadline)
                    .ok_or_else(|| self.timeout_error())?;
                let row = state.row_of(fp.hash);
                let placed = state
                    .add_to_row(row, fp, value, deadline)
                    .map_err(|_| self.timeout_error())?;
                (placed, state.bit_width())
            };
            match placed {
                Placed::Found { row, index } | Placed::Inserted { row, index } => {
                    return Ok(ShortHandle::pack(row, index));
                }
                Placed::Saturated if observed_bits >= ShortGeometry::MAX_BITS => {
                    return self.add_overflow(fp, value, deadline);
                }
                Placed::Saturated => self.enlarge(observed_bits, deadline)?,
            }
        }
    }

    /// Overflow insertion at maximum bit width: first alternate row with
    /// room wins. Rows only ever fill up here (no enlargement remains
    /// possible), so probing them in fixed order under their writer locks
    /// keeps concurrent adds of the same value deduplicated.
    fn add_overflow(
        &self,
        fp: Fingerprint,
        value: &T,
        deadline: Option<Instant>,
    ) -> Result<ShortHandle, StoreError> {
        let state = self
            .gate
            .read_lease(deadline)
            .ok_or_else(|| self.timeout_error())?;
        let primary = state.row_of(fp.hash);
        for alt in alternate_rows(primary, state.hash_mask()) {
            if alt == primary {
                continue;
            }
            match state
                .add_to_row(alt, fp, value, deadline)
                .map_err(|_| self.timeout_error())?
            {
                Placed::Found { row, index } | Placed::Inserted { row, index } => {
                    return Ok(ShortHandle::pack(row, index));
                }
                Placed::Saturated => continue,
            }
        }
        Err(StoreError::OutOfCapacity)
    }

    /// Handle of `value` if present, [`ShortHandle::NULL`] otherwise.
    ///
    /// At maximum bit width the probe covers the primary row and its three
    /// alternates; ties break by probe order.
    pub fn find(&self, value: &T) -> Result<ShortHandle, StoreError> {
        let fp = value.fingerprint()?;
        let deadline = self.deadline();
        let state = self
            .gate
            .read_lease(deadline)
            .ok_or_else(|| self.timeout_error())?;
        let primary = state.row_of(fp.hash);
        let probe_alternates = state.row_threshold() >= ALTERNATE_MIN_THRESHOLD;
        let rows = if probe_alternates {
            candidate_rows(primary, state.hash_mask())
        } else {
            vec![primary]
        };
        for row in rows {
            if let Some((issued_row, index)) = state
                .find_in_row(row, fp, value, deadline)
                .map_err(|_| self.timeout_error())?
            {
                return Ok(ShortHandle::pack(issued_row, index));
            }
        }
        Ok(ShortHandle::NULL)
    }

    /// Whether `value` is interned.
    pub fn contains(&self, value: &T) -> Result<bool, StoreError> {
        Ok(!self.find(value)?.is_null())
    }

    /// Resolve a handle. `Ok(None)` for the null handle and for any handle
    /// that does not address a stored value.
    pub fn get(&self, handle: ShortHandle) -> Result<Option<T>, StoreError> {
        if handle.is_null() {
            return Ok(None);
        }
        let deadline = self.deadline();
        let state = self
            .gate
            .read_lease(deadline)
            .ok_or_else(|| self.timeout_error())?;
        state
            .get(handle.row(), handle.index(), deadline)
            .map_err(|_| self.timeout_error())
    }

    /// Number of interned values.
    pub fn len(&self) -> usize {
        self.gate.read_lease(None).expect("untimed lease").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current hash bit width. Grows by one per vertical enlargement.
    pub fn bit_width(&self) -> u32 {
        self.gate.read_lease(None).expect("untimed lease").bit_width()
    }

    /// Point-in-time observability snapshot.
    pub fn stats(&self) -> StoreStats {
        self.gate.read_lease(None).expect("untimed lease").stats()
    }

    fn enlarge(&self, observed_bits: u32, deadline: Option<Instant>) -> Result<(), StoreError> {
        let mut state = self
            .gate
            .write_access(deadline)
            .ok_or_else(|| self.timeout_error())?;
        if state.bit_width() != observed_bits {
            return Ok(());
        }
        debug_assert!(observed_bits < ShortGeometry::MAX_BITS);
        state.grow_vertical();
        Ok(())
    }
}

impl<T: Intern> Default for ShortStore<T> {
    fn default() -> Self {
        Self::new(ShortGeometry::DEFAULT_BITS)
    }
}
