//! The wide store: 64-bit handles, up to 2³¹ rows.
//!
//! Operation shape: take a storage read lease, compute the fingerprint's
//! row, and work under that row's byte lock. When an insert finds its row
//! saturated, the lease is dropped and the store re-entered through the
//! gate's exclusive side for vertical enlargement, then the insert retries
//! against the widened mask. Issued handles survive every enlargement.

use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::gate::StorageGate;
use crate::handle::WideHandle;
use crate::state::{Geometry, Placed, State, StoreStats, WideGeometry};
use crate::value::Intern;

/// Hash-indexed interning store issuing 64-bit handles.
///
/// Values are inserted once and never move or disappear: the handle returned
/// by [`add`](Self::add) resolves to the same value for the lifetime of the
/// store, across any amount of growth.
pub struct WideStore<T: Intern> {
    gate: StorageGate<State<T, WideGeometry>>,
    lock_timeout: Option<Duration>,
}

impl<T: Intern> WideStore<T> {
    /// Create a store with the given hash bit width, clamped to `[8, 31]`.
    pub fn new(bit_width: u32) -> Self {
        WideStore {
            gate: StorageGate::new(State::new(bit_width)),
            lock_timeout: None,
        }
    }

    /// Arm every lock acquisition in this store with a deadline. Expiry
    /// surfaces as [`StoreError::LockTimeout`] and leaves the store
    /// unchanged. Without this, operations wait indefinitely.
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

    /// Intern `value`, returning its handle. Returns the existing handle if
    /// an equal value is already present (and leaves [`len`](Self::len)
    /// unchanged).
    pub fn add(&self, value: &T) -> Result<WideHandle, StoreError> {
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
                    return Ok(WideHandle::pack(row, index));
                }
                Placed::Saturated => self.enlarge(observed_bits, deadline)?,
            }
        }
    }

    /// Handle of `value` if present, [`WideHandle::NULL`] otherwise.
    pub fn find(&self, value: &T) -> Result<WideHandle, StoreError> {
        let fp = value.fingerprint()?;
        let deadline = self.deadline();
        let state = self
            .gate
            .read_lease(deadline)
            .ok_or_else(|| self.timeout_error())?;
        let row = state.row_of(fp.hash);
        match state
            .find_in_row(row, fp, value, deadline)
            .map_err(|_| self.timeout_error())?
        {
            Some((issued_row, index)) => Ok(WideHandle::pack(issued_row, index)),
            None => Ok(WideHandle::NULL),
        }
    }

    /// Whether `value` is interned.
    pub fn contains(&self, value: &T) -> Result<bool, StoreError> {
        Ok(!self.find(value)?.is_null())
    }

    /// Resolve a handle. `Ok(None)` for the null handle and for any handle
    /// that does not address a stored value.
    pub fn get(&self, handle: WideHandle) -> Result<Option<T>, StoreError> {
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

    /// Double the row count, moving values by their next hash bit. Re-checks
    /// under exclusive access so concurrent saturated inserts trigger only
    /// one enlargement.
    fn enlarge(&self, observed_bits: u32, deadline: Option<Instant>) -> Result<(), StoreError> {
        let mut state = self
            .gate
            .write_access(deadline)
            .ok_or_else(|| self.timeout_error())?;
        if state.bit_width() != observed_bits {
            // Lost the race; the retry loop re-reads the widened mask.
            return Ok(());
        }
        if observed_bits >= WideGeometry::MAX_BITS {
            return Err(StoreError::OutOfCapacity);
        }
        state.grow_vertical();
        Ok(())
    }
}

impl<T: Intern> Default for WideStore<T> {
    /// The conventional default bit width (4) clamps up to the minimum of 8.
    fn default() -> Self {
        Self::new(WideGeometry::DEFAULT_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_clamps_to_minimum_bit_width() {
        // The conventional default of 4 is below the wide minimum and
        // silently clamps up. (The upper clamp is exercised on the short
        // store; a width-31 wide store allocates 2³¹ row slots.)
        let store: WideStore<String> = WideStore::default();
        assert_eq!(store.bit_width(), 8);
        let store: WideStore<String> = WideStore::new(1);
        assert_eq!(store.bit_width(), 8);
    }

    #[test]
    fn add_then_get_round_trips() {
        let store: WideStore<String> = WideStore::new(8);
        let v = String::from("payload");
        let h = store.add(&v).unwrap();
        assert!(!h.is_null());
        assert_eq!(store.get(h).unwrap(), Some(v.clone()));
        assert_eq!(store.find(&v).unwrap(), h);
        assert!(store.contains(&v).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn absent_values_find_null() {
        let store: WideStore<String> = WideStore::new(8);
        assert!(store.find(&String::from("missing")).unwrap().is_null());
        assert!(!store.contains(&String::from("missing")).unwrap());
        assert_eq!(store.get(WideHandle::NULL).unwrap(), None);
    }

    #[test]
    fn stats_reflect_inserts() {
        let store: WideStore<String> = WideStore::new(8);
        for n in 0..50 {
            store.add(&format!("value-{n}")).unwrap();
        }
        let stats = store.stats();
        assert_eq!(stats.len, 50);
        assert_eq!(stats.bit_width, 8);
        assert!(stats.allocated_rows >= 1 && stats.allocated_rows <= 51);
    }
}
