//! The storage broker: one process-wide reader/writer gate per store.
//!
//! Every row operation holds a read lease for its full duration; vertical
//! enlargement takes the gate exclusively, which both waits out in-flight
//! row operations and blocks new ones until the enlarged row vector is
//! published. Lease-then-row-lock ordering is what makes the composition
//! deadlock-free: the enlargement engine never back-acquires a row lock
//! while holding the gate.
//!
//! Backed by `parking_lot::RwLock` for its timed acquisition: a store
//! configured with a lock deadline propagates it here as well as to the row
//! locks.

use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) struct StorageGate<S> {
    inner: RwLock<S>,
}

impl<S> StorageGate<S> {
    pub(crate) fn new(state: S) -> Self {
        StorageGate {
            inner: RwLock::new(state),
        }
    }

    /// Take a read lease for the duration of one row operation.
    /// `None` only on deadline expiry.
    pub(crate) fn read_lease(&self, deadline: Option<Instant>) -> Option<RwLockReadGuard<'_, S>> {
        match deadline {
            None => Some(self.inner.read()),
            Some(d) => self.inner.try_read_until(d),
        }
    }

    /// Take exclusive write access for vertical enlargement.
    /// `None` only on deadline expiry.
    pub(crate) fn write_access(
        &self,
        deadline: Option<Instant>,
    ) -> Option<RwLockWriteGuard<'_, S>> {
        match deadline {
            None => Some(self.inner.write()),
            Some(d) => self.inner.try_write_until(d),
        }
    }
}
