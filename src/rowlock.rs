//! Per-row reader/writer lock packed into a single byte.
//!
//! Layout of the lock byte: bit 7 is the writer flag, bits 6..0 count active
//! readers (at most 127). The whole protocol works on one `AtomicU8` per row,
//! which keeps the lock table dense even when the store holds millions of
//! rows.
//!
//! Protocol:
//!
//! * **read**: admitted while the writer flag is clear and fewer than 127
//!   readers are active; otherwise the caller waits and retries.
//! * **write**: the writer flag is claimed first (blocking new readers from
//!   entering), then the claimant waits for the reader count to drain to
//!   zero before it may mutate.
//!
//! Waiting is cooperative: a short spin escalates to `thread::yield_now`, so
//! stalled acquirers hand the core to whoever holds the lock. An optional
//! deadline turns an over-long wait into a failed acquisition with the lock
//! byte restored.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

const WRITER: u8 = 0x80;
const READER_MASK: u8 = 0x7F;

/// Maximum concurrent readers per row.
pub(crate) const MAX_READERS: u8 = 127;

/// Spin-then-yield waiter shared by both acquisition paths.
struct Backoff {
    step: u32,
}

impl Backoff {
    #[inline]
    fn new() -> Self {
        Backoff { step: 0 }
    }

    #[inline]
    fn wait(&mut self) {
        if self.step < 6 {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

#[inline]
fn expired(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(d) if Instant::now() >= d)
}

/// One byte-encoded reader/writer lock.
pub(crate) struct RowLock {
    state: AtomicU8,
}

impl RowLock {
    #[inline]
    pub(crate) const fn new() -> Self {
        RowLock {
            state: AtomicU8::new(0),
        }
    }

    /// Single admission attempt for a reader.
    #[inline]
    fn try_read(&self) -> bool {
        let mut cur = self.state.load(Ordering::Relaxed);
        loop {
            if cur & WRITER != 0 || (cur & READER_MASK) == MAX_READERS {
                return false;
            }
            match self.state.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Single attempt to claim the writer flag.
    #[inline]
    fn try_claim_writer(&self) -> bool {
        let mut cur = self.state.load(Ordering::Relaxed);
        loop {
            if cur & WRITER != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                cur,
                cur | WRITER,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Acquire shared access. Returns `false` only if `deadline` passed
    /// before admission.
    pub(crate) fn acquire_read(&self, deadline: Option<Instant>) -> bool {
        let mut backoff = Backoff::new();
        loop {
            if self.try_read() {
                return true;
            }
            if expired(deadline) {
                return false;
            }
            backoff.wait();
        }
    }

    #[inline]
    pub(crate) fn release_read(&self) {
        let prev = self.state.fetch_sub(1, Ordering::Release);
        debug_assert!(prev & READER_MASK > 0, "release_read with no readers");
    }

    /// Acquire exclusive access: claim the writer flag, then drain readers.
    /// Returns `false` (with the flag released) if `deadline` passes first.
    pub(crate) fn acquire_write(&self, deadline: Option<Instant>) -> bool {
        let mut backoff = Backoff::new();
        while !self.try_claim_writer() {
            if expired(deadline) {
                return false;
            }
            backoff.wait();
        }

        // Flag is ours; no new reader can enter. Wait out the current ones.
        let mut backoff = Backoff::new();
        while self.state.load(Ordering::Acquire) != WRITER {
            if expired(deadline) {
                self.state.fetch_and(!WRITER, Ordering::Release);
                return false;
            }
            backoff.wait();
        }
        true
    }

    #[inline]
    pub(crate) fn release_write(&self) {
        let prev = self.state.swap(0, Ordering::Release);
        debug_assert_eq!(prev, WRITER, "release_write without exclusive access");
    }

    /// `true` when no reader or writer holds the lock.
    #[inline]
    pub(crate) fn is_idle(&self) -> bool {
        self.state.load(Ordering::Relaxed) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn readers_share_up_to_cap() {
        let lock = RowLock::new();
        for _ in 0..MAX_READERS {
            assert!(lock.try_read());
        }
        // Reader 128 is refused until someone leaves.
        assert!(!lock.try_read());
        lock.release_read();
        assert!(lock.try_read());
        for _ in 0..MAX_READERS {
            lock.release_read();
        }
        assert!(lock.is_idle());
    }

    #[test]
    fn writer_flag_blocks_new_readers() {
        let lock = RowLock::new();
        assert!(lock.try_read());
        assert!(lock.try_claim_writer());
        // Reader present, writer flag set: neither a new reader nor a second
        // writer may enter.
        assert!(!lock.try_read());
        assert!(!lock.try_claim_writer());
        lock.release_read();
        // Drained; the pending writer would now proceed.
        assert_eq!(lock.state.load(Ordering::Relaxed), WRITER);
        lock.release_write();
        assert!(lock.is_idle());
    }

    #[test]
    fn write_acquire_times_out_and_restores_state() {
        let lock = RowLock::new();
        assert!(lock.try_read());
        let deadline = Some(Instant::now() + Duration::from_millis(5));
        assert!(!lock.acquire_write(deadline));
        // The failed writer must not leave its flag behind.
        lock.release_read();
        assert!(lock.is_idle());
    }

    #[test]
    fn read_acquire_times_out_under_writer() {
        let lock = RowLock::new();
        assert!(lock.acquire_write(None));
        let deadline = Some(Instant::now() + Duration::from_millis(5));
        assert!(!lock.acquire_read(deadline));
        lock.release_write();
        assert!(lock.acquire_read(None));
        lock.release_read();
    }

    /// A writer must never be active at the same time as any reader or
    /// another writer on the same lock.
    #[test]
    fn writer_is_never_concurrent_with_readers() {
        let lock = Arc::new(RowLock::new());
        let active_readers = Arc::new(AtomicU32::new(0));
        let active_writers = Arc::new(AtomicU32::new(0));
        let violations = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..4 {
                let lock = Arc::clone(&lock);
                let readers = Arc::clone(&active_readers);
                let writers = Arc::clone(&active_writers);
                let violations = Arc::clone(&violations);
                s.spawn(move || {
                    for _ in 0..2_000 {
                        assert!(lock.acquire_read(None));
                        readers.fetch_add(1, Ordering::SeqCst);
                        if writers.load(Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        readers.fetch_sub(1, Ordering::SeqCst);
                        lock.release_read();
                    }
                });
            }
            for _ in 0..2 {
                let lock = Arc::clone(&lock);
                let readers = Arc::clone(&active_readers);
                let writers = Arc::clone(&active_writers);
                let violations = Arc::clone(&violations);
                s.spawn(move || {
                    for _ in 0..500 {
                        assert!(lock.acquire_write(None));
                        let w = writers.fetch_add(1, Ordering::SeqCst);
                        if w != 0 || readers.load(Ordering::SeqCst) != 0 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        writers.fetch_sub(1, Ordering::SeqCst);
                        lock.release_write();
                    }
                });
            }
        });

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert!(lock.is_idle());
    }
}
