//! Hash-indexed interning store with stable, compact integer handles.
//!
//! An interner for datasets full of repeated textual or structured values:
//! [`add`](WideStore::add) stores a value once and returns an integer handle;
//! [`get`](WideStore::get) resolves the handle back to the value in
//! near-constant time. Handles stay valid for the lifetime of the store:
//! the row table grows both horizontally (per-row capacity) and vertically
//! (doubling the row count) without ever moving a value to a different
//! handle.
//!
//! Two variants share the design:
//!
//! * [`WideStore`]: 64-bit [`WideHandle`]s, hash bit width 8..=31.
//! * [`ShortStore`]: 32-bit [`ShortHandle`]s, hash bit width 9..=24, with a
//!   4-way alternate-row overflow scheme once the width is maxed out.
//!
//! Both are safe to share across threads: readers of distinct rows proceed
//! in parallel, a row admits up to 127 concurrent readers, and whole-store
//! growth is serialized behind a storage-level gate.
//!
//! ```
//! use handex::WideStore;
//!
//! let store: WideStore<String> = WideStore::new(8);
//! let h = store.add(&"hello".to_string())?;
//! assert_eq!(store.get(h)?, Some("hello".to_string()));
//! assert_eq!(store.add(&"hello".to_string())?, h);
//! assert_eq!(store.len(), 1);
//! # Ok::<(), handex::StoreError>(())
//! ```

mod error;
mod fingerprint;
mod gate;
mod handle;
mod row;
mod rowlock;
mod scan;
mod short;
mod state;
mod value;
mod wide;

// ─────────────────────────────────────────────────────────────────────────────
// Public surface
// ─────────────────────────────────────────────────────────────────────────────

/// Errors returned by store operations.
pub use error::{EncodingError, StoreError};
/// The `(H32, S8)` fingerprint type; exposed so payloads can override
/// placement (see [`Intern::fingerprint`]).
pub use fingerprint::Fingerprint;
/// Handle types with their wire-stable layouts.
pub use handle::{ShortHandle, WideHandle};
/// The stores.
pub use short::ShortStore;
pub use wide::WideStore;
/// Observability snapshot returned by `stats()`.
pub use state::StoreStats;
/// The payload trait: canonical bytes plus an overridable fingerprint.
pub use value::Intern;
