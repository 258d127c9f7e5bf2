//! Word-granular software transactional memory.
//!
//! `mica` implements the TL2 (Transactional Locking II) protocol over a
//! shared, word-addressable memory region. Concurrent threads mutate the
//! region through transactions that either commit atomically or abort with
//! no visible effect. Every transaction, including ones that later abort,
//! observes a consistent snapshot (opacity).
//!
//! # Architecture
//!
//! - **Reads**: optimistic. No locks are taken; each word copy is
//!   bracketed by two samples of the word's versioned lock and aborts on
//!   any movement.
//! - **Writes**: buffered in private shadow copies. Shared memory is only
//!   touched during commit.
//! - **Commit**: lock the write set, advance the global version clock,
//!   validate the read set, write back, release with the new version.
//! - **Progress**: transactions never block on a lock; they abort, and
//!   the [`Region::atomically`] helper retries with backoff.
//!
//! # Example
//!
//! ```
//! use mica::Region;
//!
//! let region = Region::new(16, 8)?;
//! let counter = region.start();
//!
//! region.atomically(|tx| {
//!     let mut buf = [0u8; 8];
//!     tx.read(counter, &mut buf)?;
//!     let value = u64::from_le_bytes(buf) + 1;
//!     tx.write(&value.to_le_bytes(), counter)
//! })?;
//!
//! let value = region.snapshot(|tx| {
//!     let mut buf = [0u8; 8];
//!     tx.read(counter, &mut buf)?;
//!     Ok(u64::from_le_bytes(buf))
//! })?;
//! assert_eq!(value, 1);
//! # Ok::<(), mica::TxError>(())
//! ```

#![warn(missing_docs)]

mod clock;
mod errors;
mod region;
mod segment;
mod transaction;
mod vlock;

pub use errors::TxError;
pub use region::{Addr, Region};
pub use transaction::Transaction;
