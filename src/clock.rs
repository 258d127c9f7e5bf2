//! Global version clock.

use core::sync::atomic::{AtomicU64, Ordering};

/// Monotone counter that totally orders committing writers.
///
/// Read-write transactions snapshot it at begin and bump it once per
/// non-trivial commit; the bumped value becomes the write version stamped
/// on every committed word. Both operations are sequentially consistent so
/// that a snapshot taken anywhere else can never miss an increment whose
/// effects it has already observed.
pub(crate) struct GlobalClock {
    now: AtomicU64,
}

impl GlobalClock {
    pub(crate) const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Current logical time.
    #[inline]
    pub(crate) fn sample(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    /// Advance by one tick and return the **new** value.
    #[inline]
    pub(crate) fn advance(&self) -> u64 {
        self.now.fetch_add(1, Ordering::SeqCst) + 1
    }
}
