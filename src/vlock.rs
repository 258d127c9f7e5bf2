//! Versioned spinlock word.
//!
//! One `AtomicU64` per shared word: bit 0 is the locked flag, bits 1..64
//! hold the version number. Writers take the lock only inside commit;
//! readers never take it at all, they sample the stamp before and after
//! copying the payload and abort on any movement.

use core::sync::atomic::{AtomicU64, Ordering};

const LOCK_BIT: u64 = 1;

/// Largest representable version number (63 bits).
pub(crate) const VERSION_MAX: u64 = u64::MAX >> 1;

/// Decoded snapshot of a lock word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stamp {
    pub(crate) locked: bool,
    pub(crate) version: u64,
}

/// The version lock attached to every word of shared memory.
pub(crate) struct VLock {
    stamp: AtomicU64,
}

impl VLock {
    pub(crate) const fn new() -> Self {
        Self {
            stamp: AtomicU64::new(0),
        }
    }

    /// Decode the current stamp in one atomic load.
    #[inline]
    pub(crate) fn sample(&self) -> Stamp {
        let raw = self.stamp.load(Ordering::Acquire);
        Stamp {
            locked: raw & LOCK_BIT == LOCK_BIT,
            version: raw >> 1,
        }
    }

    /// Attempt to take the lock, keeping the version unchanged.
    ///
    /// A plain load-check-store would race with concurrent lockers; the CAS
    /// lets exactly one of them win. Contention is not retried here, since
    /// TL2 aborts on a held lock instead of spinning.
    #[inline]
    pub(crate) fn try_lock(&self) -> bool {
        let raw = self.stamp.load(Ordering::Relaxed);
        if raw & LOCK_BIT == LOCK_BIT {
            return false;
        }
        self.stamp
            .compare_exchange(raw, raw | LOCK_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Drop the lock without touching the version. Only used to roll back
    /// a partially acquired write set.
    #[inline]
    pub(crate) fn unlock(&self) {
        let prev = self.stamp.fetch_and(!LOCK_BIT, Ordering::Release);
        debug_assert!(prev & LOCK_BIT == LOCK_BIT, "unlock of an unheld lock");
    }

    /// Unlock and stamp a new version in one store.
    ///
    /// Precondition: the caller holds the lock, so no other writer can
    /// touch the stamp; a violation here is a protocol bug, not a race.
    #[inline]
    pub(crate) fn release_with(&self, version: u64) {
        debug_assert!(version <= VERSION_MAX, "version number overflow");
        debug_assert!(
            self.stamp.load(Ordering::Relaxed) & LOCK_BIT == LOCK_BIT,
            "release of an unheld lock"
        );
        self.stamp.store(version << 1, Ordering::Release);
    }
}
