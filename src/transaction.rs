//! Transactions: speculative reads and writes over a region, finished by
//! the TL2 commit pipeline.
//!
//! A transaction snapshots the global clock at begin. Reads are optimistic:
//! sample the word's lock, copy the payload into the caller's buffer,
//! sample again, and abort on any movement. Writes stage private shadow
//! buffers and touch no shared memory until commit. Commit locks the write
//! set, claims a write version from the clock, validates the read set, and
//! only then publishes the shadow buffers under the new version.
//!
//! Aborts are silent and transaction-scoped; rollback is by construction,
//! since nothing shared was written before commit's final phase.

use crate::errors::TxError;
use crate::region::{Addr, Region};
use foldhash::fast::FixedState;
use log::trace;
use std::collections::{BTreeMap, HashSet};

/// A speculative sequence of reads and writes that commits atomically or
/// aborts with no visible effect.
///
/// Created by [`Region::begin`] and consumed by [`Transaction::commit`].
/// Any operation returning [`TxError::Abort`] invalidates the transaction;
/// further operations keep returning `Abort`, and so does `commit`.
pub struct Transaction<'a> {
    region: &'a Region,
    read_version: u64,
    read_only: bool,
    aborted: bool,
    read_set: HashSet<Addr, FixedState>,
    // Ordered map: lock acquisition and prefix rollback must walk the
    // write set in the same fixed order.
    write_set: BTreeMap<Addr, Box<[u8]>>,
    /// Segment frees deferred to commit.
    freed: Vec<Addr>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(region: &'a Region, read_only: bool) -> Self {
        Self {
            region,
            read_version: region.clock().sample(),
            read_only,
            aborted: false,
            read_set: HashSet::with_hasher(FixedState::default()),
            write_set: BTreeMap::new(),
            freed: Vec::new(),
        }
    }

    /// Whether this transaction was started read-only.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Read `dst.len()` bytes of shared memory starting at `src` into the
    /// private buffer `dst`.
    ///
    /// `dst.len()` must be a multiple of the region alignment and `src`
    /// aligned to it. Read-write transactions serve their own writes
    /// first; otherwise each word is copied under a sample/re-sample
    /// bracket and the transaction aborts on any concurrent movement.
    pub fn read(&mut self, src: Addr, dst: &mut [u8]) -> Result<(), TxError> {
        if self.aborted {
            return Err(TxError::Abort);
        }
        let word_size = self.region.align();
        debug_assert!(
            dst.len() % word_size == 0,
            "read size must be a multiple of the region alignment"
        );

        let mut off = 0;
        while off < dst.len() {
            let addr = src + off;
            let out = &mut dst[off..off + word_size];
            off += word_size;

            if !self.read_only {
                // Read-your-own-writes: serve from the shadow buffer.
                if let Some(shadow) = self.write_set.get(&addr) {
                    out.copy_from_slice(shadow);
                    continue;
                }
            }

            let word = self.region.word(addr);
            let before = word.lock().sample();
            if before.locked || before.version > self.read_version {
                // Locked: someone is committing this word right now.
                // Newer version: the value belongs to a later snapshot.
                return Err(self.abort());
            }

            word.load_into(out);

            let after = word.lock().sample();
            if after.locked || after.version != before.version {
                // The copy may have been torn by a committer that locked
                // and unlocked between the two samples.
                return Err(self.abort());
            }

            if !self.read_only {
                self.read_set.insert(addr);
            }
        }
        Ok(())
    }

    /// Stage `src` to be written to shared memory at `dst` on commit.
    ///
    /// `src.len()` must be a multiple of the region alignment and `dst`
    /// aligned to it. No shared memory is touched; a later write to the
    /// same address replaces the staged buffer. In a read-only transaction
    /// staged writes never reach commit's publish phase and are discarded.
    pub fn write(&mut self, src: &[u8], dst: Addr) -> Result<(), TxError> {
        if self.aborted {
            return Err(TxError::Abort);
        }
        let word_size = self.region.align();
        debug_assert!(
            src.len() % word_size == 0,
            "write size must be a multiple of the region alignment"
        );

        let mut off = 0;
        while off < src.len() {
            let shadow: Box<[u8]> = src[off..off + word_size].into();
            // An overwritten entry drops its previous shadow buffer here.
            self.write_set.insert(dst + off, shadow);
            off += word_size;
        }
        Ok(())
    }

    /// Allocate a fresh segment of `size` bytes, zero-initialized, and
    /// return its base address.
    ///
    /// Takes effect immediately; an abort of this transaction does not
    /// undo the allocation.
    pub fn alloc(&mut self, size: usize) -> Result<Addr, TxError> {
        if self.aborted {
            return Err(TxError::Abort);
        }
        self.region.alloc_segment(size)
    }

    /// Mark the segment based at `addr` for retirement when this
    /// transaction commits. Freeing the first segment, a non-base address,
    /// or an already-freed segment aborts.
    pub fn free(&mut self, addr: Addr) -> Result<(), TxError> {
        if self.aborted {
            return Err(TxError::Abort);
        }
        if !self.region.freeable(addr) || self.freed.contains(&addr) {
            return Err(self.abort());
        }
        self.freed.push(addr);
        Ok(())
    }

    /// Attempt to commit. `Ok` means every staged write is visible to all
    /// threads at once; `Err(Abort)` means nothing is.
    pub fn commit(self) -> Result<(), TxError> {
        if self.aborted {
            return Err(TxError::Abort);
        }

        // Trivial commit: nothing to publish, no clock or lock traffic.
        if self.read_only || self.write_set.is_empty() {
            self.region.retire(&self.freed);
            return Ok(());
        }

        // Phase 1: lock the write set, in its fixed iteration order.
        let mut acquired = 0;
        for addr in self.write_set.keys() {
            if !self.region.word(*addr).lock().try_lock() {
                trace!("commit abort: {addr:?} held by another writer");
                self.release_acquired(acquired);
                return Err(TxError::Abort);
            }
            acquired += 1;
        }

        // Phase 2: claim a write version. From here on, any reader that
        // post-samples one of our words sees it locked and aborts.
        let write_version = self.region.clock().advance();

        // Phase 3: validate the read set. If no other writer committed
        // between our begin and our clock advance, the snapshot is still
        // intact and validation can be skipped outright.
        if self.read_version + 1 != write_version {
            for addr in &self.read_set {
                if self.write_set.contains_key(addr) {
                    // Locked by us in phase 1; still our snapshot's value.
                    continue;
                }
                let stamp = self.region.word(*addr).lock().sample();
                if stamp.locked || stamp.version > self.read_version {
                    trace!("commit abort: stale read of {addr:?}");
                    self.release_acquired(self.write_set.len());
                    return Err(TxError::Abort);
                }
            }
        }

        // Phase 4: publish. Write back each shadow buffer, then unlock
        // with the new version; write-back last keeps aborts invisible.
        for (addr, shadow) in &self.write_set {
            let word = self.region.word(*addr);
            word.store_from(shadow);
            word.lock().release_with(write_version);
        }

        self.region.retire(&self.freed);
        Ok(())
    }

    /// Roll back and invalidate the transaction. Shadow buffers and the
    /// read set are dropped; nothing shared was touched.
    fn abort(&mut self) -> TxError {
        self.aborted = true;
        self.read_set.clear();
        self.write_set.clear();
        self.freed.clear();
        TxError::Abort
    }

    /// Unlock the first `count` write-set entries, in acquisition order.
    fn release_acquired(&self, count: usize) {
        for addr in self.write_set.keys().take(count) {
            self.region.word(*addr).lock().unlock();
        }
    }
}
