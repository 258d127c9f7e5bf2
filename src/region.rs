//! Shared memory region: segment table, virtual addressing, and the
//! transaction entry points.
//!
//! Addresses are opaque 64-bit values: bits 48..64 hold the segment slot
//! plus one, bits 0..48 the byte offset inside the segment. The first
//! segment therefore starts at `1 << 48` and `word()` is two indexed
//! loads. Slots are write-once; a freed segment is retired, never reused,
//! and its memory lives until the region drops, so any address a live
//! transaction still holds keeps pointing at stable storage.

use crate::clock::GlobalClock;
use crate::errors::TxError;
use crate::segment::{Segment, WordRef};
use crate::transaction::Transaction;
use core::ops::Add;
use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_utils::Backoff;
use foldhash::fast::FixedState;
use log::{debug, trace};
use once_cell::race::OnceBox;
use std::collections::HashSet;
use std::sync::Mutex;

const SLOT_BITS: u32 = 48;
const OFFSET_MASK: u64 = (1 << SLOT_BITS) - 1;

/// Capacity of the segment slot table. Allocating past this is reported as
/// out-of-memory.
const MAX_SEGMENTS: usize = 1 << 12;

/// Opaque virtual address of a word in a region.
///
/// Obtained from [`Region::start`] or [`Transaction::alloc`]; advance it by
/// byte offsets with `+`. Addresses are only meaningful for the region that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(u64);

impl Addr {
    fn from_slot(slot: usize) -> Addr {
        Addr(((slot as u64) + 1) << SLOT_BITS)
    }

    /// Segment-table index encoded in the address, or `None` for an
    /// address below the first segment base.
    #[inline]
    fn slot(self) -> Option<usize> {
        ((self.0 >> SLOT_BITS) as usize).checked_sub(1)
    }

    #[inline]
    fn byte(self) -> usize {
        (self.0 & OFFSET_MASK) as usize
    }
}

impl Add<usize> for Addr {
    type Output = Addr;

    #[inline]
    fn add(self, bytes: usize) -> Addr {
        Addr(self.0 + bytes as u64)
    }
}

/// A word-addressable transactional memory region.
///
/// The region owns the global version clock and every segment of shared
/// words. Threads share it by reference (or `Arc`) and mutate it only
/// through [`Transaction`]s.
pub struct Region {
    size: usize,
    align: usize,
    clock: GlobalClock,
    slots: Box<[OnceBox<Segment>]>,
    next_slot: AtomicUsize,
    /// Slots retired by committed frees. Batched; reclaimed on drop.
    retired: Mutex<HashSet<usize, FixedState>>,
}

impl Region {
    /// Create a region with one first segment of `size` bytes, addressed
    /// in words of `align` bytes.
    ///
    /// `align` must be a power of two and `size` a positive multiple of it.
    pub fn new(size: usize, align: usize) -> Result<Region, TxError> {
        if size == 0 || !align.is_power_of_two() || size % align != 0 {
            return Err(TxError::InvalidLayout);
        }

        let slots: Box<[OnceBox<Segment>]> = std::iter::repeat_with(OnceBox::new)
            .take(MAX_SEGMENTS)
            .collect();
        let first = Segment::new(size, align).ok_or(TxError::OutOfMemory)?;
        if slots[0].set(Box::new(first)).is_err() {
            unreachable!("fresh slot table already initialized");
        }

        debug!("created region: size={size} align={align}");
        Ok(Region {
            size,
            align,
            clock: GlobalClock::new(),
            slots,
            next_slot: AtomicUsize::new(1),
            retired: Mutex::new(HashSet::with_hasher(FixedState::default())),
        })
    }

    /// Address of the first word of the first segment.
    #[inline]
    pub fn start(&self) -> Addr {
        Addr::from_slot(0)
    }

    /// Size of the first segment in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Word size of the region in bytes.
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// Start a transaction. Read-only transactions skip read-set tracking
    /// and commit without any lock or clock traffic.
    pub fn begin(&self, read_only: bool) -> Transaction<'_> {
        Transaction::begin(self, read_only)
    }

    /// Run `f` inside a read-write transaction, committing its writes
    /// atomically. Conflicts retry transparently with backoff; any other
    /// error propagates.
    ///
    /// Do not perform side effects inside `f`: it may run several times.
    pub fn atomically<T, F>(&self, mut f: F) -> Result<T, TxError>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, TxError>,
    {
        self.run(false, &mut f)
    }

    /// Run `f` inside a read-only transaction against a consistent
    /// snapshot of the region. Conflicts retry transparently.
    pub fn snapshot<T, F>(&self, mut f: F) -> Result<T, TxError>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, TxError>,
    {
        self.run(true, &mut f)
    }

    fn run<T>(
        &self,
        read_only: bool,
        f: &mut dyn FnMut(&mut Transaction<'_>) -> Result<T, TxError>,
    ) -> Result<T, TxError> {
        let backoff = Backoff::new();
        loop {
            let mut tx = self.begin(read_only);
            match f(&mut tx) {
                Ok(value) => match tx.commit() {
                    Ok(()) => return Ok(value),
                    Err(TxError::Abort) => {}
                    Err(e) => return Err(e),
                },
                Err(TxError::Abort) => {}
                Err(e) => return Err(e),
            }
            backoff.snooze();
        }
    }

    #[inline]
    pub(crate) fn clock(&self) -> &GlobalClock {
        &self.clock
    }

    /// O(1) lookup of the word behind a virtual address. An address outside
    /// any live segment is a caller bug and asserts.
    #[inline]
    pub(crate) fn word(&self, addr: Addr) -> WordRef<'_> {
        let seg = addr
            .slot()
            .and_then(|slot| self.slots.get(slot))
            .and_then(|slot| slot.get())
            .unwrap_or_else(|| panic!("{addr:?} is outside any live segment"));
        seg.word_at(addr.byte())
    }

    /// Allocate a fresh segment of `size` bytes and return its base
    /// address. Visible immediately: an abort of the calling transaction
    /// does not undo it.
    pub(crate) fn alloc_segment(&self, size: usize) -> Result<Addr, TxError> {
        if size == 0 || size % self.align != 0 {
            return Err(TxError::InvalidLayout);
        }
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        if slot >= MAX_SEGMENTS {
            return Err(TxError::OutOfMemory);
        }
        let seg = Segment::new(size, self.align).ok_or(TxError::OutOfMemory)?;
        if self.slots[slot].set(Box::new(seg)).is_err() {
            unreachable!("segment slot {slot} claimed twice");
        }
        trace!("allocated segment {slot}: {size} bytes");
        Ok(Addr::from_slot(slot))
    }

    /// Whether `addr` names a segment a transaction may free: a segment
    /// base other than the first segment, live, and not already retired.
    pub(crate) fn freeable(&self, addr: Addr) -> bool {
        let slot = match addr.slot() {
            Some(slot) if slot > 0 && addr.byte() == 0 => slot,
            _ => return false,
        };
        if self.slots.get(slot).and_then(|s| s.get()).is_none() {
            return false;
        }
        !self.retired.lock().expect("retired set poisoned").contains(&slot)
    }

    /// Retire the given segment bases, called once per committed
    /// transaction with frees. The memory itself is reclaimed with the
    /// region.
    pub(crate) fn retire(&self, addrs: &[Addr]) {
        if addrs.is_empty() {
            return;
        }
        let mut retired = self.retired.lock().expect("retired set poisoned");
        for addr in addrs {
            let slot = addr.slot().expect("retiring a non-segment address");
            if retired.insert(slot) {
                trace!("retired segment {slot}");
            }
        }
    }
}
