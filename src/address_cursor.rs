//! Bump reservation of slabs from a fixed virtual window.
//!
//! The cursor is shared by every cache cell on every processor, so it has
//! its own lock independent of the per-cell locks.

use core::sync::atomic::{AtomicUsize, Ordering};

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{debug, warn};

use crate::{AllocError, AllocResult};

/// Monotonic reservation pointer over `[start, end)`.
///
/// Each successful [`reserve`](Self::reserve) hands out exactly
/// `SLAB_SIZE` bytes. Reserved regions are never given back.
pub struct AddressCursor<const SLAB_SIZE: usize = { crate::DEFAULT_SLAB_SIZE }> {
    start: AtomicUsize,
    end: AtomicUsize,
    next: SpinNoIrq<usize>,
}

impl<const SLAB_SIZE: usize> AddressCursor<SLAB_SIZE> {
    /// Creates a cursor over an empty window; every reservation fails
    /// until [`init`](Self::init) is called.
    pub const fn new() -> Self {
        Self {
            start: AtomicUsize::new(0),
            end: AtomicUsize::new(0),
            next: SpinNoIrq::new(0),
        }
    }

    /// Sets the window to `[start, start + size)`. The window can only be
    /// set once; the cursor never moves backwards.
    ///
    /// `size` must be a non-zero multiple of `SLAB_SIZE`, and `SLAB_SIZE`
    /// and `start` must be `usize`-aligned so every slab base is too.
    pub fn init(&self, start: usize, size: usize) -> AllocResult {
        let word = core::mem::align_of::<usize>();
        if SLAB_SIZE == 0 || !crate::is_aligned(SLAB_SIZE, word) {
            return Err(AllocError::InvalidParam);
        }
        if size == 0 || size % SLAB_SIZE != 0 || !crate::is_aligned(start, word) {
            return Err(AllocError::InvalidParam);
        }
        let end = start.checked_add(size).ok_or(AllocError::InvalidParam)?;

        let mut next = self.next.lock();
        if self.end.load(Ordering::Acquire) != 0 {
            warn!("address cursor: window already set, refusing to rewind");
            return Err(AllocError::InvalidParam);
        }
        self.start.store(start, Ordering::Release);
        self.end.store(end, Ordering::Release);
        *next = start;
        Ok(())
    }

    /// Reserves the next slab-sized region and returns its base address.
    pub fn reserve(&self) -> AllocResult<usize> {
        let mut next = self.next.lock();
        let end = self.end.load(Ordering::Acquire);
        let base = *next;
        match base.checked_add(SLAB_SIZE) {
            Some(limit) if limit <= end => {
                *next = limit;
                debug!(
                    "address cursor: reserved slab {:#x}, {} left",
                    base,
                    (end - limit) / SLAB_SIZE
                );
                Ok(base)
            }
            _ => {
                warn!(
                    "address cursor: window [{:#x}, {:#x}) exhausted",
                    self.start.load(Ordering::Relaxed),
                    end
                );
                Err(AllocError::AddressExhausted)
            }
        }
    }

    /// Whether `addr` lies inside the window. Does not take the cursor lock.
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start.load(Ordering::Acquire) && addr < self.end.load(Ordering::Acquire)
    }

    /// First address of the window.
    pub fn start(&self) -> usize {
        self.start.load(Ordering::Acquire)
    }

    /// End of the window, exclusive.
    pub fn end(&self) -> usize {
        self.end.load(Ordering::Acquire)
    }

    /// Number of slabs handed out so far.
    pub fn reserved(&self) -> usize {
        let next = self.next.lock();
        (*next - self.start.load(Ordering::Acquire)) / SLAB_SIZE
    }

    /// Number of slabs still available.
    pub fn remaining(&self) -> usize {
        let next = self.next.lock();
        (self.end.load(Ordering::Acquire) - *next) / SLAB_SIZE
    }
}

impl<const SLAB_SIZE: usize> Default for AddressCursor<SLAB_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
