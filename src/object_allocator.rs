//! Allocator facade.
//!
//! Routes `allocate(size)` to the current processor's cell for that size
//! class and `release(ptr)` to the cell named by the object's header (or the
//! releasing processor's cell, see [`ReleasePolicy`]).

use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "log")]
use log::{error, info};

use crate::cache_bank::CacheBank;
use crate::slab::{ObjectHeader, SizeClass, SlabNode, SlotState};
use crate::{AddressCursor, AllocError, AllocResult, CpuIdProvider, ReleasePolicy};

/// Per-CPU fixed-size object allocator over one virtual window.
///
/// `P` names the current processor, `MAX_CPUS` sizes the cache bank and
/// `SLAB_SIZE` is the unit reserved from the window.
pub struct ObjectAllocator<
    P: CpuIdProvider,
    const MAX_CPUS: usize = { crate::DEFAULT_MAX_CPUS },
    const SLAB_SIZE: usize = { crate::DEFAULT_SLAB_SIZE },
> {
    cursor: AddressCursor<SLAB_SIZE>,
    bank: CacheBank<MAX_CPUS>,
    policy: ReleasePolicy,
    init_claimed: AtomicBool,
    initialized: AtomicBool,
    _cpu: PhantomData<fn() -> P>,
}

impl<P: CpuIdProvider, const MAX_CPUS: usize, const SLAB_SIZE: usize>
    ObjectAllocator<P, MAX_CPUS, SLAB_SIZE>
{
    pub const fn new() -> Self {
        Self::with_release_policy(ReleasePolicy::OwningCell)
    }

    pub const fn with_release_policy(policy: ReleasePolicy) -> Self {
        Self {
            cursor: AddressCursor::new(),
            bank: CacheBank::new(),
            policy,
            init_claimed: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            _cpu: PhantomData,
        }
    }

    /// Initialize the allocator with the window `[start_vaddr, start_vaddr + size)`.
    ///
    /// The window must be mapped, writable and used by nothing else for
    /// the lifetime of the allocator. It can only be set once.
    pub fn init(&self, start_vaddr: usize, size: usize) -> AllocResult {
        if SlabNode::capacity_for(SizeClass::MAX, SLAB_SIZE) == 0 {
            return Err(AllocError::InvalidParam);
        }
        if self
            .init_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            error!("object allocator: already initialized");
            return Err(AllocError::InvalidParam);
        }

        // Cells are still empty if the window turns out to be invalid, so
        // the claim can be dropped and init retried.
        if let Err(e) = self.bank.init().and_then(|_| self.cursor.init(start_vaddr, size)) {
            self.init_claimed.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            "object allocator: window [{:#x}, {:#x}), {} slabs, {} cpus",
            start_vaddr,
            start_vaddr + size,
            size / SLAB_SIZE,
            MAX_CPUS
        );
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn release_policy(&self) -> ReleasePolicy {
        self.policy
    }

    /// Allocate a `size`-byte object on the current processor.
    ///
    /// Sizes outside `[1, 32]` are rejected before any lock is taken.
    pub fn try_allocate(&self, size: usize) -> AllocResult<NonNull<u8>> {
        let size_class = SizeClass::from_size(size).ok_or(AllocError::InvalidSizeClass)?;
        if !self.is_initialized() {
            error!("object allocator: Allocator not initialized");
            return Err(AllocError::NotInitialized);
        }
        self.bank.alloc(P::current_cpu(), size_class, &self.cursor)
    }

    /// Allocate a `size`-byte object, or null on an invalid size or an
    /// exhausted window.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        match self.try_allocate(size) {
            Ok(obj) => obj.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    /// Return an object to its cache cell. Null is a no-op.
    ///
    /// Pointers that fail header validation are rejected with
    /// [`AllocError::InvalidPointer`] without touching any free-list.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by this allocator that has
    /// not been released since. Validation catches common mistakes such as
    /// double release, but a forged header inside the window is not detected.
    pub unsafe fn try_release(&self, ptr: *mut u8) -> AllocResult {
        let Some(obj) = NonNull::new(ptr) else {
            return Ok(());
        };
        if !self.is_initialized() {
            error!("object allocator: Releasing memory before initializing");
            return Err(AllocError::NotInitialized);
        }

        let header = match self.live_header(obj) {
            Ok(header) => header,
            Err(e) => {
                error!("object allocator: rejected release of {:#x}", obj.as_ptr() as usize);
                return Err(e);
            }
        };
        let size_class = header.size_class().ok_or(AllocError::InvalidPointer)?;
        let cpu = match self.policy {
            ReleasePolicy::OwningCell => header.cpu(),
            ReleasePolicy::CurrentCpu => P::current_cpu(),
        };

        let result = unsafe { self.bank.release(cpu, size_class, obj) };
        if result.is_err() {
            error!(
                "object allocator: release of {:#x} to cpu {} size {} failed: {:?}",
                obj.as_ptr() as usize,
                cpu,
                size_class.size(),
                result
            );
        }
        result
    }

    /// Return an object to its cache cell, ignoring rejected pointers.
    ///
    /// # Safety
    ///
    /// See [`try_release`](Self::try_release).
    pub unsafe fn release(&self, ptr: *mut u8) {
        let _ = unsafe { self.try_release(ptr) };
    }

    /// Size class recorded in the header of a live object.
    pub fn size_class_of(&self, obj: NonNull<u8>) -> AllocResult<SizeClass> {
        if !self.is_initialized() {
            return Err(AllocError::NotInitialized);
        }
        self.live_header(obj)?
            .size_class()
            .ok_or(AllocError::InvalidPointer)
    }

    /// Reads and checks the header of `obj` without taking any cell lock.
    ///
    /// The routing fields of a live object's header are stable until it is
    /// released, so only the caller can race with this read.
    fn live_header(&self, obj: NonNull<u8>) -> AllocResult<ObjectHeader> {
        let addr = obj.as_ptr() as usize;
        let in_window = addr
            .checked_sub(ObjectHeader::SIZE)
            .is_some_and(|header| self.cursor.contains(header));
        if !in_window || !crate::is_aligned(addr, core::mem::align_of::<usize>()) {
            return Err(AllocError::InvalidPointer);
        }

        // SAFETY: the header lies inside the window, which stays mapped
        // for the allocator's lifetime, and is aligned.
        let header = unsafe { ObjectHeader::read(obj) };
        if !header.is_valid() || header.state() != Some(SlotState::Allocated) {
            return Err(AllocError::InvalidPointer);
        }
        if header.cpu() >= MAX_CPUS {
            return Err(AllocError::InvalidPointer);
        }
        Ok(header)
    }

    pub const fn cpu_count(&self) -> usize {
        MAX_CPUS
    }

    /// Slabs reserved from the window so far.
    pub fn reserved_slabs(&self) -> usize {
        self.cursor.reserved()
    }

    /// Slabs still available in the window.
    pub fn remaining_slabs(&self) -> usize {
        self.cursor.remaining()
    }

    /// Slabs owned by the cell at (`cpu`, `size`).
    pub fn slab_count(&self, cpu: usize, size: usize) -> AllocResult<usize> {
        let size_class = SizeClass::from_size(size).ok_or(AllocError::InvalidSizeClass)?;
        self.bank.slab_count(cpu, size_class)
    }

    /// Free-list length of the cell at (`cpu`, `size`).
    pub fn free_count(&self, cpu: usize, size: usize) -> AllocResult<usize> {
        let size_class = SizeClass::from_size(size).ok_or(AllocError::InvalidSizeClass)?;
        self.bank.free_count(cpu, size_class)
    }
}

impl<P: CpuIdProvider, const MAX_CPUS: usize, const SLAB_SIZE: usize> Default
    for ObjectAllocator<P, MAX_CPUS, SLAB_SIZE>
{
    fn default() -> Self {
        Self::new()
    }
}
