//! The (processor, size class) table of cache cells.
//!
//! Every cell has its own lock, so different processors and different size
//! classes never contend with each other. The only state shared between
//! cells is the [`AddressCursor`], which has its own lock.

use core::ptr::NonNull;

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::error;

use crate::slab::{SizeClass, SlabCache, SIZE_CLASS_COUNT};
use crate::{AddressCursor, AllocError, AllocResult};

/// Largest processor count a header's processor field can record.
pub const MAX_SUPPORTED_CPUS: usize = u16::MAX as usize + 1;

pub struct CacheBank<const MAX_CPUS: usize = { crate::DEFAULT_MAX_CPUS }> {
    cells: [[SpinNoIrq<SlabCache>; SIZE_CLASS_COUNT]; MAX_CPUS],
}

impl<const MAX_CPUS: usize> CacheBank<MAX_CPUS> {
    /// Creates a bank of empty, unlocked cells. [`init`](Self::init) must
    /// run before the first allocation.
    pub const fn new() -> Self {
        Self {
            cells: [const {
                [const { SpinNoIrq::new(SlabCache::new(0, SizeClass::MIN)) }; SIZE_CLASS_COUNT]
            }; MAX_CPUS],
        }
    }

    /// Binds every cell to its (processor, size class) coordinates.
    pub fn init(&self) -> AllocResult {
        if MAX_CPUS == 0 || MAX_CPUS > MAX_SUPPORTED_CPUS {
            return Err(AllocError::InvalidParam);
        }
        for (cpu, row) in self.cells.iter().enumerate() {
            for (index, cell) in row.iter().enumerate() {
                let size_class = SizeClass::from_index(index).ok_or(AllocError::InvalidParam)?;
                cell.lock().bind(cpu as u16, size_class)?;
            }
        }
        Ok(())
    }

    pub const fn cpu_count(&self) -> usize {
        MAX_CPUS
    }

    fn cell(&self, cpu: usize, size_class: SizeClass) -> AllocResult<&SpinNoIrq<SlabCache>> {
        match self.cells.get(cpu) {
            Some(row) => Ok(&row[size_class.index()]),
            None => {
                error!(
                    "cache bank: cpu index {} out of range (max {})",
                    cpu, MAX_CPUS
                );
                Err(AllocError::InvalidCpu)
            }
        }
    }

    /// Allocates one object from the cell at (`cpu`, `size_class`).
    pub fn alloc<const SLAB_SIZE: usize>(
        &self,
        cpu: usize,
        size_class: SizeClass,
        cursor: &AddressCursor<SLAB_SIZE>,
    ) -> AllocResult<NonNull<u8>> {
        self.cell(cpu, size_class)?.lock().alloc_object(cursor)
    }

    /// Pushes `obj` onto the free-list of the cell at (`cpu`, `size_class`).
    ///
    /// # Safety
    ///
    /// `obj` must have been returned by [`alloc`](Self::alloc) for the same
    /// size class and not released since.
    pub unsafe fn release(
        &self,
        cpu: usize,
        size_class: SizeClass,
        obj: NonNull<u8>,
    ) -> AllocResult {
        let cell = self.cell(cpu, size_class)?;
        unsafe { cell.lock().dealloc_object(obj) }
    }

    /// Number of slabs owned by the cell at (`cpu`, `size_class`).
    pub fn slab_count(&self, cpu: usize, size_class: SizeClass) -> AllocResult<usize> {
        Ok(self.cell(cpu, size_class)?.lock().slab_count())
    }

    /// Length of the free-list of the cell at (`cpu`, `size_class`).
    pub fn free_count(&self, cpu: usize, size_class: SizeClass) -> AllocResult<usize> {
        Ok(self.cell(cpu, size_class)?.lock().free_count())
    }
}

impl<const MAX_CPUS: usize> Default for CacheBank<MAX_CPUS> {
    fn default() -> Self {
        Self::new()
    }
}
