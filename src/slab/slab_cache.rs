//! Slab cache implementation for a single (processor, size class) cell.
//!
//! A cell owns a chain of slabs and a LIFO free-list. The head of the slab
//! chain is the active slab; older slabs are full and only stay on the
//! chain for ownership. The free-list is threaded through the payloads of
//! released objects.

use core::ptr::NonNull;

#[cfg(feature = "log")]
use log::{debug, error};

use super::object_header::{ObjectHeader, SlotState};
use super::size_class::SizeClass;
use super::slab_node::SlabNode;
use crate::{AddressCursor, AllocError, AllocResult};

/// Cache cell for one size class on one processor
pub struct SlabCache {
    cpu: u16,
    size_class: SizeClass,
    slabs: Option<usize>,
    free: Option<NonNull<u8>>,
}

// SAFETY: SlabCache is only reached through its cell's SpinNoIrq lock, and
// the memory behind its raw pointers is owned by the cell.
unsafe impl Send for SlabCache {}

impl SlabCache {
    pub const fn new(cpu: u16, size_class: SizeClass) -> Self {
        Self {
            cpu,
            size_class,
            slabs: None,
            free: None,
        }
    }

    /// Assigns the cell's identity. Only an empty cell can be rebound.
    pub fn bind(&mut self, cpu: u16, size_class: SizeClass) -> AllocResult {
        if self.slabs.is_some() || self.free.is_some() {
            return Err(AllocError::InvalidParam);
        }
        self.cpu = cpu;
        self.size_class = size_class;
        Ok(())
    }

    pub fn cpu(&self) -> usize {
        self.cpu as usize
    }

    pub fn size_class(&self) -> SizeClass {
        self.size_class
    }

    /// Allocate an object from this cache.
    ///
    /// Reuses the most recently released object if there is one, otherwise
    /// carves a slot from the active slab, reserving a new slab from `cursor`
    /// when the active one is full.
    pub fn alloc_object<const SLAB_SIZE: usize>(
        &mut self,
        cursor: &AddressCursor<SLAB_SIZE>,
    ) -> AllocResult<NonNull<u8>> {
        if let Some(obj) = self.pop_free() {
            return Ok(obj);
        }

        let mut slab = match self.active_slab()? {
            Some(slab) if slab.has_room() => slab,
            _ => self.grow(cursor)?,
        };
        // A freshly formatted slab always has room: SLAB_SIZE is checked
        // against the largest slot when the allocator is initialized.
        slab.alloc_object().ok_or(AllocError::InvalidParam)
    }

    /// Push a released object onto the free-list.
    ///
    /// Fails with [`AllocError::InvalidPointer`] if the header does not
    /// describe a live object of this cell's size class.
    ///
    /// # Safety
    ///
    /// `obj` must be a payload pointer previously returned by
    /// [`alloc_object`](Self::alloc_object) on a cell of the same size class.
    pub unsafe fn dealloc_object(&mut self, obj: NonNull<u8>) -> AllocResult {
        let header = unsafe { ObjectHeader::read(obj) };
        if !header.is_valid()
            || header.size_class() != Some(self.size_class)
            || header.state() != Some(SlotState::Allocated)
        {
            return Err(AllocError::InvalidPointer);
        }

        let next = self.free.map_or(0, |head| head.as_ptr() as usize);
        unsafe {
            ObjectHeader::write(
                obj,
                ObjectHeader::new(self.cpu, self.size_class, SlotState::Free),
            );
            (obj.as_ptr() as *mut usize).write(next);
        }
        self.free = Some(obj);
        Ok(())
    }

    fn pop_free(&mut self) -> Option<NonNull<u8>> {
        let obj = self.free?;
        let header = unsafe { ObjectHeader::read(obj) };
        if !header.is_valid()
            || header.size_class() != Some(self.size_class)
            || header.state() != Some(SlotState::Free)
        {
            panic!(
                "Free-list corruption in cell (cpu {}, size {}): bad header at {:#x}",
                self.cpu,
                self.size_class.size(),
                obj.as_ptr() as usize
            );
        }

        let next = unsafe { (obj.as_ptr() as *const usize).read() };
        self.free = NonNull::new(next as *mut u8);
        unsafe {
            ObjectHeader::write(
                obj,
                ObjectHeader::new(self.cpu, self.size_class, SlotState::Allocated),
            )
        };
        Some(obj)
    }

    fn active_slab(&self) -> AllocResult<Option<SlabNode>> {
        let Some(addr) = self.slabs else {
            return Ok(None);
        };
        let slab = SlabNode::new(addr, self.size_class);
        if !slab.is_valid_for_size_class() || slab.cpu() != self.cpu() {
            error!(
                "slab cache: slab {:#x} does not belong to cpu {} size {}",
                addr,
                self.cpu,
                self.size_class.size()
            );
            return Err(AllocError::InvalidParam);
        }
        Ok(Some(slab))
    }

    /// Reserve a slab and make it the active one. The previous active slab,
    /// if any, stays on the chain but serves no further allocations.
    fn grow<const SLAB_SIZE: usize>(
        &mut self,
        cursor: &AddressCursor<SLAB_SIZE>,
    ) -> AllocResult<SlabNode> {
        let base = cursor.reserve()?;
        if let Some(retired) = self.slabs {
            debug!(
                "slab cache: cpu {} size {} retiring slab {:#x}",
                self.cpu,
                self.size_class.size(),
                retired
            );
        }

        let mut slab = SlabNode::new(base, self.size_class);
        slab.init_header(self.cpu, SLAB_SIZE);
        slab.set_next(self.slabs);
        self.slabs = Some(base);
        Ok(slab)
    }

    /// Number of slabs owned by this cell.
    pub fn slab_count(&self) -> usize {
        let mut count = 0;
        let mut next = self.slabs;
        while let Some(addr) = next {
            count += 1;
            next = SlabNode::new(addr, self.size_class).next();
        }
        count
    }

    /// Number of objects waiting on the free-list.
    pub fn free_count(&self) -> usize {
        let mut count = 0;
        let mut next = self.free;
        while let Some(obj) = next {
            count += 1;
            let link = unsafe { (obj.as_ptr() as *const usize).read() };
            next = NonNull::new(link as *mut u8);
        }
        count
    }
}
