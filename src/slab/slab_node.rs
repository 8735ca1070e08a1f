//! Slab node implementation.
//!
//! A slab is a bump region: its header keeps the offset of the next unused
//! slot, and slots are only ever carved off the front of the unused part.
//! Released objects never go back to the slab; they go to the cell's
//! free-list.

use core::ptr::NonNull;

use super::object_header::{ObjectHeader, SlotState};
use super::size_class::SizeClass;

#[repr(C)]
pub(crate) struct SlabHeader {
    magic: u32,
    size_class: u8,
    _reserved: u8,
    cpu: u16,
    slab_bytes: usize,
    next: usize,
    cursor: usize,
}

const SLAB_HEADER_MAGIC: u32 = 0x534c_4142;

/// Handle to a slab living at `addr`.
#[derive(Debug, Clone, Copy)]
pub struct SlabNode {
    pub(crate) addr: usize,
    pub(crate) size_class: SizeClass,
}

impl SlabNode {
    /// Offset of the first slot from the slab base.
    pub const PAYLOAD_OFFSET: usize = crate::align_up(
        core::mem::size_of::<SlabHeader>(),
        core::mem::align_of::<usize>(),
    );

    pub const fn new(addr: usize, size_class: SizeClass) -> Self {
        Self { addr, size_class }
    }

    /// Number of slots a slab of `slab_bytes` holds for `size_class`.
    pub const fn capacity_for(size_class: SizeClass, slab_bytes: usize) -> usize {
        if slab_bytes <= Self::PAYLOAD_OFFSET {
            return 0;
        }
        (slab_bytes - Self::PAYLOAD_OFFSET) / size_class.slot_size()
    }

    fn header(&self) -> &SlabHeader {
        unsafe { &*(self.addr as *const SlabHeader) }
    }

    fn header_mut(&mut self) -> &mut SlabHeader {
        unsafe { &mut *(self.addr as *mut SlabHeader) }
    }

    /// Formats a freshly reserved region as an empty slab owned by `cpu`.
    pub fn init_header(&mut self, cpu: u16, slab_bytes: usize) {
        let size_class = self.size_class.size() as u8;
        *self.header_mut() = SlabHeader {
            magic: SLAB_HEADER_MAGIC,
            size_class,
            _reserved: 0,
            cpu,
            slab_bytes,
            next: 0,
            cursor: Self::PAYLOAD_OFFSET,
        };
    }

    pub(crate) fn is_valid_for_size_class(&self) -> bool {
        let header = self.header();
        header.magic == SLAB_HEADER_MAGIC && header.size_class as usize == self.size_class.size()
    }

    pub(crate) fn cpu(&self) -> usize {
        self.header().cpu as usize
    }

    pub fn capacity(&self) -> usize {
        Self::capacity_for(self.size_class, self.header().slab_bytes)
    }

    /// Slots handed out so far.
    pub fn allocated(&self) -> usize {
        (self.header().cursor - Self::PAYLOAD_OFFSET) / self.size_class.slot_size()
    }

    /// Whether another slot fits between the cursor and the end of the slab.
    pub fn has_room(&self) -> bool {
        let header = self.header();
        header.cursor + self.size_class.slot_size() <= header.slab_bytes
    }

    /// Carves the next slot, writes its header and returns the payload.
    pub fn alloc_object(&mut self) -> Option<NonNull<u8>> {
        if !self.has_room() {
            return None;
        }
        let slot_size = self.size_class.slot_size();
        let header = self.header_mut();
        let slot = header.cursor;
        header.cursor += slot_size;
        let cpu = header.cpu;

        let obj = NonNull::new((self.addr + slot + ObjectHeader::SIZE) as *mut u8)?;
        unsafe {
            ObjectHeader::write(
                obj,
                ObjectHeader::new(cpu, self.size_class, SlotState::Allocated),
            )
        };
        Some(obj)
    }

    /// Payload address of slot `index`.
    #[cfg(test)]
    pub(crate) fn object_addr(&self, index: usize) -> usize {
        self.addr + Self::PAYLOAD_OFFSET + index * self.size_class.slot_size() + ObjectHeader::SIZE
    }

    pub fn next(&self) -> Option<usize> {
        let next = self.header().next;
        if next == 0 {
            None
        } else {
            Some(next)
        }
    }

    pub fn set_next(&mut self, next: Option<usize>) {
        self.header_mut().next = next.unwrap_or(0);
    }
}
