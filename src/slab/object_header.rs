//! Per-object header stored immediately before every payload.
//!
//! The header records which cache cell the object belongs to, so release
//! only needs the pointer. `state` says how the payload is interpreted:
//! live caller data, or a free-list link.

use core::ptr::NonNull;

use super::size_class::SizeClass;

const OBJECT_HEADER_MAGIC: u32 = 0x4f42_4a48;

/// How the payload following a header is currently used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Handed out to a caller.
    Allocated = 0xa1,
    /// On a cell's free-list; the first word of the payload is the link.
    Free = 0xf7,
}

impl SlotState {
    const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0xa1 => Some(SlotState::Allocated),
            0xf7 => Some(SlotState::Free),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    magic: u32,
    cpu: u16,
    size_class: u8,
    state: u8,
}

impl ObjectHeader {
    pub const SIZE: usize = core::mem::size_of::<ObjectHeader>();

    pub const fn new(cpu: u16, size_class: SizeClass, state: SlotState) -> Self {
        Self {
            magic: OBJECT_HEADER_MAGIC,
            cpu,
            size_class: size_class.size() as u8,
            state: state as u8,
        }
    }

    /// Whether the header was written by this allocator and decodes cleanly.
    pub fn is_valid(&self) -> bool {
        self.magic == OBJECT_HEADER_MAGIC && self.size_class().is_some() && self.state().is_some()
    }

    pub fn size_class(&self) -> Option<SizeClass> {
        SizeClass::from_size(self.size_class as usize)
    }

    pub fn cpu(&self) -> usize {
        self.cpu as usize
    }

    pub fn state(&self) -> Option<SlotState> {
        SlotState::from_raw(self.state)
    }

    /// Reads the header preceding `obj`.
    ///
    /// # Safety
    ///
    /// `obj - ObjectHeader::SIZE` must be readable and aligned for `ObjectHeader`.
    pub unsafe fn read(obj: NonNull<u8>) -> Self {
        unsafe { core::ptr::read(Self::location(obj)) }
    }

    /// Writes the header preceding `obj`.
    ///
    /// # Safety
    ///
    /// `obj` must be the payload of a slot owned by the caller's cache cell.
    pub unsafe fn write(obj: NonNull<u8>, header: Self) {
        unsafe { core::ptr::write(Self::location(obj), header) }
    }

    fn location(obj: NonNull<u8>) -> *mut ObjectHeader {
        obj.as_ptr().wrapping_sub(Self::SIZE) as *mut ObjectHeader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(ObjectHeader::SIZE, 8);
        assert_eq!(core::mem::align_of::<ObjectHeader>(), 4);
    }

    #[test]
    fn test_header_round_trip_in_memory() {
        let mut slot = [0u64; 2];
        let obj = NonNull::new(unsafe { (slot.as_mut_ptr() as *mut u8).add(ObjectHeader::SIZE) })
            .unwrap();
        let class = SizeClass::from_size(13).unwrap();

        unsafe { ObjectHeader::write(obj, ObjectHeader::new(3, class, SlotState::Allocated)) };
        let header = unsafe { ObjectHeader::read(obj) };

        assert!(header.is_valid());
        assert_eq!(header.size_class(), Some(class));
        assert_eq!(header.cpu(), 3);
        assert_eq!(header.state(), Some(SlotState::Allocated));
    }

    #[test]
    fn test_garbage_is_invalid() {
        let slot = [0u64; 2];
        let obj = NonNull::new(unsafe { (slot.as_ptr() as *mut u8).add(ObjectHeader::SIZE) })
            .unwrap();
        assert!(!unsafe { ObjectHeader::read(obj) }.is_valid());

        let mut header = ObjectHeader::new(0, SizeClass::from_size(1).unwrap(), SlotState::Free);
        header.size_class = 33;
        assert!(!header.is_valid());
        header.size_class = 1;
        header.state = 0;
        assert!(!header.is_valid());
    }
}
