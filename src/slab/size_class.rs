//! Byte-granular size classes.

use super::object_header::ObjectHeader;

/// Smallest object size served.
pub const MIN_SIZE_CLASS: usize = 1;
/// Largest object size served.
pub const MAX_SIZE_CLASS: usize = 32;
/// Number of distinct size classes.
pub const SIZE_CLASS_COUNT: usize = MAX_SIZE_CLASS - MIN_SIZE_CLASS + 1;

const LINK_SIZE: usize = core::mem::size_of::<usize>();
const SLOT_ALIGN: usize = core::mem::align_of::<usize>();

/// An object size in `[MIN_SIZE_CLASS, MAX_SIZE_CLASS]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeClass(u8);

impl SizeClass {
    pub const MIN: SizeClass = SizeClass(MIN_SIZE_CLASS as u8);
    pub const MAX: SizeClass = SizeClass(MAX_SIZE_CLASS as u8);

    /// Size class serving exactly `size` bytes.
    pub const fn from_size(size: usize) -> Option<Self> {
        if size < MIN_SIZE_CLASS || size > MAX_SIZE_CLASS {
            return None;
        }
        Some(Self(size as u8))
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        Self::from_size(index + MIN_SIZE_CLASS)
    }

    pub const fn size(&self) -> usize {
        self.0 as usize
    }

    /// Column of this class in the cache bank.
    pub const fn index(&self) -> usize {
        self.0 as usize - MIN_SIZE_CLASS
    }

    /// Bytes one object of this class occupies inside a slab.
    ///
    /// The payload is at least one link wide so a released object can hold
    /// the free-list pointer, and the stride keeps every payload `usize`-aligned.
    pub const fn slot_size(&self) -> usize {
        let payload = if self.size() < LINK_SIZE {
            LINK_SIZE
        } else {
            self.size()
        };
        crate::align_up(ObjectHeader::SIZE + payload, SLOT_ALIGN)
    }

    /// Slot size of the largest class.
    pub const fn max_slot_size() -> usize {
        Self::MAX.slot_size()
    }
}

impl From<SizeClass> for usize {
    fn from(class: SizeClass) -> usize {
        class.size()
    }
}
