//! Per-CPU small object allocator
//!
//! This crate implements a fixed-size object allocator for kernel code that
//! needs many short-lived allocations of 1 to 32 bytes, featuring:
//! - One cache cell per (processor, size class), each behind its own lock
//! - LIFO free-list recycling of released objects
//! - Slabs bump-reserved from a fixed, pre-mapped virtual window
//! - A per-object header so `release` needs only the pointer

#![no_std]

#[cfg(test)]
extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Size of one slab reserved from the window.
pub const DEFAULT_SLAB_SIZE: usize = 0x1000;

/// Number of processors the cache bank is sized for by default.
pub const DEFAULT_MAX_CPUS: usize = 8;

/// Default start of the allocator's virtual window.
pub const DEFAULT_ALLOC_START: usize = 0x8700_0000;

/// Default (exclusive) end of the allocator's virtual window.
pub const DEFAULT_ALLOC_END: usize = 0x8800_0000;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Requested size is outside `[MIN_SIZE_CLASS, MAX_SIZE_CLASS]`.
    InvalidSizeClass,
    /// The backing window has no slab-sized region left.
    AddressExhausted,
    /// Invalid window or allocator configuration.
    InvalidParam,
    /// The processor index is outside the cache bank.
    InvalidCpu,
    /// The allocator has not been given a window yet.
    NotInitialized,
    /// The pointer does not refer to a live object of this allocator.
    InvalidPointer,
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Identifies the processor executing the current critical section.
///
/// Implementations must return a value that stays valid until the
/// allocator call returns, e.g. by running with preemption disabled.
pub trait CpuIdProvider {
    /// Index of the current processor, in `[0, MAX_CPUS)`.
    fn current_cpu() -> usize;
}

/// Which cache cell a released object is pushed onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// The cell recorded in the object header when it was allocated.
    #[default]
    OwningCell,
    /// The releasing processor's cell for the object's size class.
    ///
    /// Objects migrate between processor caches under this policy.
    CurrentCpu,
}

#[inline]
const fn align_up(pos: usize, align: usize) -> usize {
    (pos + align - 1) & !(align - 1)
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

pub mod address_cursor;
pub use address_cursor::AddressCursor;

pub mod slab;
pub use slab::{
    ObjectHeader, SizeClass, SlabCache, SlabNode, SlotState, MAX_SIZE_CLASS, MIN_SIZE_CLASS,
    SIZE_CLASS_COUNT,
};

pub mod cache_bank;
pub use cache_bank::CacheBank;

pub mod object_allocator;
pub use object_allocator::ObjectAllocator;
