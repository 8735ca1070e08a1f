//! Slab layer: size classes, object headers, slabs and per-cell caches.
//!
//! A slab is one `SLAB_SIZE` region from the address window. It starts with
//! a [`SlabNode`] header and is carved into slots, each an [`ObjectHeader`]
//! followed by the object payload.

pub mod object_header;
pub mod size_class;
pub mod slab_cache;
pub mod slab_node;

// Re-export public types
pub use object_header::{ObjectHeader, SlotState};
pub use size_class::{SizeClass, MAX_SIZE_CLASS, MIN_SIZE_CLASS, SIZE_CLASS_COUNT};
pub use slab_cache::SlabCache;
pub use slab_node::SlabNode;
