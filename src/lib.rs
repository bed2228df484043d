/*!
 * NoDump Allocator Library
 * jemalloc arena allocator whose pages are excluded from core dumps
 */

pub mod allocator;
pub mod core;
pub mod hooks;
pub mod monitoring;
pub mod platform;

// Re-exports
pub use allocator::{
    is_supported, new_nodump_allocator, CacheAllocator, NoDumpAllocator, NoDumpOptions,
};
pub use crate::core::{AllocFlags, AllocatorError, AllocatorResult, ArenaIndex, ExtentHooks};
pub use hooks::ORIGINAL_EXTENT_ALLOC;
pub use monitoring::{init_tracing, OperationSpan};
pub use platform::{ArenaControl, DumpExclusion, JemallocControl, MadviseDontDump};
