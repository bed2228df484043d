/*!
 * Allocator Module
 * The nodump cache allocator and its factory
 */

pub mod factory;
mod guard;
pub mod nodump;
pub mod options;
pub mod traits;

pub use factory::{is_supported, new_nodump_allocator};
pub use nodump::NoDumpAllocator;
pub use options::{NoDumpOptions, DEFAULT_LABEL};
pub use traits::CacheAllocator;
