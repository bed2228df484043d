/*!
 * Extent Hooks
 * Process-wide saved hook and the trampoline that wraps it
 */

pub mod slot;
pub mod trampoline;

pub use slot::{HookSlot, Publication, ORIGINAL_EXTENT_ALLOC};
pub use trampoline::{extent_alloc_trampoline, route_extent_alloc};
