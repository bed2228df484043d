/*!
 * Allocator Traits
 * The allocation capability a cache consumes
 */

use std::ptr::NonNull;

/// Memory allocator used by a cache for its entries
///
/// Implementations are shared across threads behind an `Arc`.
pub trait CacheAllocator: Send + Sync {
    /// Name of the allocator, for logs
    fn name(&self) -> &'static str;

    /// Allocate `size` bytes
    ///
    /// `None` when the underlying allocator cannot satisfy the request; no
    /// retry is attempted.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Release memory obtained from [`allocate`](Self::allocate)
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this same allocator and must not be
    /// used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>);

    /// Bytes actually usable at `ptr`, at least the requested size
    ///
    /// `allocation_size` is the size passed to `allocate`, for
    /// implementations that do not track sizes themselves.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this allocator.
    unsafe fn usable_size(&self, ptr: NonNull<u8>, allocation_size: usize) -> usize;
}
