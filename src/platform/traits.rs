/*!
 * Platform Traits
 * Seams to the underlying arena allocator and to the page-exclusion primitive
 */

use crate::core::errors::AllocatorResult;
use crate::core::types::{AllocFlags, ArenaIndex, ExtentHooks};
use nix::errno::Errno;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

/// Control interface of an arena-based allocator
///
/// Mirrors the three jemalloc facilities the nodump allocator needs: arena
/// lifecycle (`arenas.create`, `arena.<i>.destroy`), extent hook access
/// (`arena.<i>.extent_hooks`) and arena-scoped allocation calls.
pub trait ArenaControl: Send + Sync {
    /// Name reported by allocators built on this control
    const ALLOCATOR_NAME: &'static str;

    /// Check that arenas and extent hooks are usable at runtime
    ///
    /// Returns `NotSupported` with the reason otherwise.
    fn is_supported(&self) -> AllocatorResult<()>;

    /// Create a fresh arena
    fn create_arena(&self) -> AllocatorResult<ArenaIndex>;

    /// Flags that scope allocation calls to `arena` without a thread cache
    fn flags_for(&self, arena: ArenaIndex) -> AllocFlags {
        AllocFlags::for_arena(arena)
    }

    /// Copy of the arena's current extent hook table
    fn extent_hooks(&self, arena: ArenaIndex) -> AllocatorResult<ExtentHooks>;

    /// Install `hooks` as the arena's extent hook table
    ///
    /// # Safety
    ///
    /// `hooks` must point to a table that stays valid and unmoved until the
    /// arena is destroyed; the allocator calls through it at any time.
    unsafe fn set_extent_hooks(
        &self,
        arena: ArenaIndex,
        hooks: NonNull<ExtentHooks>,
    ) -> AllocatorResult<()>;

    /// Destroy the arena and release all of its extents
    fn destroy_arena(&self, arena: ArenaIndex) -> AllocatorResult<()>;

    /// Allocate `size` bytes with `flags`; `None` when the request cannot be met
    fn allocate(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>>;

    /// Return memory to the allocator
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this control with the same flags
    /// and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, flags: AllocFlags);

    /// Usable size of a live allocation
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation from this control.
    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize;
}

impl<T: ArenaControl> ArenaControl for Arc<T> {
    const ALLOCATOR_NAME: &'static str = T::ALLOCATOR_NAME;

    fn is_supported(&self) -> AllocatorResult<()> {
        (**self).is_supported()
    }

    fn create_arena(&self) -> AllocatorResult<ArenaIndex> {
        (**self).create_arena()
    }

    fn flags_for(&self, arena: ArenaIndex) -> AllocFlags {
        (**self).flags_for(arena)
    }

    fn extent_hooks(&self, arena: ArenaIndex) -> AllocatorResult<ExtentHooks> {
        (**self).extent_hooks(arena)
    }

    unsafe fn set_extent_hooks(
        &self,
        arena: ArenaIndex,
        hooks: NonNull<ExtentHooks>,
    ) -> AllocatorResult<()> {
        (**self).set_extent_hooks(arena, hooks)
    }

    fn destroy_arena(&self, arena: ArenaIndex) -> AllocatorResult<()> {
        (**self).destroy_arena(arena)
    }

    fn allocate(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>> {
        (**self).allocate(size, flags)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, flags: AllocFlags) {
        (**self).deallocate(ptr, flags)
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        (**self).usable_size(ptr)
    }
}

/// Marks memory as excluded from core dumps
///
/// Called from the extent hook trampoline, which has no instance to carry
/// state, so every operation is an associated function.
pub trait DumpExclusion: 'static {
    /// Human-readable name for logs and unsupported-platform messages
    const NAME: &'static str;

    /// Whether a marking failure trips a debug assertion
    const FATAL_ON_FAILURE: bool = true;

    /// Whether this primitive works on the running platform
    fn is_supported() -> bool;

    /// Exclude `[addr, addr + len)` from dumps
    ///
    /// # Safety
    ///
    /// The range must be memory mapped by this process.
    unsafe fn exclude(addr: NonNull<c_void>, len: usize) -> Result<(), Errno>;
}
