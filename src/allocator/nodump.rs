/*!
 * NoDump Allocator
 * Arena-backed cache allocator whose extents are excluded from core dumps
 */

use super::options::NoDumpOptions;
use super::traits::CacheAllocator;
use crate::core::types::{AllocFlags, ArenaIndex, ExtentHooks};
use crate::platform::traits::{ArenaControl, DumpExclusion};
use crate::platform::{JemallocControl, MadviseDontDump};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use tracing::{debug, error};

/// Allocator that serves every request from one dedicated arena
///
/// The arena's extent `alloc` hook is replaced by a trampoline that applies
/// `P` to each new extent, so everything handed out lives in dump-excluded
/// pages. Dropping the allocator destroys the arena.
pub struct NoDumpAllocator<C: ArenaControl = JemallocControl, P: DumpExclusion = MadviseDontDump> {
    arena: ArenaIndex,
    flags: AllocFlags,
    control: C,
    // Installed into the arena; must stay put until `destroy_arena` returns
    hooks: Box<ExtentHooks>,
    options: NoDumpOptions,
    _exclusion: PhantomData<fn() -> P>,
}

impl<C: ArenaControl, P: DumpExclusion> NoDumpAllocator<C, P> {
    /// Assemble an allocator around an arena whose hooks are already installed
    pub(crate) fn from_parts(
        arena: ArenaIndex,
        flags: AllocFlags,
        control: C,
        hooks: Box<ExtentHooks>,
        options: NoDumpOptions,
    ) -> Self {
        Self {
            arena,
            flags,
            control,
            hooks,
            options,
            _exclusion: PhantomData,
        }
    }

    /// The dedicated arena
    #[inline]
    pub fn arena(&self) -> ArenaIndex {
        self.arena
    }

    /// Flags used for every allocation call
    #[inline]
    pub fn flags(&self) -> AllocFlags {
        self.flags
    }

    /// The hook table installed into the arena
    #[inline]
    pub fn installed_hooks(&self) -> &ExtentHooks {
        &self.hooks
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.options.label
    }
}

impl<C: ArenaControl, P: DumpExclusion> CacheAllocator for NoDumpAllocator<C, P> {
    fn name(&self) -> &'static str {
        C::ALLOCATOR_NAME
    }

    #[inline]
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.control.allocate(size, self.flags)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        self.control.deallocate(ptr, self.flags)
    }

    #[inline]
    unsafe fn usable_size(&self, ptr: NonNull<u8>, _allocation_size: usize) -> usize {
        self.control.usable_size(ptr)
    }
}

impl<C: ArenaControl, P: DumpExclusion> Drop for NoDumpAllocator<C, P> {
    fn drop(&mut self) {
        let arena = self.arena;
        let label = self.options.label.as_str();
        match self.control.destroy_arena(arena) {
            Ok(()) => self.options.log(|| {
                debug!(label, arena = %arena, "destroyed nodump arena");
            }),
            Err(e) => self.options.log(|| {
                error!(
                    label,
                    arena = %arena,
                    code = e.code(),
                    "Failed to destroy arena: {}",
                    e
                );
            }),
        }
        // `hooks` is released after this body returns, once the arena is gone
    }
}

impl<C: ArenaControl, P: DumpExclusion> fmt::Debug for NoDumpAllocator<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoDumpAllocator")
            .field("name", &C::ALLOCATOR_NAME)
            .field("label", &self.options.label)
            .field("arena", &self.arena)
            .field("flags", &self.flags)
            .field("exclusion", &P::NAME)
            .finish()
    }
}
