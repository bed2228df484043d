/*!
 * Core Types
 * Arena handles, allocation flags and the extent hook table layout
 */

use std::ffi::{c_uint, c_void};
use std::fmt;
use std::num::NonZeroU32;

/// Arena index assigned by the underlying allocator
///
/// Zero is reserved for the automatic arena and never names a created arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaIndex(NonZeroU32);

impl ArenaIndex {
    /// Wrap a raw index, rejecting the reserved zero value
    #[inline]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Control key for reading and writing this arena's extent hooks
    pub fn extent_hooks_key(self) -> String {
        format!("arena.{}.extent_hooks", self.get())
    }

    /// Control key for destroying this arena
    pub fn destroy_key(self) -> String {
        format!("arena.{}.destroy", self.get())
    }
}

impl fmt::Display for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Flags passed to every arena-scoped allocation call
///
/// Same bit layout as jemalloc's `MALLOCX_*` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocFlags(i32);

impl AllocFlags {
    const ARENA_SHIFT: u32 = 20;
    const TCACHE_SHIFT: u32 = 8;

    /// `MALLOCX_TCACHE_NONE`: bypass the per-thread cache
    pub const TCACHE_NONE: AllocFlags = AllocFlags(1 << Self::TCACHE_SHIFT);

    /// `MALLOCX_ARENA(arena) | MALLOCX_TCACHE_NONE`
    #[inline]
    pub fn for_arena(arena: ArenaIndex) -> Self {
        let arena_bits = (arena.get() as i32).wrapping_add(1) << Self::ARENA_SHIFT;
        AllocFlags(arena_bits | Self::TCACHE_NONE.0)
    }

    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        AllocFlags(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Arena encoded in the flags, if any
    pub fn arena(self) -> Option<ArenaIndex> {
        let encoded = (self.0 as u32) >> Self::ARENA_SHIFT;
        encoded.checked_sub(1).and_then(ArenaIndex::new)
    }

    /// Whether the per-thread cache is bypassed
    pub fn bypasses_tcache(self) -> bool {
        self.0 & (0xfff << Self::TCACHE_SHIFT) == Self::TCACHE_NONE.0
    }
}

// Extent hook signatures, matching jemalloc 5's `extent_hooks_t` members.

pub type ExtentAllocFn = unsafe extern "C" fn(
    extent_hooks: *mut ExtentHooks,
    new_addr: *mut c_void,
    size: usize,
    alignment: usize,
    zero: *mut bool,
    commit: *mut bool,
    arena_ind: c_uint,
) -> *mut c_void;

pub type ExtentDallocFn = unsafe extern "C" fn(
    extent_hooks: *mut ExtentHooks,
    addr: *mut c_void,
    size: usize,
    committed: bool,
    arena_ind: c_uint,
) -> bool;

pub type ExtentDestroyFn = unsafe extern "C" fn(
    extent_hooks: *mut ExtentHooks,
    addr: *mut c_void,
    size: usize,
    committed: bool,
    arena_ind: c_uint,
);

pub type ExtentCommitFn = unsafe extern "C" fn(
    extent_hooks: *mut ExtentHooks,
    addr: *mut c_void,
    size: usize,
    offset: usize,
    length: usize,
    arena_ind: c_uint,
) -> bool;

pub type ExtentPurgeFn = ExtentCommitFn;

pub type ExtentSplitFn = unsafe extern "C" fn(
    extent_hooks: *mut ExtentHooks,
    addr: *mut c_void,
    size: usize,
    size_a: usize,
    size_b: usize,
    committed: bool,
    arena_ind: c_uint,
) -> bool;

pub type ExtentMergeFn = unsafe extern "C" fn(
    extent_hooks: *mut ExtentHooks,
    addr_a: *mut c_void,
    size_a: usize,
    addr_b: *mut c_void,
    size_b: usize,
    committed: bool,
    arena_ind: c_uint,
) -> bool;

/// C layout of an arena's extent hook table
///
/// The allocator keeps a raw pointer to the installed table, so a table
/// handed to `arena.<i>.extent_hooks` must stay put until the arena is
/// destroyed.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct ExtentHooks {
    pub alloc: Option<ExtentAllocFn>,
    pub dalloc: Option<ExtentDallocFn>,
    pub destroy: Option<ExtentDestroyFn>,
    pub commit: Option<ExtentCommitFn>,
    pub decommit: Option<ExtentCommitFn>,
    pub purge_lazy: Option<ExtentPurgeFn>,
    pub purge_forced: Option<ExtentPurgeFn>,
    pub split: Option<ExtentSplitFn>,
    pub merge: Option<ExtentMergeFn>,
}

impl ExtentHooks {
    /// Copy of this table with the allocation entry replaced
    pub fn with_alloc(&self, alloc: ExtentAllocFn) -> Self {
        Self {
            alloc: Some(alloc),
            ..*self
        }
    }
}

impl fmt::Debug for ExtentHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtentHooks")
            .field("alloc", &self.alloc.map(|p| p as *const c_void))
            .field("dalloc", &self.dalloc.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("commit", &self.commit.is_some())
            .field("decommit", &self.decommit.is_some())
            .field("purge_lazy", &self.purge_lazy.is_some())
            .field("purge_forced", &self.purge_forced.is_some())
            .field("split", &self.split.is_some())
            .field("merge", &self.merge.is_some())
            .finish()
    }
}
