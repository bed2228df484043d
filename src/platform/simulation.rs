/*!
 * Simulated Arenas
 * In-process arena allocator with a jemalloc-style extent hook chain
 *
 * Extents come from the global allocator through the arena's `alloc` hook,
 * so an installed trampoline sees every extent exactly as it would under
 * jemalloc. Small allocations are carved out of the current extent and
 * recycled through per-size free lists.
 */

use super::traits::{ArenaControl, DumpExclusion};
use crate::core::errors::{AllocatorError, AllocatorResult};
use crate::core::types::{AllocFlags, ArenaIndex, ExtentHooks};
use ahash::RandomState;
use nix::errno::Errno;
use parking_lot::Mutex;
use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ffi::{c_uint, c_void};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Page size and alignment of every simulated extent
pub const SIMULATED_PAGE: usize = 4096;

/// Minimum extent size requested from the hook chain
pub const SIMULATED_EXTENT_SIZE: usize = 64 * SIMULATED_PAGE;

/// Allocation granule
const QUANTUM: usize = 16;

/// First index handed out; lower indices mimic jemalloc's automatic arenas
const FIRST_ARENA: u32 = 64;

/// Largest request the simulator accepts
const MAX_REQUEST: usize = 1 << 30;

/// The hook table every simulated arena starts with
static DEFAULT_HOOKS: ExtentHooks = ExtentHooks {
    alloc: Some(simulated_extent_alloc),
    dalloc: None,
    destroy: Some(simulated_extent_destroy),
    commit: None,
    decommit: None,
    purge_lazy: None,
    purge_forced: None,
    split: None,
    merge: None,
};

/// Default extent allocation hook of simulated arenas
///
/// # Safety
///
/// Called by the simulator through a hook table; `zero` and `commit` must be
/// valid or null.
pub unsafe extern "C" fn simulated_extent_alloc(
    _extent_hooks: *mut ExtentHooks,
    new_addr: *mut c_void,
    size: usize,
    alignment: usize,
    zero: *mut bool,
    commit: *mut bool,
    _arena_ind: c_uint,
) -> *mut c_void {
    if !new_addr.is_null() || size == 0 || alignment > SIMULATED_PAGE {
        return ptr::null_mut();
    }
    let Ok(layout) = Layout::from_size_align(size, SIMULATED_PAGE) else {
        return ptr::null_mut();
    };
    let extent = alloc::alloc_zeroed(layout);
    if !extent.is_null() {
        if !zero.is_null() {
            *zero = true;
        }
        if !commit.is_null() {
            *commit = true;
        }
    }
    extent.cast::<c_void>()
}

/// Default extent destroy hook of simulated arenas
///
/// # Safety
///
/// `addr` and `size` must describe an extent from [`simulated_extent_alloc`].
pub unsafe extern "C" fn simulated_extent_destroy(
    _extent_hooks: *mut ExtentHooks,
    addr: *mut c_void,
    size: usize,
    _committed: bool,
    _arena_ind: c_uint,
) {
    SimulatedExclusion::forget(addr as usize, size);
    if let Ok(layout) = Layout::from_size_align(size, SIMULATED_PAGE) {
        alloc::dealloc(addr.cast::<u8>(), layout);
    }
}

/// Which control calls should fail, and with which code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatedFaults {
    pub create: Option<i32>,
    pub read_hooks: Option<i32>,
    pub write_hooks: Option<i32>,
    pub destroy: Option<i32>,
}

#[derive(Debug, Clone, Copy)]
struct Extent {
    base: usize,
    size: usize,
}

struct SimArena {
    /// Installed table, or `None` for [`DEFAULT_HOOKS`]
    hooks: Option<NonNull<ExtentHooks>>,
    extents: Vec<Extent>,
    cursor: usize,
    limit: usize,
    free: HashMap<usize, Vec<usize>, RandomState>,
}

impl SimArena {
    fn new() -> Self {
        Self {
            hooks: None,
            extents: Vec::new(),
            cursor: 0,
            limit: 0,
            free: HashMap::default(),
        }
    }

    fn table(&self) -> *mut ExtentHooks {
        match self.hooks {
            Some(hooks) => hooks.as_ptr(),
            None => &DEFAULT_HOOKS as *const ExtentHooks as *mut ExtentHooks,
        }
    }

    /// Grow by one extent through the hook chain
    fn grow(&mut self, arena: ArenaIndex, min: usize) -> bool {
        let size = round_up(min, SIMULATED_PAGE).max(SIMULATED_EXTENT_SIZE);
        let table = self.table();
        // SAFETY: `table` is either the static default table or the installed
        // table, which the installer keeps alive until `destroy_arena`.
        let Some(alloc_hook) = (unsafe { (*table).alloc }) else {
            return false;
        };
        let mut zero = false;
        let mut commit = true;
        let base = unsafe {
            alloc_hook(
                table,
                ptr::null_mut(),
                size,
                SIMULATED_PAGE,
                &mut zero,
                &mut commit,
                arena.get(),
            )
        };
        if base.is_null() {
            return false;
        }
        debug!(arena = %arena, size, "simulated arena grew by one extent");
        self.extents.push(Extent {
            base: base as usize,
            size,
        });
        self.cursor = base as usize;
        self.limit = base as usize + size;
        true
    }

    fn carve(&mut self, arena: ArenaIndex, class: usize) -> Option<usize> {
        if let Some(addr) = self.free.get_mut(&class).and_then(Vec::pop) {
            return Some(addr);
        }
        if self.limit - self.cursor < class && !self.grow(arena, class) {
            return None;
        }
        let addr = self.cursor;
        self.cursor += class;
        Some(addr)
    }

    fn release_extents(&mut self, arena: ArenaIndex) {
        let table = self.table();
        // SAFETY: as in `grow`; the table outlives this call.
        let destroy = unsafe { (*table).destroy };
        for extent in self.extents.drain(..) {
            match destroy {
                Some(destroy) => unsafe {
                    destroy(table, extent.base as *mut c_void, extent.size, true, arena.get())
                },
                None => unsafe {
                    simulated_extent_destroy(
                        table,
                        extent.base as *mut c_void,
                        extent.size,
                        true,
                        arena.get(),
                    )
                },
            }
        }
    }
}

struct SimState {
    next_index: u32,
    arenas: HashMap<ArenaIndex, SimArena, RandomState>,
    /// Live allocation address -> (arena, size class)
    live: HashMap<usize, (ArenaIndex, usize), RandomState>,
}

/// Arena control that simulates jemalloc arenas in process memory
///
/// Tracks created and destroyed arenas for inspection, and can be told to
/// fail individual control calls.
pub struct SimulatedArenas {
    state: Mutex<SimState>,
    faults: SimulatedFaults,
    destroyed: Mutex<Vec<ArenaIndex>>,
    destroy_calls: AtomicUsize,
}

// SAFETY: the raw hook table pointers inside `SimState` are only dereferenced
// with the state lock held, and installers keep the tables alive and unmoved
// until `destroy_arena`.
unsafe impl Send for SimulatedArenas {}
unsafe impl Sync for SimulatedArenas {}

impl SimulatedArenas {
    pub fn new() -> Self {
        Self::with_faults(SimulatedFaults::default())
    }

    pub fn with_faults(faults: SimulatedFaults) -> Self {
        Self {
            state: Mutex::new(SimState {
                next_index: FIRST_ARENA,
                arenas: HashMap::default(),
                live: HashMap::default(),
            }),
            faults,
            destroyed: Mutex::new(Vec::new()),
            destroy_calls: AtomicUsize::new(0),
        }
    }

    /// Shared handle, convenient when tests inspect the control afterwards
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Arenas created and not yet destroyed
    pub fn live_arenas(&self) -> Vec<ArenaIndex> {
        let mut arenas: Vec<_> = self.state.lock().arenas.keys().copied().collect();
        arenas.sort();
        arenas
    }

    /// Arenas successfully destroyed, in order
    pub fn destroyed_arenas(&self) -> Vec<ArenaIndex> {
        self.destroyed.lock().clone()
    }

    /// Number of destroy calls, including failed ones
    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::Relaxed)
    }

    /// Number of extents the arena obtained through its hook chain
    pub fn extent_count(&self, arena: ArenaIndex) -> usize {
        self.state
            .lock()
            .arenas
            .get(&arena)
            .map_or(0, |a| a.extents.len())
    }

    /// `[base, base + size)` of every extent the arena holds
    pub fn extents(&self, arena: ArenaIndex) -> Vec<(usize, usize)> {
        self.state
            .lock()
            .arenas
            .get(&arena)
            .map(|a| a.extents.iter().map(|e| (e.base, e.size)).collect())
            .unwrap_or_default()
    }

    /// Whether the arena currently uses a caller-installed hook table
    pub fn has_custom_hooks(&self, arena: ArenaIndex) -> bool {
        self.state
            .lock()
            .arenas
            .get(&arena)
            .is_some_and(|a| a.hooks.is_some())
    }
}

impl Default for SimulatedArenas {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaControl for SimulatedArenas {
    const ALLOCATOR_NAME: &'static str = "SimulatedNodumpAllocator";

    fn is_supported(&self) -> AllocatorResult<()> {
        Ok(())
    }

    fn create_arena(&self) -> AllocatorResult<ArenaIndex> {
        if let Some(code) = self.faults.create {
            return Err(AllocatorError::incomplete("arenas.create", code));
        }
        let mut state = self.state.lock();
        let arena = ArenaIndex::new(state.next_index)
            .ok_or_else(|| AllocatorError::incomplete("arenas.create", Errno::EAGAIN as i32))?;
        state.next_index = state.next_index.wrapping_add(1);
        state.arenas.insert(arena, SimArena::new());
        Ok(arena)
    }

    fn extent_hooks(&self, arena: ArenaIndex) -> AllocatorResult<ExtentHooks> {
        let key = arena.extent_hooks_key();
        if let Some(code) = self.faults.read_hooks {
            return Err(AllocatorError::incomplete(key, code));
        }
        let state = self.state.lock();
        let sim = state
            .arenas
            .get(&arena)
            .ok_or_else(|| AllocatorError::incomplete(&key, Errno::EFAULT as i32))?;
        // SAFETY: see `SimArena::grow`.
        Ok(unsafe { *sim.table() })
    }

    unsafe fn set_extent_hooks(
        &self,
        arena: ArenaIndex,
        hooks: NonNull<ExtentHooks>,
    ) -> AllocatorResult<()> {
        let key = arena.extent_hooks_key();
        if let Some(code) = self.faults.write_hooks {
            return Err(AllocatorError::incomplete(key, code));
        }
        let mut state = self.state.lock();
        let sim = state
            .arenas
            .get_mut(&arena)
            .ok_or_else(|| AllocatorError::incomplete(&key, Errno::EFAULT as i32))?;
        sim.hooks = Some(hooks);
        Ok(())
    }

    fn destroy_arena(&self, arena: ArenaIndex) -> AllocatorResult<()> {
        self.destroy_calls.fetch_add(1, Ordering::Relaxed);
        let key = arena.destroy_key();
        if let Some(code) = self.faults.destroy {
            return Err(AllocatorError::incomplete(key, code));
        }
        let mut state = self.state.lock();
        let mut sim = state
            .arenas
            .remove(&arena)
            .ok_or_else(|| AllocatorError::incomplete(&key, Errno::EFAULT as i32))?;
        state.live.retain(|_, (owner, _)| *owner != arena);
        sim.release_extents(arena);
        drop(state);

        self.destroyed.lock().push(arena);
        Ok(())
    }

    fn allocate(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>> {
        if size > MAX_REQUEST {
            return None;
        }
        let arena = flags.arena()?;
        let class = round_up(size.max(1), QUANTUM);

        let mut state = self.state.lock();
        let addr = state.arenas.get_mut(&arena)?.carve(arena, class)?;
        state.live.insert(addr, (arena, class));
        NonNull::new(addr as *mut u8)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _flags: AllocFlags) {
        let mut state = self.state.lock();
        let addr = ptr.as_ptr() as usize;
        if let Some((arena, class)) = state.live.remove(&addr) {
            if let Some(sim) = state.arenas.get_mut(&arena) {
                sim.free.entry(class).or_default().push(addr);
            }
        }
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.state
            .lock()
            .live
            .get(&(ptr.as_ptr() as usize))
            .map_or(0, |(_, class)| *class)
    }
}

#[inline]
fn round_up(value: usize, to: usize) -> usize {
    (value + to - 1) / to * to
}

/// Ranges marked by [`SimulatedExclusion`], process-wide
static EXCLUDED: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());
static EXCLUDE_CALLS: AtomicUsize = AtomicUsize::new(0);

/// Dump exclusion that records ranges instead of advising the kernel
///
/// Stands in for the kernel's per-mapping dump flag: a range stays excluded
/// until its simulated extent is destroyed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedExclusion;

impl SimulatedExclusion {
    /// Currently excluded `(base, len)` ranges
    pub fn excluded_ranges() -> Vec<(usize, usize)> {
        EXCLUDED.lock().clone()
    }

    /// Whether `addr` falls inside an excluded range
    pub fn is_excluded(addr: usize) -> bool {
        EXCLUDED
            .lock()
            .iter()
            .any(|&(base, len)| addr >= base && addr < base + len)
    }

    /// Total `exclude` calls since process start
    pub fn calls() -> usize {
        EXCLUDE_CALLS.load(Ordering::Relaxed)
    }

    fn forget(base: usize, len: usize) {
        EXCLUDED.lock().retain(|&range| range != (base, len));
    }
}

impl DumpExclusion for SimulatedExclusion {
    const NAME: &'static str = "simulated";

    fn is_supported() -> bool {
        true
    }

    unsafe fn exclude(addr: NonNull<c_void>, len: usize) -> Result<(), Errno> {
        if addr.as_ptr() as usize % SIMULATED_PAGE != 0 {
            return Err(Errno::EINVAL);
        }
        EXCLUDE_CALLS.fetch_add(1, Ordering::Relaxed);
        EXCLUDED.lock().push((addr.as_ptr() as usize, len));
        Ok(())
    }
}
