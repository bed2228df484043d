/*!
 * Extent Hook Trampoline
 * The `alloc` entry installed into nodump arenas
 *
 * jemalloc passes no user context to extent hooks, so the trampoline is a
 * free function: it reads the saved original hook from the process-wide
 * slot, forwards the call, and marks whatever memory comes back.
 *
 * Marking failures are reported on the dispatcher current on the thread that
 * grew the arena, not through an allocator's `info_log` sink: the hook has no
 * way to find the instance. When that dispatcher is the no-op one, the
 * report goes to stderr.
 */

use super::slot::{HookSlot, ORIGINAL_EXTENT_ALLOC};
use crate::core::types::ExtentHooks;
use crate::platform::traits::DumpExclusion;
use std::ffi::{c_uint, c_void};
use std::ptr::NonNull;
use tracing::error;

/// Extent allocation hook installed into every nodump arena
///
/// One instance exists per dump-exclusion strategy `P`.
///
/// # Safety
///
/// Only the underlying allocator calls this, with the arguments of its
/// `extent_alloc_t` contract.
pub unsafe extern "C" fn extent_alloc_trampoline<P: DumpExclusion>(
    extent_hooks: *mut ExtentHooks,
    new_addr: *mut c_void,
    size: usize,
    alignment: usize,
    zero: *mut bool,
    commit: *mut bool,
    arena_ind: c_uint,
) -> *mut c_void {
    route_extent_alloc::<P>(
        &ORIGINAL_EXTENT_ALLOC,
        extent_hooks,
        new_addr,
        size,
        alignment,
        zero,
        commit,
        arena_ind,
    )
}

/// Forward an extent request to the hook saved in `slot`, then mark the result
///
/// A null result is passed through untouched. An empty slot aborts the
/// process: the trampoline can only be installed after publication.
///
/// # Safety
///
/// Same contract as [`extent_alloc_trampoline`].
#[allow(clippy::too_many_arguments)]
pub unsafe fn route_extent_alloc<P: DumpExclusion>(
    slot: &HookSlot,
    extent_hooks: *mut ExtentHooks,
    new_addr: *mut c_void,
    size: usize,
    alignment: usize,
    zero: *mut bool,
    commit: *mut bool,
    arena_ind: c_uint,
) -> *mut c_void {
    let Some(original) = slot.load() else {
        eprintln!(
            "nodump allocator: extent hook for arena {} ran before the original hook was saved",
            arena_ind
        );
        std::process::abort();
    };

    let result = original(extent_hooks, new_addr, size, alignment, zero, commit, arena_ind);
    if let Some(region) = NonNull::new(result) {
        mark_excluded::<P>(region, size, arena_ind);
    }
    result
}

fn mark_excluded<P: DumpExclusion>(region: NonNull<c_void>, size: usize, arena_ind: c_uint) {
    if size == 0 {
        return;
    }
    // SAFETY: the original hook just returned this extent.
    if let Err(errno) = unsafe { P::exclude(region, size) } {
        error!(
            arena = arena_ind,
            addr = ?region.as_ptr(),
            size,
            errno = %errno,
            exclusion = P::NAME,
            "failed to exclude extent from core dumps"
        );
        if diagnostics_unobserved() {
            eprintln!(
                "nodump allocator: failed to set {} on {:p}+{}, error code: {}",
                P::NAME,
                region.as_ptr(),
                size,
                errno as i32
            );
        }
        debug_assert!(
            !P::FATAL_ON_FAILURE,
            "extent {:p}+{} is not excluded from core dumps: {}",
            region.as_ptr(),
            size,
            errno
        );
    }
}

/// Whether events emitted here would reach no subscriber at all
fn diagnostics_unobserved() -> bool {
    tracing::dispatcher::get_default(|dispatch| {
        dispatch.is::<tracing::subscriber::NoSubscriber>()
    })
}
