/*!
 * NoDump Allocator Factory
 *
 * Builds a nodump allocator: creates the arena, saves the arena's original
 * extent alloc hook in the process-wide slot, and installs a copy of the
 * hook table whose alloc entry is the trampoline. The allocator is only
 * returned once the copy is installed.
 */

use super::guard::ArenaGuard;
use super::nodump::NoDumpAllocator;
use super::options::NoDumpOptions;
use super::traits::CacheAllocator;
use crate::core::errors::{AllocatorError, AllocatorResult};
use crate::hooks::{extent_alloc_trampoline, Publication, ORIGINAL_EXTENT_ALLOC};
use crate::monitoring::tracer::OperationSpan;
use crate::platform::traits::{ArenaControl, DumpExclusion};
use crate::platform::{JemallocControl, MadviseDontDump};
use nix::errno::Errno;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{error, info};

/// Build the production allocator: jemalloc arena, `madvise(MADV_DONTDUMP)`
pub fn new_nodump_allocator(options: NoDumpOptions) -> AllocatorResult<Arc<dyn CacheAllocator>> {
    let allocator = NoDumpAllocator::<JemallocControl, MadviseDontDump>::with_control(
        JemallocControl::new(),
        options,
    )?;
    Ok(Arc::new(allocator))
}

/// Whether [`new_nodump_allocator`] can work in this process
///
/// `NotSupported` names the missing capability.
pub fn is_supported() -> AllocatorResult<()> {
    check_support::<_, MadviseDontDump>(&JemallocControl::new())
}

fn check_support<C: ArenaControl, P: DumpExclusion>(control: &C) -> AllocatorResult<()> {
    control.is_supported()?;
    if !P::is_supported() {
        return Err(AllocatorError::NotSupported(format!(
            "{} is not available on {}",
            P::NAME,
            std::env::consts::OS
        )));
    }
    Ok(())
}

impl<C: ArenaControl, P: DumpExclusion> NoDumpAllocator<C, P> {
    /// Build an allocator on an explicit arena control
    ///
    /// On failure after the arena was created, the arena is destroyed again
    /// before the error is returned.
    pub fn with_control(control: C, options: NoDumpOptions) -> AllocatorResult<Self> {
        options.validate()?;
        check_support::<C, P>(&control)?;

        let span = OperationSpan::new("create_nodump_allocator");
        let _entered = span.enter();

        let arena = control.create_arena().inspect_err(|e| {
            span.fail(e);
            options.log(|| {
                error!(label = %options.label, code = e.code(), "Failed to create arena: {}", e);
            });
        })?;
        span.record_arena(arena);

        let guard = ArenaGuard::new(&control, arena, &options);
        let flags = control.flags_for(guard.arena());

        let original = control.extent_hooks(arena).inspect_err(|e| {
            span.fail(e);
            options.log(|| {
                error!(
                    label = %options.label,
                    arena = %arena,
                    code = e.code(),
                    "Failed to read extent hooks: {}",
                    e
                );
            });
        })?;
        let Some(original_alloc) = original.alloc else {
            let err = AllocatorError::incomplete(arena.extent_hooks_key(), Errno::EINVAL as i32);
            span.fail(&err);
            options.log(|| {
                error!(label = %options.label, arena = %arena, "arena has no extent alloc hook");
            });
            return Err(err);
        };

        let publication = ORIGINAL_EXTENT_ALLOC.publish(original_alloc);
        match publication {
            Publication::Installed => options.log(|| {
                info!(
                    label = %options.label,
                    arena = %arena,
                    hook = ?(original_alloc as *const c_void),
                    "saved original extent alloc hook"
                );
            }),
            Publication::Matched => {}
            Publication::Diverged { saved } => options.log(|| {
                error!(
                    label = %options.label,
                    arena = %arena,
                    saved = ?(saved as *const c_void),
                    observed = ?(original_alloc as *const c_void),
                    "arena reports a different original extent alloc hook than the one saved"
                );
            }),
        }
        // Every trampoline forwards to the saved hook, whichever arena it serves
        debug_assert!(
            publication.is_consistent(),
            "arena {} original extent alloc hook differs from the saved one: {:?}",
            arena,
            publication
        );

        let mut hooks = Box::new(original.with_alloc(extent_alloc_trampoline::<P>));
        // SAFETY: the box moves into the allocator, which destroys the arena
        // before dropping it; moving a Box does not move its contents.
        unsafe { control.set_extent_hooks(arena, NonNull::from(&mut *hooks)) }.inspect_err(
            |e| {
                span.fail(e);
                options.log(|| {
                    error!(
                        label = %options.label,
                        arena = %arena,
                        code = e.code(),
                        "Failed to set extent hooks: {}",
                        e
                    );
                });
            },
        )?;

        let arena = guard.disarm();
        span.succeed();
        options.log(|| {
            info!(
                label = %options.label,
                arena = %arena,
                allocator = C::ALLOCATOR_NAME,
                exclusion = P::NAME,
                "nodump allocator ready"
            );
        });

        Ok(NoDumpAllocator::from_parts(arena, flags, control, hooks, options))
    }
}
