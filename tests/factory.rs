/*!
 * Factory Tests
 * Construction ordering and failure handling with scripted arena controls
 */

use nodump_alloc::core::types::{AllocFlags, ArenaIndex, ExtentHooks};
use nodump_alloc::platform::{SimulatedArenas, SimulatedExclusion, SimulatedFaults};
use nodump_alloc::{
    AllocatorError, AllocatorResult, ArenaControl, CacheAllocator, NoDumpAllocator,
    NoDumpOptions,
};
use nix::errno::Errno;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::ptr::NonNull;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    Create,
    ReadHooks(ArenaIndex),
    WriteHooks(ArenaIndex),
    Destroy(ArenaIndex),
    Allocate,
}

/// Simulated arenas that record every control call and can misbehave
#[derive(Default)]
struct ScriptedControl {
    inner: SimulatedArenas,
    calls: Mutex<Vec<Call>>,
    unsupported: bool,
    strip_alloc_hook: bool,
}

impl ScriptedControl {
    fn with_faults(faults: SimulatedFaults) -> Self {
        Self {
            inner: SimulatedArenas::with_faults(faults),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn destroys(&self) -> Vec<ArenaIndex> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Destroy(arena) => Some(arena),
                _ => None,
            })
            .collect()
    }
}

impl ArenaControl for ScriptedControl {
    const ALLOCATOR_NAME: &'static str = "ScriptedNodumpAllocator";

    fn is_supported(&self) -> AllocatorResult<()> {
        if self.unsupported {
            return Err(AllocatorError::NotSupported("scripted: no arenas".into()));
        }
        self.inner.is_supported()
    }

    fn create_arena(&self) -> AllocatorResult<ArenaIndex> {
        self.record(Call::Create);
        self.inner.create_arena()
    }

    fn extent_hooks(&self, arena: ArenaIndex) -> AllocatorResult<ExtentHooks> {
        self.record(Call::ReadHooks(arena));
        let mut hooks = self.inner.extent_hooks(arena)?;
        if self.strip_alloc_hook {
            hooks.alloc = None;
        }
        Ok(hooks)
    }

    unsafe fn set_extent_hooks(
        &self,
        arena: ArenaIndex,
        hooks: NonNull<ExtentHooks>,
    ) -> AllocatorResult<()> {
        self.record(Call::WriteHooks(arena));
        self.inner.set_extent_hooks(arena, hooks)
    }

    fn destroy_arena(&self, arena: ArenaIndex) -> AllocatorResult<()> {
        self.record(Call::Destroy(arena));
        self.inner.destroy_arena(arena)
    }

    fn allocate(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>> {
        self.record(Call::Allocate);
        self.inner.allocate(size, flags)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, flags: AllocFlags) {
        self.inner.deallocate(ptr, flags)
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.inner.usable_size(ptr)
    }
}

type Scripted = NoDumpAllocator<Arc<ScriptedControl>, SimulatedExclusion>;

fn construct(control: &Arc<ScriptedControl>) -> AllocatorResult<Scripted> {
    Scripted::with_control(Arc::clone(control), NoDumpOptions::default())
}

#[test]
fn test_hooks_installed_before_first_allocation() {
    let control = Arc::new(ScriptedControl::default());
    let allocator = construct(&control).unwrap();
    let arena = allocator.arena();

    let ptr = allocator.allocate(512).unwrap();
    unsafe { allocator.deallocate(ptr) };
    drop(allocator);

    assert_eq!(
        control.calls(),
        vec![
            Call::Create,
            Call::ReadHooks(arena),
            Call::WriteHooks(arena),
            Call::Allocate,
            Call::Destroy(arena),
        ]
    );
}

#[test]
fn test_name_comes_from_control() {
    let control = Arc::new(ScriptedControl::default());
    let allocator: Arc<dyn CacheAllocator> = Arc::new(construct(&control).unwrap());
    assert_eq!(allocator.name(), "ScriptedNodumpAllocator");
}

#[test]
fn test_create_failure_produces_no_instance() {
    let control = Arc::new(ScriptedControl::with_faults(SimulatedFaults {
        create: Some(Errno::EAGAIN as i32),
        ..Default::default()
    }));

    let err = construct(&control).unwrap_err();

    assert_eq!(
        err,
        AllocatorError::Incomplete {
            op: "arenas.create".into(),
            code: Errno::EAGAIN as i32,
        }
    );
    assert_eq!(control.calls(), vec![Call::Create]);
}

#[test]
fn test_hook_read_failure_releases_arena() {
    let control = Arc::new(ScriptedControl::with_faults(SimulatedFaults {
        read_hooks: Some(Errno::ENOENT as i32),
        ..Default::default()
    }));

    let err = construct(&control).unwrap_err();

    let arena = control.destroys()[0];
    assert_eq!(
        control.calls(),
        vec![Call::Create, Call::ReadHooks(arena), Call::Destroy(arena)]
    );
    assert_eq!(
        err,
        AllocatorError::incomplete(arena.extent_hooks_key(), Errno::ENOENT as i32)
    );
    assert!(control.inner.live_arenas().is_empty());
}

#[test]
fn test_hook_write_failure_releases_arena() {
    let control = Arc::new(ScriptedControl::with_faults(SimulatedFaults {
        write_hooks: Some(Errno::EPERM as i32),
        ..Default::default()
    }));

    let err = construct(&control).unwrap_err();

    assert_eq!(err.code(), Some(Errno::EPERM as i32));
    let arena = control.destroys()[0];
    assert_eq!(
        control.calls(),
        vec![
            Call::Create,
            Call::ReadHooks(arena),
            Call::WriteHooks(arena),
            Call::Destroy(arena),
        ]
    );
    assert!(control.inner.live_arenas().is_empty());
}

#[test]
fn test_missing_alloc_hook_is_incomplete() {
    let control = Arc::new(ScriptedControl {
        strip_alloc_hook: true,
        ..Default::default()
    });

    let err = construct(&control).unwrap_err();

    let destroyed = control.destroys();
    assert_eq!(destroyed.len(), 1);
    assert_eq!(
        err,
        AllocatorError::incomplete(destroyed[0].extent_hooks_key(), Errno::EINVAL as i32)
    );
    assert!(!control.calls().iter().any(|c| matches!(c, Call::WriteHooks(_))));
}

#[test]
fn test_unsupported_control_never_creates_arena() {
    let control = Arc::new(ScriptedControl {
        unsupported: true,
        ..Default::default()
    });

    let err = construct(&control).unwrap_err();

    assert!(err.is_not_supported());
    assert!(control.calls().is_empty());
}

#[test]
fn test_invalid_options_never_create_arena() {
    let control = Arc::new(ScriptedControl::default());

    for label in ["", "two words", "line\nbreak"] {
        let err = Scripted::with_control(
            Arc::clone(&control),
            NoDumpOptions::new().with_label(label),
        )
        .unwrap_err();
        assert!(matches!(err, AllocatorError::InvalidArgument(_)));
    }
    assert!(control.calls().is_empty());
}

#[test]
fn test_destroy_failure_still_drops_instance() {
    let control = Arc::new(ScriptedControl::with_faults(SimulatedFaults {
        destroy: Some(Errno::EBUSY as i32),
        ..Default::default()
    }));
    let allocator = construct(&control).unwrap();
    let arena = allocator.arena();

    drop(allocator);

    assert_eq!(control.destroys(), vec![arena]);
    assert_eq!(control.inner.live_arenas(), vec![arena]);
}
