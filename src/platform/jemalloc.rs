/*!
 * jemalloc Arena Control
 * mallctl-driven arena lifecycle and arena-scoped mallocx/dallocx
 */

use super::traits::ArenaControl;
use crate::core::errors::{AllocatorError, AllocatorResult};
use crate::core::types::{AllocFlags, ArenaIndex, ExtentHooks};
use nix::errno::Errno;
use std::ffi::{c_char, c_void, CStr, CString};
use std::mem;
use std::ptr::{self, NonNull};

/// Oldest jemalloc major version with `arena.<i>.extent_hooks`
const MIN_MAJOR_VERSION: u32 = 5;

/// Arena control backed by the jemalloc linked through `tikv-jemalloc-sys`
#[derive(Debug, Clone, Copy, Default)]
pub struct JemallocControl;

impl JemallocControl {
    pub fn new() -> Self {
        Self
    }

    /// Version string of the linked jemalloc, e.g. `5.3.0-0-g54eaed1d...`
    pub fn version(&self) -> AllocatorResult<String> {
        let raw: *const c_char = unsafe { read("version") }
            .map_err(|code| AllocatorError::incomplete("version", code))?;
        if raw.is_null() {
            return Err(AllocatorError::incomplete("version", Errno::EINVAL as i32));
        }
        // SAFETY: jemalloc's version control is a static NUL-terminated string.
        let version = unsafe { CStr::from_ptr(raw) };
        Ok(version.to_string_lossy().into_owned())
    }
}

fn major_version(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

impl ArenaControl for JemallocControl {
    const ALLOCATOR_NAME: &'static str = "JemallocNodumpAllocator";

    fn is_supported(&self) -> AllocatorResult<()> {
        if !ffi::AVAILABLE {
            return Err(AllocatorError::NotSupported(
                "jemalloc is not linked on this target".into(),
            ));
        }

        let version = self.version().map_err(|e| {
            AllocatorError::NotSupported(format!("cannot read jemalloc version: {}", e))
        })?;
        match major_version(&version) {
            Some(major) if major >= MIN_MAJOR_VERSION => Ok(()),
            _ => Err(AllocatorError::NotSupported(format!(
                "jemalloc {} has no extent hooks, version >= {} required",
                version, MIN_MAJOR_VERSION
            ))),
        }
    }

    fn create_arena(&self) -> AllocatorResult<ArenaIndex> {
        let raw: u32 = unsafe { read("arenas.create") }
            .map_err(|code| AllocatorError::incomplete("arenas.create", code))?;
        ArenaIndex::new(raw)
            .ok_or_else(|| AllocatorError::incomplete("arenas.create", Errno::EINVAL as i32))
    }

    fn extent_hooks(&self, arena: ArenaIndex) -> AllocatorResult<ExtentHooks> {
        let key = arena.extent_hooks_key();
        let table: *mut ExtentHooks =
            unsafe { read(&key) }.map_err(|code| AllocatorError::incomplete(&key, code))?;
        if table.is_null() {
            return Err(AllocatorError::incomplete(key, Errno::EINVAL as i32));
        }
        // SAFETY: jemalloc returned the arena's live hook table.
        Ok(unsafe { *table })
    }

    unsafe fn set_extent_hooks(
        &self,
        arena: ArenaIndex,
        hooks: NonNull<ExtentHooks>,
    ) -> AllocatorResult<()> {
        let key = arena.extent_hooks_key();
        write(&key, hooks.as_ptr()).map_err(|code| AllocatorError::incomplete(key, code))
    }

    fn destroy_arena(&self, arena: ArenaIndex) -> AllocatorResult<()> {
        let key = arena.destroy_key();
        unsafe { invoke(&key) }.map_err(|code| AllocatorError::incomplete(key, code))
    }

    fn allocate(&self, size: usize, flags: AllocFlags) -> Option<NonNull<u8>> {
        // mallocx leaves zero-sized requests undefined
        let size = size.max(1);
        NonNull::new(unsafe { ffi::mallocx(size, flags.raw()) }.cast::<u8>())
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, flags: AllocFlags) {
        ffi::dallocx(ptr.as_ptr().cast::<c_void>(), flags.raw())
    }

    unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        ffi::malloc_usable_size(ptr.as_ptr().cast::<c_void>())
    }
}

fn control_key(key: &str) -> Result<CString, i32> {
    CString::new(key).map_err(|_| Errno::EINVAL as i32)
}

/// Read a control value of type `T`
unsafe fn read<T: Copy>(key: &str) -> Result<T, i32> {
    let name = control_key(key)?;
    let mut value = mem::MaybeUninit::<T>::uninit();
    let mut len = mem::size_of::<T>();
    let ret = ffi::mallctl(
        name.as_ptr(),
        value.as_mut_ptr().cast::<c_void>(),
        &mut len,
        ptr::null_mut(),
        0,
    );
    if ret != 0 {
        return Err(ret);
    }
    if len != mem::size_of::<T>() {
        return Err(Errno::EINVAL as i32);
    }
    Ok(value.assume_init())
}

/// Write a control value of type `T`
unsafe fn write<T>(key: &str, mut value: T) -> Result<(), i32> {
    let name = control_key(key)?;
    let ret = ffi::mallctl(
        name.as_ptr(),
        ptr::null_mut(),
        ptr::null_mut(),
        (&mut value as *mut T).cast::<c_void>(),
        mem::size_of::<T>(),
    );
    if ret != 0 {
        Err(ret)
    } else {
        Ok(())
    }
}

/// Trigger a control that neither reads nor writes a value
unsafe fn invoke(key: &str) -> Result<(), i32> {
    let name = control_key(key)?;
    let ret = ffi::mallctl(
        name.as_ptr(),
        ptr::null_mut(),
        ptr::null_mut(),
        ptr::null_mut(),
        0,
    );
    if ret != 0 {
        Err(ret)
    } else {
        Ok(())
    }
}

#[cfg(not(target_env = "msvc"))]
mod ffi {
    pub(super) const AVAILABLE: bool = true;
    pub(super) use tikv_jemalloc_sys::{dallocx, malloc_usable_size, mallctl, mallocx};
}

#[cfg(target_env = "msvc")]
mod ffi {
    use nix::errno::Errno;
    use std::ffi::{c_char, c_int, c_void};
    use std::ptr;

    pub(super) const AVAILABLE: bool = false;

    pub(super) unsafe fn mallctl(
        _name: *const c_char,
        _oldp: *mut c_void,
        _oldlenp: *mut usize,
        _newp: *mut c_void,
        _newlen: usize,
    ) -> c_int {
        Errno::ENOSYS as c_int
    }

    pub(super) unsafe fn mallocx(_size: usize, _flags: c_int) -> *mut c_void {
        ptr::null_mut()
    }

    pub(super) unsafe fn dallocx(_ptr: *mut c_void, _flags: c_int) {}

    pub(super) unsafe fn malloc_usable_size(_ptr: *const c_void) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_version_parsing() {
        assert_eq!(major_version("5.3.0-0-g54eaed1d8b56b1aa528be3bdd1877e59c56fa90c"), Some(5));
        assert_eq!(major_version("4.5.0"), Some(4));
        assert_eq!(major_version("garbage"), None);
        assert_eq!(major_version(""), None);
    }

    #[test]
    fn test_control_key_rejects_interior_nul() {
        assert_eq!(control_key("arena.1\0.destroy"), Err(Errno::EINVAL as i32));
        assert!(control_key("arenas.create").is_ok());
    }

    #[cfg(not(target_env = "msvc"))]
    #[test]
    fn test_linked_jemalloc_is_supported() {
        let control = JemallocControl::new();
        let version = control.version().unwrap();
        assert!(major_version(&version).unwrap() >= MIN_MAJOR_VERSION);
        assert!(control.is_supported().is_ok());
    }

    #[cfg(not(target_env = "msvc"))]
    #[test]
    fn test_arena_round_trip_without_hooks() {
        let control = JemallocControl::new();
        let arena = control.create_arena().unwrap();
        let flags = control.flags_for(arena);

        let hooks = control.extent_hooks(arena).unwrap();
        assert!(hooks.alloc.is_some());

        let ptr = control.allocate(100, flags).unwrap();
        assert!(unsafe { control.usable_size(ptr) } >= 100);
        unsafe { control.deallocate(ptr, flags) };

        control.destroy_arena(arena).unwrap();
    }
}
