/*!
 * Saved Original Hook
 * Process-wide, write-once cell holding the extent allocation hook that
 * existed before any nodump arena replaced it
 */

use crate::core::types::ExtentAllocFn;
use std::ffi::c_void;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// The slot every installed trampoline reads
///
/// Set by the first successful publication in the process and never cleared.
pub static ORIGINAL_EXTENT_ALLOC: HookSlot = HookSlot::new();

/// Outcome of publishing a hook into a [`HookSlot`]
#[derive(Clone, Copy)]
pub enum Publication {
    /// The slot was empty and now holds the hook
    Installed,
    /// The slot already held this same hook
    Matched,
    /// The slot holds a different hook; it was left untouched
    Diverged { saved: ExtentAllocFn },
}

impl Publication {
    /// Whether the slot agrees with the published hook
    pub fn is_consistent(&self) -> bool {
        !matches!(self, Publication::Diverged { .. })
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Publication::Installed => write!(f, "Installed"),
            Publication::Matched => write!(f, "Matched"),
            Publication::Diverged { saved } => f
                .debug_struct("Diverged")
                .field("saved", &(*saved as *const c_void))
                .finish(),
        }
    }
}

/// First-writer-wins atomic cell for an extent allocation hook
pub struct HookSlot {
    hook: AtomicPtr<c_void>,
}

impl HookSlot {
    pub const fn new() -> Self {
        Self {
            hook: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Publish `hook` if the slot is still empty
    ///
    /// Never overwrites a saved hook. Lock-free.
    pub fn publish(&self, hook: ExtentAllocFn) -> Publication {
        let candidate = hook as *mut c_void;
        match self.hook.compare_exchange(
            ptr::null_mut(),
            candidate,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Publication::Installed,
            Err(existing) if existing == candidate => Publication::Matched,
            Err(existing) => Publication::Diverged {
                // SAFETY: only `publish` stores into the slot, and it only stores
                // values obtained from an `ExtentAllocFn`.
                saved: unsafe { Self::as_hook(existing) },
            },
        }
    }

    /// Saved hook, if one has been published
    #[inline]
    pub fn load(&self) -> Option<ExtentAllocFn> {
        let raw = self.hook.load(Ordering::Acquire);
        if raw.is_null() {
            None
        } else {
            // SAFETY: non-null values in the slot always come from `publish`.
            Some(unsafe { Self::as_hook(raw) })
        }
    }

    /// Whether the slot currently holds exactly `hook`
    pub fn holds(&self, hook: ExtentAllocFn) -> bool {
        self.hook.load(Ordering::Acquire) == hook as *mut c_void
    }

    #[inline]
    unsafe fn as_hook(raw: *mut c_void) -> ExtentAllocFn {
        std::mem::transmute::<*mut c_void, ExtentAllocFn>(raw)
    }
}

impl Default for HookSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSlot")
            .field("hook", &self.hook.load(Ordering::Acquire))
            .finish()
    }
}
