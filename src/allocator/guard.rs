/*!
 * Arena Guard
 *
 * RAII guard for an arena that is still being set up. Dropping an armed
 * guard destroys the arena, so a construction that fails half way does not
 * leave the arena behind.
 */

use super::options::NoDumpOptions;
use crate::core::types::ArenaIndex;
use crate::platform::traits::ArenaControl;
use tracing::{error, warn};

/// Scoped ownership of a freshly created arena
pub(crate) struct ArenaGuard<'a, C: ArenaControl> {
    control: &'a C,
    arena: ArenaIndex,
    options: &'a NoDumpOptions,
    armed: bool,
}

impl<'a, C: ArenaControl> ArenaGuard<'a, C> {
    pub(crate) fn new(control: &'a C, arena: ArenaIndex, options: &'a NoDumpOptions) -> Self {
        Self {
            control,
            arena,
            options,
            armed: true,
        }
    }

    #[inline]
    pub(crate) fn arena(&self) -> ArenaIndex {
        self.arena
    }

    /// Hand the arena over to its long-term owner
    pub(crate) fn disarm(mut self) -> ArenaIndex {
        self.armed = false;
        self.arena
    }
}

impl<C: ArenaControl> Drop for ArenaGuard<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let arena = self.arena;
        let label = self.options.label.as_str();
        self.options.log(|| {
            warn!(label, arena = %arena, "destroying arena after failed setup");
        });
        if let Err(e) = self.control.destroy_arena(arena) {
            self.options.log(|| {
                error!(
                    label,
                    arena = %arena,
                    code = e.code(),
                    "failed to destroy arena after failed setup: {}",
                    e
                );
            });
        }
    }
}
