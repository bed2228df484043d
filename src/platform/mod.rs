/*!
 * Platform Module
 * Underlying allocator and page-exclusion backends
 */

mod jemalloc;
mod madvise;
mod simulation;
pub mod traits;

pub use jemalloc::JemallocControl;
pub use madvise::MadviseDontDump;
pub use simulation::{
    simulated_extent_alloc, simulated_extent_destroy, SimulatedArenas, SimulatedExclusion,
    SimulatedFaults, SIMULATED_EXTENT_SIZE, SIMULATED_PAGE,
};
pub use traits::*;
