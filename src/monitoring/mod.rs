/*!
 * Monitoring Module
 * Tracing setup and dump-exclusion inspection
 */

pub mod smaps;
pub mod tracer;

pub use smaps::{is_dump_excluded, mapping_for, parse_smaps, Mapping};
pub use tracer::{init_tracing, OperationSpan};
