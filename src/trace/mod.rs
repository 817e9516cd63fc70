//! Per-run trace dumps and the serializer that keeps them writable.

pub mod dump;
pub mod snapshot;

pub use dump::{trace_file_name, TraceDump, TraceDumpRecord};
pub use snapshot::to_safe_value;
