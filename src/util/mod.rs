//! Utility modules: path sanitization, atomic file writes.

pub mod fs;
pub mod sanitize;

pub use fs::atomic_write;
pub use sanitize::{conversation_dir, sanitize_path_component};
