//! Usage accounting: extraction, run summarization and per-run markers.

pub mod extract;
pub mod state;
pub mod summarize;

pub use extract::{extract_usage, sum_detail};
pub use state::{RunMarkers, RunStateTable};
pub use summarize::{summarize_ledger, summarize_responses, RunSummarizer};
