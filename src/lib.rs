//! turnmeter — token usage accounting for agent runs
//!
//! Turns the provider usage reported during a run (a ledger of per-call
//! usage, plus the raw streamed responses when the run streamed) into one
//! normalized [`RunUsageSummary`](types::RunUsageSummary). Optionally writes
//! a trace dump per run and keeps a per-conversation rollup on disk; both
//! happen on a background worker so summarizing never blocks on I/O.
//!
//! # Quick Start
//!
//! ```no_run
//! use turnmeter::prelude::*;
//!
//! # async fn example() -> turnmeter::error::Result<()> {
//! let meter = UsageMeter::new(MeterConfig::from_env());
//! let mut run = RunResult::streaming(
//!     vec![CallUsage::new(100, 20, 120).with_cached_tokens(10)],
//!     vec![RawResponse::new("r1", CallUsage::new(50, 5, 55))],
//! );
//! let summary = meter.summarize(&mut run, &TurnContext::new("chat-42"));
//! println!("{summary}");
//! meter.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod meter;
pub mod prelude;
pub mod rollup;
pub mod trace;
pub mod types;
pub mod usage;
pub mod util;
