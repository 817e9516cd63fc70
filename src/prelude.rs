//! Convenience re-exports for common use.

pub use crate::config::MeterConfig;
pub use crate::error::{MeterError, Result};
pub use crate::meter::UsageMeter;
pub use crate::types::{
    CallUsage, RawResponse, RunDelivery, RunId, RunMode, RunResult, RunUsageSummary, TurnContext,
    UsageRecord,
};
