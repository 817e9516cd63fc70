//! Normalizing raw call usage into [`UsageRecord`]s.

use crate::types::{coerce_count, CallUsage, DetailRecord, UsageRecord};

/// Detail key holding cached input tokens.
pub const CACHED_TOKENS_KEY: &str = "cached_tokens";
/// Detail key holding reasoning output tokens.
pub const REASONING_TOKENS_KEY: &str = "reasoning_tokens";

/// Sum `key` across detail records. Records where the property is missing
/// or not a usable number contribute 0.
pub fn sum_detail(details: &[DetailRecord], key: &str) -> u64 {
    details
        .iter()
        .filter_map(|record| record.get(key))
        .map(coerce_count)
        .fold(0u64, u64::saturating_add)
}

/// Extract one call's usage. The request index is left at 0 for the
/// summary to assign.
pub fn extract_usage(usage: &CallUsage, response_id: Option<&str>) -> UsageRecord {
    let cached_input_tokens = sum_detail(&usage.input_tokens_details, CACHED_TOKENS_KEY);
    let reasoning_tokens = sum_detail(&usage.output_tokens_details, REASONING_TOKENS_KEY);
    let total_input_tokens = usage.input_tokens.saturating_add(cached_input_tokens);

    UsageRecord {
        request_index: 0,
        input_tokens: usage.input_tokens,
        cached_input_tokens,
        total_input_tokens,
        output_tokens: usage.output_tokens,
        reasoning_tokens,
        total_tokens: usage.total_tokens,
        total_tokens_including_cached: total_input_tokens.saturating_add(usage.output_tokens),
        response_id: response_id.map(str::to_string),
    }
}
