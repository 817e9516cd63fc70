//! Token usage types: raw call usage as delivered by the runtime, and the
//! normalized per-call and per-run records derived from it.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One breakdown record inside a details field (e.g. `{"cached_tokens": 12}`).
pub type DetailRecord = Map<String, Value>;

/// Usage counters for a single inference call, as reported by the runtime.
///
/// Deserialization is lenient: counters that are missing, null, negative,
/// non-numeric or non-finite become 0, fractional counters truncate, and
/// detail fields accept either a lone record or a list of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUsage {
    #[serde(default, alias = "input_tokens", deserialize_with = "lenient_count")]
    pub input_tokens: u64,
    #[serde(default, alias = "output_tokens", deserialize_with = "lenient_count")]
    pub output_tokens: u64,
    #[serde(default, alias = "total_tokens", deserialize_with = "lenient_count")]
    pub total_tokens: u64,
    #[serde(
        default,
        alias = "input_tokens_details",
        deserialize_with = "detail_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub input_tokens_details: Vec<DetailRecord>,
    #[serde(
        default,
        alias = "output_tokens_details",
        deserialize_with = "detail_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub output_tokens_details: Vec<DetailRecord>,
    /// Set on ledger entries that were backfilled from a raw response.
    #[serde(default, alias = "response_id", skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl CallUsage {
    pub fn new(input_tokens: u64, output_tokens: u64, total_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
            ..Default::default()
        }
    }

    /// Append an input detail record carrying `cached_tokens`.
    pub fn with_cached_tokens(mut self, cached: u64) -> Self {
        self.input_tokens_details
            .push(detail_record("cached_tokens", cached));
        self
    }

    /// Append an output detail record carrying `reasoning_tokens`.
    pub fn with_reasoning_tokens(mut self, reasoning: u64) -> Self {
        self.output_tokens_details
            .push(detail_record("reasoning_tokens", reasoning));
        self
    }
}

fn detail_record(key: &str, value: u64) -> DetailRecord {
    let mut record = Map::new();
    record.insert(key.to_string(), Value::from(value));
    record
}

/// One raw model response captured while streaming.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResponse {
    #[serde(default, alias = "response_id", skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default)]
    pub usage: CallUsage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<Value>,
}

impl RawResponse {
    pub fn new(response_id: impl Into<String>, usage: CallUsage) -> Self {
        Self {
            response_id: Some(response_id.into()),
            usage,
            output: Vec::new(),
        }
    }
}

/// Coerce an arbitrary JSON value to a token count.
pub fn coerce_count(value: &Value) -> u64 {
    let Value::Number(number) = value else {
        return 0;
    };
    if let Some(n) = number.as_u64() {
        return n;
    }
    match number.as_f64() {
        Some(f) if f.is_finite() && f > 0.0 => f as u64,
        _ => 0,
    }
}

/// Normalize a details value to a list of records.
pub fn normalize_details(value: Option<Value>) -> Vec<DetailRecord> {
    match value {
        Some(Value::Object(record)) => vec![record],
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(record) => Some(record),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(coerce_count).unwrap_or(0))
}

fn detail_list<'de, D>(deserializer: D) -> Result<Vec<DetailRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(normalize_details(value))
}

/// Normalized usage for one inference call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub request_index: u64,
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub total_input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    /// Provider-reported total; may exclude cached tokens.
    pub total_tokens: u64,
    pub total_tokens_including_cached: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

/// Usage for a whole run, summed over every contributing call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunUsageSummary {
    pub requests: u64,
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub total_input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_tokens_including_cached: u64,
    pub reasoning_tokens: u64,
    pub per_request: Vec<UsageRecord>,
}

impl RunUsageSummary {
    /// Build a summary from records in order, numbering them from 1.
    pub fn from_records(records: impl IntoIterator<Item = UsageRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.absorb(record);
        }
        summary
    }

    /// Add one call, assigning it the next request index.
    pub fn absorb(&mut self, mut record: UsageRecord) {
        self.add_scalars(&record);
        self.requests += 1;
        record.request_index = self.requests;
        self.per_request.push(record);
    }

    /// Append `other` after `self`: per-request entries are renumbered to
    /// continue this summary's sequence and every scalar is summed.
    pub fn merge(mut self, other: RunUsageSummary) -> Self {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.cached_input_tokens = self
            .cached_input_tokens
            .saturating_add(other.cached_input_tokens);
        self.total_input_tokens = self
            .total_input_tokens
            .saturating_add(other.total_input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.total_tokens_including_cached = self
            .total_tokens_including_cached
            .saturating_add(other.total_tokens_including_cached);
        self.reasoning_tokens = self.reasoning_tokens.saturating_add(other.reasoning_tokens);

        let offset = self.per_request.len() as u64;
        self.per_request
            .extend(other.per_request.into_iter().enumerate().map(|(i, mut record)| {
                record.request_index = offset + i as u64 + 1;
                record
            }));
        self.requests = self.per_request.len() as u64;
        self
    }

    fn add_scalars(&mut self, record: &UsageRecord) {
        self.input_tokens = self.input_tokens.saturating_add(record.input_tokens);
        self.cached_input_tokens = self
            .cached_input_tokens
            .saturating_add(record.cached_input_tokens);
        self.total_input_tokens = self
            .total_input_tokens
            .saturating_add(record.total_input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(record.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(record.total_tokens);
        self.total_tokens_including_cached = self
            .total_tokens_including_cached
            .saturating_add(record.total_tokens_including_cached);
        self.reasoning_tokens = self.reasoning_tokens.saturating_add(record.reasoning_tokens);
    }
}

impl fmt::Display for RunUsageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={} input={} cached={} output={} reasoning={} total={} total_incl_cached={}",
            self.requests,
            self.input_tokens,
            self.cached_input_tokens,
            self.output_tokens,
            self.reasoning_tokens,
            self.total_tokens,
            self.total_tokens_including_cached,
        )
    }
}
