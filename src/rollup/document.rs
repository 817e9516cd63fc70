//! On-disk schema of the per-conversation usage rollup.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::types::usage::lenient_count;
use crate::types::{RunId, RunUsageSummary};

/// Current rollup document version.
pub const ROLLUP_VERSION: u32 = 1;

/// Scalar usage for one turn. Counters read leniently so a hand-edited
/// document still loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnUsage {
    #[serde(deserialize_with = "lenient_count")]
    pub requests: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub input_tokens: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub cached_input_tokens: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub total_input_tokens: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub output_tokens: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub total_tokens: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub total_tokens_including_cached: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub reasoning_tokens: u64,
}

impl TurnUsage {
    fn add(&mut self, other: &TurnUsage) {
        self.requests = self.requests.saturating_add(other.requests);
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
    }
}

impl From<&RunUsageSummary> for TurnUsage {
    fn from(summary: &RunUsageSummary) -> Self {
        Self {
            requests: summary.requests,
            input_tokens: summary.input_tokens,
            cached_input_tokens: summary.cached_input_tokens,
            total_input_tokens: summary.total_input_tokens,
            output_tokens: summary.output_tokens,
            total_tokens: summary.total_tokens,
            total_tokens_including_cached: summary.total_tokens_including_cached,
            reasoning_tokens: summary.reasoning_tokens,
        }
    }
}

/// Elementwise sum over every turn, plus the turn count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupTotals {
    pub turns: u64,
    #[serde(flatten)]
    pub usage: TurnUsage,
}

/// One summarized run. Each field falls back to its default when the stored
/// value has the wrong shape, so one hand-damaged field costs only itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupTurnEntry {
    #[serde(default, deserialize_with = "or_default")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "or_default")]
    pub tag: Option<String>,
    #[serde(
        default,
        deserialize_with = "or_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_id: Option<RunId>,
    #[serde(default, deserialize_with = "or_default")]
    pub last_response_id: Option<String>,
    #[serde(default, deserialize_with = "or_default")]
    pub last_agent: Option<String>,
    #[serde(default, deserialize_with = "or_default")]
    pub dump_path: Option<String>,
    #[serde(default, deserialize_with = "or_default")]
    pub usage: TurnUsage,
}

impl RollupTurnEntry {
    pub fn new(created_at: DateTime<Utc>, usage: TurnUsage) -> Self {
        Self {
            created_at,
            tag: None,
            run_id: None,
            last_response_id: None,
            last_agent: None,
            dump_path: None,
            usage,
        }
    }
}

/// Append-only usage history for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupDocument {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default, deserialize_with = "or_default")]
    pub chat_id: String,
    #[serde(default, deserialize_with = "or_default")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "recover_turns")]
    pub turns: Vec<RollupTurnEntry>,
    /// Stored totals are never trusted; they are recomputed after loading.
    #[serde(default, deserialize_with = "discard_totals")]
    pub totals: RollupTotals,
}

fn current_version() -> u32 {
    ROLLUP_VERSION
}

fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Keep every turn that is still an object; anything else is dropped.
fn recover_turns<'de, D>(deserializer: D) -> Result<Vec<RollupTurnEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => {
            warn!(found = %other, "rollup turns is not a list, starting empty");
            return Ok(Vec::new());
        }
    };

    let mut turns = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match RollupTurnEntry::deserialize(item) {
            Ok(turn) => turns.push(turn),
            Err(err) => warn!(index, error = %err, "dropping unreadable rollup turn"),
        }
    }
    Ok(turns)
}

fn discard_totals<'de, D>(deserializer: D) -> Result<RollupTotals, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde::de::IgnoredAny::deserialize(deserializer)?;
    Ok(RollupTotals::default())
}

impl RollupDocument {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            version: ROLLUP_VERSION,
            chat_id: chat_id.into(),
            updated_at: Utc::now(),
            turns: Vec::new(),
            totals: RollupTotals::default(),
        }
    }

    /// Parse a stored document and recompute its totals.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        Self::from_slice(raw.as_bytes())
    }

    /// Like [`from_json`](Self::from_json), for raw file bytes. Bytes that
    /// are not UTF-8 are reported as a parse error.
    pub fn from_slice(raw: &[u8]) -> serde_json::Result<Self> {
        let mut doc: Self = serde_json::from_slice(raw)?;
        doc.recompute_totals();
        Ok(doc)
    }

    /// Append `entry` and recompute totals from scratch.
    pub fn push_turn(&mut self, entry: RollupTurnEntry, now: DateTime<Utc>) {
        self.turns.push(entry);
        self.recompute_totals();
        self.updated_at = now;
    }

    /// Rebuild `totals` as the sum over all turns, discarding whatever was
    /// stored before.
    pub fn recompute_totals(&mut self) {
        let mut totals = RollupTotals {
            turns: self.turns.len() as u64,
            usage: TurnUsage::default(),
        };
        for turn in &self.turns {
            totals.usage.add(&turn.usage);
        }
        self.totals = totals;
    }
}
