//! One JSON trace file per run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::types::{RunId, RunMode, RunResult, TurnContext};
use crate::util::fs::atomic_write;
use crate::util::sanitize::{conversation_dir, sanitize_path_component};

use super::snapshot::to_safe_value;

const TRACE_FILE_VERSION: u32 = 1;
const MISSING_RESPONSE_ID: &str = "no-response";

/// Contents of a trace dump file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDumpRecord {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub chat_id: Option<String>,
    pub tag: Option<String>,
    pub run_id: RunId,
    pub mode: RunMode,
    pub last_response_id: Option<String>,
    pub last_agent: Option<String>,
    pub ledger: Value,
    pub raw_responses: Value,
}

impl TraceDumpRecord {
    /// Snapshot `run` as it is right now.
    pub fn capture(run: &RunResult, ctx: &TurnContext, created_at: DateTime<Utc>) -> Self {
        Self {
            version: TRACE_FILE_VERSION,
            created_at,
            chat_id: ctx.conversation_id.clone(),
            tag: ctx.tag.clone(),
            run_id: run.run_id,
            mode: run.mode(),
            last_response_id: run.last_response_id().map(str::to_string),
            last_agent: run.last_agent.clone(),
            ledger: to_safe_value(run.ledger()),
            raw_responses: to_safe_value(run.raw_responses()),
        }
    }
}

/// File name for a trace dump: `<timestamp>[-<tag>]-<response-id>.json`.
pub fn trace_file_name(
    created_at: DateTime<Utc>,
    tag: Option<&str>,
    response_id: Option<&str>,
) -> String {
    let timestamp = created_at.format("%Y%m%dT%H%M%S%3fZ");
    let response = sanitize_path_component(response_id.unwrap_or(MISSING_RESPONSE_ID));
    match tag {
        Some(tag) => format!("{timestamp}-{}-{response}.json", sanitize_path_component(tag)),
        None => format!("{timestamp}-{response}.json"),
    }
}

/// Writes trace dumps under `<base_dir>/<conversation>/`.
#[derive(Debug, Clone)]
pub struct TraceDump {
    base_dir: PathBuf,
}

impl TraceDump {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Where the dump for `record` belongs.
    pub fn path_for(&self, record: &TraceDumpRecord) -> PathBuf {
        conversation_dir(&self.base_dir, record.chat_id.as_deref()).join(trace_file_name(
            record.created_at,
            record.tag.as_deref(),
            record.last_response_id.as_deref(),
        ))
    }

    /// Write `record` to `path`.
    pub fn write(&self, path: &Path, record: &TraceDumpRecord) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(record)?;
        atomic_write(path, &serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallUsage, RawResponse};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
    }

    #[test]
    fn file_name_includes_optional_tag() {
        assert_eq!(
            trace_file_name(fixed_time(), Some("final answer"), Some("resp/1")),
            "20260304T050607000Z-final_answer-resp_1.json"
        );
        assert_eq!(
            trace_file_name(fixed_time(), None, None),
            "20260304T050607000Z-no-response.json"
        );
    }

    #[test]
    fn written_record_contains_snapshots_and_metadata() {
        let dir = TempDir::new().unwrap();
        let dump = TraceDump::new(dir.path());
        let run = RunResult::streaming(
            vec![CallUsage::new(1, 2, 3)],
            vec![RawResponse::new("r9", CallUsage::new(4, 5, 9))],
        )
        .with_last_agent("planner");
        let ctx = TurnContext::new("chat/../42").with_tag("t");

        let record = TraceDumpRecord::capture(&run, &ctx, fixed_time());
        let path = dump.path_for(&record);
        dump.write(&path, &record).unwrap();

        assert!(path.starts_with(dir.path()));
        assert_eq!(path.parent().unwrap().parent().unwrap(), dir.path());

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["chatId"], "chat/../42");
        assert_eq!(written["mode"], "streaming");
        assert_eq!(written["lastResponseId"], "r9");
        assert_eq!(written["lastAgent"], "planner");
        assert_eq!(written["ledger"][0]["totalTokens"], 3);
        assert_eq!(written["rawResponses"][0]["responseId"], "r9");
    }
}
