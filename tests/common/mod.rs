//! Shared test helpers: canned runs and temp-dir meter configs.

#![allow(dead_code)]

use serde_json::json;
use tempfile::TempDir;

use turnmeter::prelude::*;

/// The streaming run from the accounting walkthrough, in adapter JSON form.
///
/// Ledger: one nested call (100 in, 10 cached, 20 out). Raw responses: one
/// top-level streamed call (50 in, 5 out, 2 reasoning).
pub fn worked_example_run() -> RunResult {
    serde_json::from_value(json!({
        "mode": "streaming",
        "ledger": [{
            "inputTokens": 100,
            "outputTokens": 20,
            "totalTokens": 120,
            "inputTokensDetails": { "cached_tokens": 10 }
        }],
        "rawResponses": [{
            "responseId": "r1",
            "usage": {
                "inputTokens": 50,
                "outputTokens": 5,
                "totalTokens": 55,
                "inputTokensDetails": [{ "cached_tokens": 0 }],
                "outputTokensDetails": [{ "reasoning_tokens": 2 }]
            }
        }]
    }))
    .expect("worked example parses")
}

/// A batch run with one ledger call per `(input, output)` pair.
pub fn batch_run(calls: &[(u64, u64)]) -> RunResult {
    RunResult::batch(
        calls
            .iter()
            .map(|&(input, output)| CallUsage::new(input, output, input + output))
            .collect(),
    )
}

/// Meter config rooted in a fresh temp dir. Keep the `TempDir` alive.
pub fn temp_config() -> (TempDir, MeterConfig) {
    let dir = TempDir::new().expect("temp dir");
    let config = MeterConfig::new().with_trace_dir(dir.path());
    (dir, config)
}

/// Names of the regular files directly under `dir`, sorted.
pub fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
