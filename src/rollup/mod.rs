//! Durable per-conversation usage rollups.
//!
//! Each conversation gets one `turn-usage-rollup.json` next to its trace
//! dumps. Appends are read-modify-write with an atomic rename at the end, so
//! readers see either the previous document or the new one. Appends from
//! separate processes for the same conversation are last-writer-wins.

pub mod document;

pub use document::{RollupDocument, RollupTotals, RollupTurnEntry, TurnUsage, ROLLUP_VERSION};

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{MeterError, Result};
use crate::util::fs::atomic_write;
use crate::util::sanitize::{conversation_dir, FALLBACK_COMPONENT};

/// File name of the rollup document inside a conversation directory.
pub const ROLLUP_FILE_NAME: &str = "turn-usage-rollup.json";

/// Reads and appends rollup documents under a base directory.
#[derive(Debug, Clone)]
pub struct RollupStore {
    base_dir: PathBuf,
}

impl RollupStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the rollup document for `chat_id`.
    pub fn document_path(&self, chat_id: Option<&str>) -> PathBuf {
        conversation_dir(&self.base_dir, chat_id).join(ROLLUP_FILE_NAME)
    }

    /// Load the document for `chat_id`, or `None` if it does not exist yet.
    pub fn load(&self, chat_id: Option<&str>) -> Result<Option<RollupDocument>> {
        read_document(&self.document_path(chat_id))
    }

    /// Append `entry` to the conversation's document, creating it if needed,
    /// and return the document as written.
    ///
    /// A document that no longer parses is moved aside to
    /// `turn-usage-rollup.json.corrupt-<timestamp>` and a fresh one started.
    pub fn append(&self, chat_id: Option<&str>, entry: RollupTurnEntry) -> Result<RollupDocument> {
        let path = self.document_path(chat_id);
        let chat = chat_id.unwrap_or(FALLBACK_COMPONENT);

        let mut doc = match read_document(&path) {
            Ok(Some(doc)) => doc,
            Ok(None) => RollupDocument::new(chat),
            Err(MeterError::Serialization(err)) => {
                let aside = preserve_corrupt(&path)?;
                warn!(
                    chat = %chat,
                    error = %err,
                    moved_to = %aside.display(),
                    "rollup document unreadable, starting a new one"
                );
                RollupDocument::new(chat)
            }
            Err(err) => return Err(err),
        };

        if doc.version != ROLLUP_VERSION {
            return Err(MeterError::UnsupportedVersion {
                found: doc.version,
                expected: ROLLUP_VERSION,
            });
        }

        doc.push_turn(entry, Utc::now());
        let serialized = serde_json::to_vec_pretty(&doc)?;
        atomic_write(&path, &serialized)?;

        debug!(
            chat = %chat,
            turns = doc.totals.turns,
            total_tokens = doc.totals.usage.total_tokens,
            "rollup appended"
        );
        Ok(doc)
    }
}

fn read_document(path: &Path) -> Result<Option<RollupDocument>> {
    let raw = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(MeterError::Io(err)),
    };
    Ok(Some(RollupDocument::from_slice(&raw)?))
}

fn preserve_corrupt(path: &Path) -> Result<PathBuf> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
    let aside = path.with_file_name(format!("{ROLLUP_FILE_NAME}.corrupt-{stamp}"));
    fs::rename(path, &aside)?;
    Ok(aside)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn entry(total_tokens: u64) -> RollupTurnEntry {
        RollupTurnEntry::new(
            Utc::now(),
            TurnUsage {
                requests: 1,
                total_tokens,
                ..Default::default()
            },
        )
    }

    #[test]
    fn load_returns_none_before_first_append() {
        let dir = TempDir::new().unwrap();
        let store = RollupStore::new(dir.path());
        assert!(store.load(Some("chat")).unwrap().is_none());
    }

    #[test]
    fn appends_accumulate_and_totals_follow() {
        let dir = TempDir::new().unwrap();
        let store = RollupStore::new(dir.path());

        store.append(Some("chat"), entry(120)).unwrap();
        let doc = store.append(Some("chat"), entry(55)).unwrap();

        assert_eq!(doc.turns.len(), 2);
        assert_eq!(doc.totals.turns, 2);
        assert_eq!(doc.totals.usage.total_tokens, 175);

        let reloaded = store.load(Some("chat")).unwrap().unwrap();
        assert_eq!(reloaded, doc);
    }

    #[test]
    fn corrupt_document_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let store = RollupStore::new(dir.path());
        let path = store.document_path(Some("chat"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let doc = store.append(Some("chat"), entry(9)).unwrap();
        assert_eq!(doc.totals.turns, 1);

        let names: Vec<String> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("turn-usage-rollup.json.corrupt-")));
    }

    #[test]
    fn non_utf8_document_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let store = RollupStore::new(dir.path());
        let path = store.document_path(Some("chat"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, [0xff, 0xfe, 0x00, b'{']).unwrap();

        let doc = store.append(Some("chat"), entry(9)).unwrap();
        assert_eq!(doc.totals.turns, 1);
        let doc = store.append(Some("chat"), entry(1)).unwrap();
        assert_eq!(doc.totals.turns, 2);

        let aside = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("turn-usage-rollup.json.corrupt-")
            })
            .count();
        assert_eq!(aside, 1);
    }

    #[test]
    fn one_damaged_turn_does_not_lose_the_others() {
        let dir = TempDir::new().unwrap();
        let store = RollupStore::new(dir.path());
        store.append(Some("chat"), entry(100)).unwrap();
        store.append(Some("chat"), entry(200)).unwrap();

        let path = store.document_path(Some("chat"));
        let mut raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        raw["turns"][0]["createdAt"] = "yesterday".into();
        raw["turns"][1]["tag"] = 42.into();
        fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let doc = store.append(Some("chat"), entry(7)).unwrap();
        assert_eq!(doc.turns.len(), 3);
        assert_eq!(doc.totals.usage.total_tokens, 307);
        assert_eq!(doc.turns[1].usage.total_tokens, 200);
        assert_eq!(doc.turns[1].tag, None);
    }

    #[test]
    fn unsupported_version_is_rejected_without_overwriting() {
        let dir = TempDir::new().unwrap();
        let store = RollupStore::new(dir.path());
        let path = store.document_path(Some("chat"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let future = r#"{"version": 7, "chatId": "chat", "turns": []}"#;
        fs::write(&path, future).unwrap();

        let err = store.append(Some("chat"), entry(1)).unwrap_err();
        assert!(matches!(err, MeterError::UnsupportedVersion { found: 7, .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), future);
    }

    #[test]
    fn conversations_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = RollupStore::new(dir.path());
        store.append(Some("a"), entry(1)).unwrap();
        store.append(Some("b"), entry(2)).unwrap();

        assert_eq!(store.load(Some("a")).unwrap().unwrap().totals.usage.total_tokens, 1);
        assert_eq!(store.load(Some("b")).unwrap().unwrap().totals.usage.total_tokens, 2);
    }
}
