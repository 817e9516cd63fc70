//! Filesystem-safe path components from arbitrary identifiers.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Maximum length, in characters, of a sanitized component.
pub const MAX_COMPONENT_LEN: usize = 120;

/// Returned when nothing usable survives sanitization.
pub const FALLBACK_COMPONENT: &str = "unknown";

static RESERVED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[<>:"/\\|?*\x00-\x1F\x7F]"#).expect("reserved character regex must compile")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex must compile"));

static DOT_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{2,}").expect("dot run regex must compile"));

/// Turn any identifier into a single safe path component.
///
/// The result never contains path separators, `..`, control characters or
/// whitespace, is at most [`MAX_COMPONENT_LEN`] characters, and is never empty.
pub fn sanitize_path_component(raw: &str) -> String {
    let trimmed = raw
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace());

    let replaced = RESERVED_RE.replace_all(trimmed, "_");
    let replaced = WHITESPACE_RE.replace_all(&replaced, "_");
    let replaced = DOT_RUN_RE.replace_all(&replaced, "_");

    let truncated: String = replaced.chars().take(MAX_COMPONENT_LEN).collect();
    let result = truncated.trim_end_matches('.');

    if result.is_empty() {
        FALLBACK_COMPONENT.to_string()
    } else {
        result.to_string()
    }
}

/// Per-conversation directory under `base_dir`.
pub fn conversation_dir(base_dir: &Path, conversation_id: Option<&str>) -> PathBuf {
    base_dir.join(sanitize_path_component(conversation_id.unwrap_or_default()))
}
