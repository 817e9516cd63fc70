//! Atomic file replacement.

use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{MeterError, Result};

/// Write `data` to `path` so readers only ever observe the old or the new
/// contents: the bytes go to a temp file in the same directory, which is then
/// renamed over `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    atomic_write_with(path, data, |_| Ok(()))
}

/// Like [`atomic_write`], running `before_commit` on the synced temp file
/// right before the rename. An error from the hook aborts the write and
/// leaves `path` untouched.
pub(crate) fn atomic_write_with<F>(path: &Path, data: &[u8], before_commit: F) -> Result<()>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| MeterError::InvalidPath(format!("{} has no file name", path.display())))?;

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_name = format!(
        ".{}.tmp-{}-{nonce}",
        file_name.to_string_lossy(),
        std::process::id()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        before_commit(&temp_path)
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(MeterError::Io(err));
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(MeterError::Io(err));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_and_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn failure_before_rename_keeps_committed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        atomic_write(&path, b"committed").unwrap();

        let result = atomic_write_with(&path, b"half-written", |_| {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "crash"))
        });

        assert!(matches!(result, Err(MeterError::Io(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), "committed");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn path_without_file_name_is_rejected() {
        let result = atomic_write(Path::new("/"), b"x");
        assert!(result.is_err());
    }
}
