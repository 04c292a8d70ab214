//! Write-to-temp-then-rename for state files.
//!
//! A crash mid-write leaves either the previous file or the new one on disk,
//! never a truncated mix of both.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::error;

use crate::StoreError;

/// Atomically replaces `path` with `contents`, creating parent directories.
///
/// On rename failure the temporary file is removed before the error is
/// returned.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = tmp_path(path);

    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        error!(path = %tmp.display(), error = %e, "failed to write temp file");
        return Err(e.into());
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        error!(
            from = %tmp.display(),
            to = %path.display(),
            error = %e,
            "failed to rename temp file"
        );
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("state"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_atomic(&path, b"first").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn tmp_path_keeps_directory() {
        let path = Path::new("/var/lib/peerdrop/queue.json");
        assert_eq!(
            tmp_path(path),
            PathBuf::from("/var/lib/peerdrop/queue.json.tmp")
        );
    }
}
