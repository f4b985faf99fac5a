//! Atomic file writes.
//!
//! Implements write-or-nothing replacement of a destination file:
//! 1. Write to a temp file in the destination's directory
//! 2. fsync to ensure data reaches disk
//! 3. Atomic rename onto the target path
//!
//! The destination's parent directory must already exist. If any step fails
//! the temp file is removed and the target is left as it was.

use crate::{PressError, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Directory that will hold `path`, treating a bare file name as the current directory.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Atomically replace `path` with `bytes`.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = parent_dir(path);
    if !parent.is_dir() {
        return Err(PressError::Io {
            message: format!("Destination directory {} does not exist", parent.display()),
            path: Some(parent),
            source: None,
        });
    }

    let mut temp = NamedTempFile::new_in(&parent).map_err(|e| PressError::Io {
        message: format!("Failed to create temp file in {}", parent.display()),
        path: Some(parent.clone()),
        source: Some(e),
    })?;

    temp.write_all(bytes).map_err(|e| PressError::Io {
        message: format!("Failed to write temp file {}", temp.path().display()),
        path: Some(temp.path().to_path_buf()),
        source: Some(e),
    })?;

    temp.flush().map_err(|e| PressError::Io {
        message: format!("Failed to flush temp file {}", temp.path().display()),
        path: Some(temp.path().to_path_buf()),
        source: Some(e),
    })?;

    temp.as_file().sync_all().map_err(|e| PressError::Io {
        message: format!("Failed to sync temp file {}", temp.path().display()),
        path: Some(temp.path().to_path_buf()),
        source: Some(e),
    })?;

    temp.persist(path).map_err(|e| PressError::Io {
        message: format!("Failed to rename temp file to {}", path.display()),
        path: Some(path.to_path_buf()),
        source: Some(e.error),
    })?;

    debug!("Atomically wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Serialize `data` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let mut serialized = serde_json::to_vec_pretty(data).map_err(|e| PressError::Json {
        message: format!("Failed to serialize {}: {e}", path.display()),
        source: Some(e),
    })?;
    serialized.push(b'\n');
    atomic_write_bytes(path, &serialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_bytes_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.gguf");

        atomic_write_bytes(&path, b"first").unwrap();
        atomic_write_bytes(&path, b"second, longer").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second, longer");
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.gguf");
        atomic_write_bytes(&path, b"data").unwrap();

        let entries: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("model.gguf")]);
    }

    #[test]
    fn test_atomic_write_requires_parent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("model.gguf");

        let err = atomic_write_bytes(&path, b"data").unwrap_err();
        assert!(matches!(err, PressError::Io { .. }));
        assert!(!path.exists());
        assert!(!temp_dir.path().join("missing").exists());
    }

    #[test]
    fn test_atomic_write_json_is_pretty_and_terminated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.gguf.meta.json");

        atomic_write_json(&path, &json!({ "mode": "default", "tensors_total": 4 })).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.ends_with("}\n"));
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["tensors_total"], 4);
    }

    #[test]
    fn test_parent_dir_of_bare_name() {
        assert_eq!(parent_dir(Path::new("model.gguf")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("out/model.gguf")), PathBuf::from("out"));
    }
}
