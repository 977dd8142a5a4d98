//! File system helpers and the production [`FileTransfer`].
//!
//! Writes go through a temporary sibling file and a rename so a crash never
//! leaves a half-written record behind. JSON records are always written
//! pretty-printed with a trailing newline.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::host::FileTransfer;

/// [`FileTransfer`] backed by `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileTransfer;

impl FileTransfer for LocalFileTransfer {
    async fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            self.ensure_dir(parent).await?;
        }
        debug!("Copying {} -> {}", src.display(), dst.display());
        tokio::fs::copy(src, dst)
            .await
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
        Ok(())
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to list directory: {}", dir.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.ensure_dir(parent).await?;
        }

        let temp_path = temp_sibling(path);
        tokio::fs::write(&temp_path, contents)
            .await
            .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;
        Ok(())
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory: {}", path.display()))
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove file: {}", path.display())),
        }
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove directory: {}", path.display())),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// `<file name>.tmp` next to `path`, so records differing only in extension
/// never share a temp file.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read and deserialize a JSON document.
pub async fn read_json<T: DeserializeOwned>(files: &impl FileTransfer, path: &Path) -> Result<T> {
    let bytes = files.read(path).await?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse JSON from {}", path.display()))
}

/// Serialize `value` as pretty JSON and write it to `path`.
pub async fn write_json<T: Serialize + ?Sized>(
    files: &impl FileTransfer,
    path: &Path,
    value: &T,
) -> Result<()> {
    let mut content = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize JSON for {}", path.display()))?;
    content.push('\n');
    files.write(path, content.as_bytes()).await
}

/// Hex-encoded SHA-256 digest of `content`.
#[must_use]
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 digest of the file at `path`.
pub async fn file_digest(files: &impl FileTransfer, path: &Path) -> Result<String> {
    let content = files
        .read(path)
        .await
        .with_context(|| format!("Failed to read file for checksum: {}", path.display()))?;
    Ok(sha256_hex(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parents_and_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let files = LocalFileTransfer;
        let path = temp.path().join("a").join("b").join("record.json");

        files.write(&path, b"{}").await.unwrap();
        assert_eq!(files.read(&path).await.unwrap(), b"{}");
        assert!(!temp.path().join("a/b/record.json.tmp").exists());
    }

    #[test]
    fn test_temp_sibling_keeps_the_extension() {
        let json = temp_sibling(Path::new("plugins/bridge.json"));
        let toml = temp_sibling(Path::new("plugins/bridge.toml"));
        assert_eq!(json, Path::new("plugins/bridge.json.tmp"));
        assert_ne!(json, toml);
    }

    #[tokio::test]
    async fn test_remove_file_ignores_missing_files() {
        let temp = TempDir::new().unwrap();
        let files = LocalFileTransfer;
        let path = temp.path().join("gone.py");
        files.write(&path, b"x").await.unwrap();

        files.remove_file(&path).await.unwrap();
        assert!(!path.exists());
        files.remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_files_skips_directories_and_sorts() {
        let temp = TempDir::new().unwrap();
        let files = LocalFileTransfer;
        files.write(&temp.path().join("b.py"), b"").await.unwrap();
        files.write(&temp.path().join("a.py"), b"").await.unwrap();
        files.ensure_dir(&temp.path().join("nested")).await.unwrap();

        let listed = files.list_files(temp.path()).await.unwrap();
        let names: Vec<_> =
            listed.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a.py", "b.py"]);
    }

    #[tokio::test]
    async fn test_list_missing_directory_fails() {
        let temp = TempDir::new().unwrap();
        assert!(LocalFileTransfer.list_files(&temp.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_missing_directory_is_ok() {
        let temp = TempDir::new().unwrap();
        LocalFileTransfer.remove_dir_all(&temp.path().join("missing")).await.unwrap();
    }

    #[tokio::test]
    async fn test_json_round_trip_and_digest() {
        let temp = TempDir::new().unwrap();
        let files = LocalFileTransfer;
        let path = temp.path().join("data.json");

        write_json(&files, &path, &json!({"release": 3})).await.unwrap();
        let value: serde_json::Value = read_json(&files, &path).await.unwrap();
        assert_eq!(value["release"], 3);

        let digest = file_digest(&files, &path).await.unwrap();
        assert_eq!(digest, sha256_hex(&files.read(&path).await.unwrap()));
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
