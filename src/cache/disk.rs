//! Persistent on-disk backend.
//!
//! Each entry lives in its own file named after the SHA-256 of its key:
//!
//! ```text
//! {"key":"observations:https://…","expires_at_ms":1767225600000}\n
//! <raw payload bytes>
//! ```
//!
//! The header line carries the original key (for prefix invalidation and
//! hash-collision checks) and a wall-clock deadline, so entries survive
//! process restarts. Writes go to a temporary file first and are renamed
//! into place. Unreadable or corrupt files are deleted and reported as a
//! miss.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::backend::{CacheBackend, effective_ttl};
use crate::{FredError, Result};

const ENTRY_EXTENSION: &str = "entry";
const TMP_EXTENSION: &str = "tmp";

/// Distinguishes concurrent temporary files for the same key.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    key: String,
    expires_at_ms: u64,
}

/// File-per-entry cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskBackend {
    directory: PathBuf,
}

impl DiskBackend {
    /// Open (and create if needed) a cache directory.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| {
            FredError::Configuration(format!(
                "failed to create cache dir {}: {e}",
                directory.display()
            ))
        })?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.directory.join(format!("{name}.{ENTRY_EXTENSION}"))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", path, e)),
        }
    }

    /// Paths of every entry file in the directory.
    async fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        self.paths_with_extension(ENTRY_EXTENSION).await
    }

    /// Paths of every file in the directory with the given extension.
    async fn paths_with_extension(&self, extension: &str) -> Result<Vec<PathBuf>> {
        let mut dir = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| io_error("list", &self.directory, e))?;
        let mut paths = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error("list", &self.directory, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == extension) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> FredError {
    FredError::Cache(format!("failed to {action} {}: {err}", path.display()))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Split a file into its header and payload. `None` means corrupt.
fn decode(bytes: &[u8]) -> Option<(EntryHeader, &[u8])> {
    let newline = bytes.iter().position(|b| *b == b'\n')?;
    let header = serde_json::from_slice(&bytes[..newline]).ok()?;
    Some((header, &bytes[newline + 1..]))
}

fn encode(header: &EntryHeader, value: &[u8]) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(header)?;
    bytes.push(b'\n');
    bytes.extend_from_slice(value);
    Ok(bytes)
}

#[async_trait]
impl CacheBackend for DiskBackend {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read", &path, e)),
        };
        let Some((header, value)) = decode(&bytes) else {
            warn!(path = %path.display(), "corrupt cache entry; deleting");
            self.remove(&path).await?;
            return Ok(None);
        };
        if header.key != key {
            debug!(path = %path.display(), "cache file belongs to another key");
            return Ok(None);
        }
        if header.expires_at_ms <= now_ms() {
            self.remove(&path).await?;
            return Ok(None);
        }
        Ok(Some(value.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let Some(ttl) = effective_ttl(ttl) else {
            return Ok(());
        };
        let header = EntryHeader {
            key: key.to_owned(),
            expires_at_ms: now_ms().saturating_add(ttl.as_millis() as u64),
        };
        let bytes = encode(&header, &value)?;

        let path = self.entry_path(key);
        let tmp_path = path.with_extension(format!(
            "{}.{TMP_EXTENSION}",
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| io_error("write", &tmp_path, e))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(io_error("rename", &path, e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.remove(&self.entry_path(key)).await
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        if prefix.is_none() {
            // writes cancelled between write and rename leave these behind
            for path in self.paths_with_extension(TMP_EXTENSION).await? {
                self.remove(&path).await?;
            }
        }
        for path in self.entry_paths().await? {
            let Some(prefix) = prefix else {
                self.remove(&path).await?;
                continue;
            };
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("read", &path, e)),
            };
            match decode(&bytes) {
                Some((header, _)) if !header.key.starts_with(prefix) => {}
                _ => self.remove(&path).await?,
            }
        }
        Ok(())
    }

    async fn len(&self) -> u64 {
        self.entry_paths()
            .await
            .map(|paths| paths.len() as u64)
            .unwrap_or(0)
    }
}
