//! # Snapshot Directory
//!
//! Named snapshots stored as `<name>.json` files in one directory.
//!
//! Reads and writes go through `tokio::fs`; callers serialize the store
//! first and touch the disk without holding any store lock.

use minihull_core::formats::snapshot::MAX_SNAPSHOT_SIZE;
use minihull_core::{MinihullError, StoreSnapshot, snapshot_from_bytes};
use std::path::{Path, PathBuf};

const EXTENSION: &str = "json";

/// Directory holding saved snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

impl SnapshotDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a snapshot name, rejecting names that would escape the
    /// directory.
    fn path_for(&self, name: &str) -> Result<PathBuf, MinihullError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\'])
            && !name.contains('\0');
        if !valid {
            return Err(MinihullError::InvalidArguments(format!(
                "Invalid snapshot name '{}'",
                name
            )));
        }
        Ok(self.root.join(format!("{}.{}", name, EXTENSION)))
    }

    /// Write serialized snapshot bytes under `name`, replacing any
    /// previous one.
    pub async fn save(&self, name: &str, bytes: Vec<u8>) -> Result<PathBuf, MinihullError> {
        let path = self.path_for(name)?;
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            MinihullError::IoError(format!("Cannot write snapshot '{}': {}", path.display(), e))
        })?;
        tracing::info!(name, path = %path.display(), "Snapshot saved");
        Ok(path)
    }

    /// Read and validate the snapshot saved under `name`.
    pub async fn load(&self, name: &str) -> Result<StoreSnapshot, MinihullError> {
        let path = self.path_for(name)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MinihullError::SnapshotNotFound(name.to_string()));
            }
            Err(e) => {
                return Err(MinihullError::IoError(format!(
                    "Cannot read snapshot '{}': {}",
                    path.display(),
                    e
                )));
            }
        };
        if metadata.len() > MAX_SNAPSHOT_SIZE as u64 {
            return Err(MinihullError::DeserializationError(format!(
                "Snapshot size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_SNAPSHOT_SIZE
            )));
        }
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            MinihullError::IoError(format!("Cannot read snapshot '{}': {}", path.display(), e))
        })?;
        snapshot_from_bytes(&bytes)
    }

    /// Names of every saved snapshot, sorted.
    pub fn list(&self) -> Result<Vec<String>, MinihullError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| {
            MinihullError::IoError(format!(
                "Cannot list snapshots in '{}': {}",
                self.root.display(),
                e
            ))
        })?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().is_some_and(|ext| ext == EXTENSION))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }
}
