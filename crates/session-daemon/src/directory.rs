//! File-backed bootstrap directory.
//!
//! Stores the registry as JSON at a path every instance can reach (a shared
//! mount, or a local file for a single-host cluster). Writes go to a
//! temporary file that is renamed over the existing one, so readers see either
//! the old or the new contents and never a partial write.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use session_core::directory::Result;
use session_core::{Directory, DirectoryEntry, DirectoryError};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// On-disk format of the directory. Entries are kept sorted by key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct DirectoryFile {
    entries: Vec<DirectoryEntry>,
}

pub struct FileDirectory {
    path: PathBuf,
    /// Serializes read-merge-write cycles from this process
    write_lock: Mutex<()>,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }

    /// Read the file. A missing file is an empty directory.
    async fn load(&self) -> Result<DirectoryFile> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No directory file at {:?}", self.path);
                return Ok(DirectoryFile::default());
            }
            Err(e) => {
                return Err(DirectoryError::Unavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        serde_json::from_str(&content)
            .map_err(|e| DirectoryError::Corrupt(format!("{}: {}", self.path.display(), e)))
    }

    async fn save(&self, file: &DirectoryFile) -> Result<()> {
        let json = serde_json::to_string_pretty(file)
            .map_err(|e| DirectoryError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DirectoryError::Io(e.to_string()))?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| DirectoryError::Io(format!("{}: {}", temp.display(), e)))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| DirectoryError::Io(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl Directory for FileDirectory {
    async fn list(&self) -> Result<Vec<DirectoryEntry>> {
        Ok(self.load().await?.entries)
    }

    async fn put_all(&self, entries: Vec<DirectoryEntry>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut merged: BTreeMap<String, String> = self
            .load()
            .await?
            .entries
            .into_iter()
            .map(|e| (e.key, e.ip))
            .collect();
        for entry in entries {
            merged.insert(entry.key, entry.ip);
        }

        let file = DirectoryFile {
            entries: merged
                .into_iter()
                .map(|(key, ip)| DirectoryEntry { key, ip })
                .collect(),
        };
        debug!(
            "Writing {} directory entries to {:?}",
            file.entries.len(),
            self.path
        );
        self.save(&file).await
    }
}
