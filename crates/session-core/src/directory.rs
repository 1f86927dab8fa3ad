//! Directory trait for the shared bootstrap registry.
//!
//! The directory is an eventually-consistent list of "last known" peer
//! addresses that every instance reads from and writes a bounded sample of
//! its view back to. It seeds membership; it never holds session data.
//!
//! Implementations:
//! - `InMemoryDirectory` - For testing and single-process clusters
//! - `FileDirectory` (in session-daemon) - A JSON file on shared storage

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt directory contents: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// One registry entry: a slot key and the address published in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub key: String,
    pub ip: String,
}

impl DirectoryEntry {
    pub fn new(key: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ip: ip.into(),
        }
    }
}

/// Shared bootstrap registry.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Every entry currently published by any instance.
    async fn list(&self) -> Result<Vec<DirectoryEntry>>;

    /// Write entries, overwriting any existing entry with the same key.
    async fn put_all(&self, entries: Vec<DirectoryEntry>) -> Result<()>;
}

/// In-memory directory for testing
#[derive(Default)]
pub struct InMemoryDirectory {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-seeded with addresses under `seed0..seedN`.
    pub fn with_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = addresses
            .into_iter()
            .enumerate()
            .map(|(i, ip)| (format!("seed{i}"), ip.into()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn list(&self) -> Result<Vec<DirectoryEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .iter()
            .map(|(key, ip)| DirectoryEntry::new(key.clone(), ip.clone()))
            .collect())
    }

    async fn put_all(&self, entries: Vec<DirectoryEntry>) -> Result<()> {
        let mut stored = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for entry in entries {
            stored.insert(entry.key, entry.ip);
        }
        Ok(())
    }
}
