// Memory Stream - Durable bounded list of learned lessons
// Loaded once at startup, persisted before every append returns

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Statistics snapshot from the memory stream.
#[derive(Debug, Clone)]
pub struct MemoryStreamStats {
    pub entries: usize,
    pub capacity: usize,
    pub appended: u64,
    pub evicted: u64,
}

impl fmt::Display for MemoryStreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryStream(entries={}/{}, appended={}, evicted={})",
            self.entries, self.capacity, self.appended, self.evicted
        )
    }
}

/// Ordered, bounded, durable list of short lesson strings. Insertion order
/// is temporal order; the oldest entry is evicted first when over
/// capacity. Every mutation is written to disk before the call returns,
/// so a crash never silently drops a lesson that `append` acknowledged.
pub struct MemoryStream {
    path: PathBuf,
    capacity: usize,
    entries: RwLock<VecDeque<String>>,

    // Statistics
    appended: RwLock<u64>,
    evicted: RwLock<u64>,
}

impl MemoryStream {
    /// Load the persisted lesson list, or start empty when no prior state
    /// exists. An oversized file (e.g. after a capacity reduction) is
    /// truncated from the front.
    pub fn load(path: impl AsRef<Path>, capacity: usize) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        let capacity = capacity.max(1);

        let mut entries: VecDeque<String> = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str::<Vec<String>>(&content)?.into()
        } else {
            VecDeque::new()
        };

        while entries.len() > capacity {
            entries.pop_front();
        }

        info!(path = %path.display(), entries = entries.len(), "Memory stream loaded");

        Ok(Self {
            path,
            capacity,
            entries: RwLock::new(entries),
            appended: RwLock::new(0),
            evicted: RwLock::new(0),
        })
    }

    /// Append one lesson, evicting from the front when over capacity, and
    /// persist durably before returning.
    pub fn append(&self, entry: &str) -> Result<(), MemoryError> {
        let mut entries = self.entries.write();
        entries.push_back(entry.to_string());
        *self.appended.write() += 1;

        while entries.len() > self.capacity {
            entries.pop_front();
            *self.evicted.write() += 1;
        }

        // Persist under the write lock so durability follows mutation order.
        self.persist(&entries)?;
        debug!(entries = entries.len(), "Lesson recorded");
        Ok(())
    }

    /// Most recent `n` entries, oldest of those first. Pure read.
    pub fn context_for(&self, n: usize) -> Vec<String> {
        let entries = self.entries.read();
        let start = entries.len().saturating_sub(n);
        entries.iter().skip(start).cloned().collect()
    }

    /// Snapshot of all entries in temporal order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get_stats(&self) -> MemoryStreamStats {
        MemoryStreamStats {
            entries: self.entries.read().len(),
            capacity: self.capacity,
            appended: *self.appended.read(),
            evicted: *self.evicted.read(),
        }
    }

    fn persist(&self, entries: &VecDeque<String>) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let list: Vec<&String> = entries.iter().collect();
        let json = serde_json::to_string_pretty(&list)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl fmt::Display for MemoryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_stats())
    }
}
