//! Incremental cache of parsed component records, keyed by file path and
//! validated by a SHA-256 hash of the source text.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::parse::ComponentRecord;

#[derive(Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub record: ComponentRecord,
}

pub struct IncrementalCache {
    cache_dir: PathBuf,
}

impl IncrementalCache {
    /// Open (and create if needed) the cache directory.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            tracing::warn!(dir = %cache_dir.display(), "cannot create cache directory: {}", e);
        }
        Self { cache_dir }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, file_path: &str) -> PathBuf {
        let safe_name: String = file_path
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        self.cache_dir.join(format!("{}.json", safe_name))
    }

    pub fn get(&self, file_path: &str, source: &str) -> Option<ComponentRecord> {
        let path = self.entry_path(file_path);
        let data = fs::read_to_string(&path).ok()?;

        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(file = file_path, "discarding corrupt cache entry: {}", e);
                fs::remove_file(&path).ok();
                return None;
            }
        };

        if entry.hash == Self::compute_hash(source) {
            tracing::debug!(file = file_path, "cache hit");
            Some(entry.record)
        } else {
            None
        }
    }

    pub fn set(&self, file_path: &str, source: &str, record: &ComponentRecord) {
        let entry = CacheEntry {
            hash: Self::compute_hash(source),
            record: record.clone(),
        };
        let path = self.entry_path(file_path);
        match serde_json::to_string(&entry) {
            Ok(data) => {
                if let Err(e) = fs::write(&path, data) {
                    tracing::warn!(file = file_path, "cannot write cache entry: {}", e);
                }
            }
            Err(e) => tracing::warn!(file = file_path, "cannot serialize cache entry: {}", e),
        }
    }
}
