//! Persistent cache of GetVersion replies keyed by endpoint URL.
//!
//! The cache is loaded from disk on first use and written through after
//! every mutation. A missing, empty, or corrupt file reads as an empty cache.
//! Writes replace the file atomically while holding the cache lock, so
//! concurrent probes never interleave partial writes.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::Builder;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::capability::CapabilitySnapshot;
use crate::endpoint::Endpoint;
use crate::errors::VersionCacheError;

const CACHE_TARGET: &str = "omnicall::cache";

/// One cached probe result as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// RFC 3339 time of the last successful probe.
    pub timestamp: String,
    /// Capability map returned by the aggregate.
    #[serde(default)]
    pub version: Value,
    /// Aggregate URN the entry was fetched for.
    #[serde(default)]
    pub urn: String,
    /// Aggregate URL the entry was fetched for.
    #[serde(default)]
    pub url: String,
    /// Error from the most recent failed probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot and raw capability map read back from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedVersion {
    /// Parsed snapshot, including any recorded error.
    pub snapshot: CapabilitySnapshot,
    /// Capability map as stored.
    pub capabilities: Value,
}

/// File-backed version cache shared by every probe in a process.
#[derive(Debug)]
pub struct VersionCache {
    path: PathBuf,
    entries: Mutex<Option<BTreeMap<String, CacheEntry>>>,
}

impl VersionCache {
    /// Creates a cache backed by `path`; nothing is read until first use.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Returns the snapshot cached for `url`, if one parses.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<CachedVersion> {
        let mut guard = self.lock();
        let entry = Self::loaded(&mut guard, &self.path).get(url)?.clone();
        drop(guard);

        let fetched_at = OffsetDateTime::parse(&entry.timestamp, &Rfc3339)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let mut snapshot = CapabilitySnapshot::from_capabilities(&entry.version, fetched_at)
            .inspect_err(|error| {
                debug!(
                    target: CACHE_TARGET,
                    url,
                    %error,
                    "cache entry holds no usable snapshot"
                );
            })
            .ok()?;
        snapshot.last_error = entry.error;
        Some(CachedVersion {
            snapshot,
            capabilities: entry.version,
        })
    }

    /// Stores a successful probe, replacing any previous entry.
    pub fn put(
        &self,
        endpoint: &Endpoint,
        capabilities: &Value,
        fetched_at: OffsetDateTime,
    ) -> Result<(), VersionCacheError> {
        let timestamp = fetched_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"));
        let entry = CacheEntry {
            timestamp,
            version: capabilities.clone(),
            urn: endpoint.urn().to_owned(),
            url: endpoint.url().to_owned(),
            error: None,
        };
        self.mutate(|entries| {
            entries.insert(endpoint.url().to_owned(), entry);
        })
    }

    /// Records a failed probe without discarding a previous snapshot.
    pub fn mark_error(&self, endpoint: &Endpoint, message: &str) -> Result<(), VersionCacheError> {
        self.mutate(|entries| {
            entries
                .entry(endpoint.url().to_owned())
                .and_modify(|entry| entry.error = Some(message.to_owned()))
                .or_insert_with(|| CacheEntry {
                    timestamp: String::from("1970-01-01T00:00:00Z"),
                    version: Value::Null,
                    urn: endpoint.urn().to_owned(),
                    url: endpoint.url().to_owned(),
                    error: Some(message.to_owned()),
                });
        })
    }

    /// Removes the entry for `url`; returns whether one existed.
    pub fn invalidate(&self, url: &str) -> Result<bool, VersionCacheError> {
        let mut removed = false;
        self.mutate(|entries| removed = entries.remove(url).is_some())?;
        Ok(removed)
    }

    /// Copy of every entry, keyed by URL.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, CacheEntry> {
        let mut guard = self.lock();
        Self::loaded(&mut guard, &self.path).clone()
    }

    fn mutate<F>(&self, change: F) -> Result<(), VersionCacheError>
    where
        F: FnOnce(&mut BTreeMap<String, CacheEntry>),
    {
        let mut guard = self.lock();
        let entries = Self::loaded(&mut guard, &self.path);
        change(entries);
        let encoded = serde_json::to_vec_pretty(&*entries).map_err(VersionCacheError::Encode)?;
        atomic_write(&self.path, &encoded)
            .map_err(|source| VersionCacheError::io(&self.path, source))?;
        debug!(
            target: CACHE_TARGET,
            path = %self.path.display(),
            entries = entries.len(),
            "version cache written"
        );
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<BTreeMap<String, CacheEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loaded<'a>(
        guard: &'a mut MutexGuard<'_, Option<BTreeMap<String, CacheEntry>>>,
        path: &Path,
    ) -> &'a mut BTreeMap<String, CacheEntry> {
        guard.get_or_insert_with(|| load_entries(path))
    }
}

fn load_entries(path: &Path) -> BTreeMap<String, CacheEntry> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(error) => {
            warn!(
                target: CACHE_TARGET,
                path = %path.display(),
                %error,
                "version cache unreadable; starting empty"
            );
            return BTreeMap::new();
        }
    };
    if contents.trim().is_empty() {
        return BTreeMap::new();
    }

    let raw: BTreeMap<String, Value> = match serde_json::from_str(&contents) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(
                target: CACHE_TARGET,
                path = %path.display(),
                %error,
                "version cache is corrupt; starting empty"
            );
            return BTreeMap::new();
        }
    };

    raw.into_iter()
        .filter_map(|(url, value)| {
            serde_json::from_value::<CacheEntry>(value)
                .inspect_err(|error| {
                    debug!(target: CACHE_TARGET, url, %error, "dropping unreadable cache entry");
                })
                .ok()
                .map(|entry| (url, entry))
        })
        .collect()
}

/// Writes `contents` to `path` through a synced temporary file and rename.
fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "cache path did not have a parent directory",
        )
    })?;
    fs::create_dir_all(directory)?;

    let mut builder = Builder::new();
    builder.prefix(
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("omnicall-cache"),
    );
    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
