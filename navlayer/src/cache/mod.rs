//! Bounded disk + memory cache for container payloads.
//!
//! [`TileCache`] maps human-readable string keys (see
//! [`ContainerKey::cache_key`](crate::container::ContainerKey::cache_key))
//! to payload bytes. Entries are persisted one file per key under the cache
//! root, fronted by a moka memory working set. An index file records magic,
//! version, entry count, and a SHA-256 checksum per entry; it is validated
//! on open and entries that fail validation are dropped, never served.
//!
//! # Write discipline
//!
//! A payload is written to a temporary file, fsynced, and atomically renamed
//! into place; only then does the entry become visible in the metadata map
//! and the index file. A crash mid-write leaves at most a stray temporary or
//! an unindexed file, both swept on the next open. Readers never lock:
//! rename is atomic, so a concurrent reader observes either the fully-old or
//! the fully-new payload. Writes to the same key are serialized by a per-key
//! mutex.
//!
//! # Eviction
//!
//! Once cumulative entry size exceeds the configured byte budget, entries
//! are evicted least-recently-used first. Pinned keys (current viewport,
//! in-flight downloads) are never evicted; if pressure cannot be relieved
//! because everything left is pinned, the write is rejected with
//! [`CacheError::FullUnevictable`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::telemetry::Metrics;

/// Index file magic.
const INDEX_MAGIC: &[u8; 4] = b"NLCX";
/// Index file format version.
const INDEX_VERSION: u16 = 1;
/// Index file name under the cache root.
const INDEX_FILE: &str = "cache.idx";
/// Subdirectory holding entry files.
const ENTRIES_DIR: &str = "entries";
/// Subdirectory holding in-progress writes.
const TMP_DIR: &str = "tmp";

/// Cache sizing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Byte budget for the disk store.
    pub max_size_bytes: u64,
    /// Byte budget for the memory working set.
    pub memory_max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 512 * 1024 * 1024,
            memory_max_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every remaining entry is pinned; the write is rejected until
    /// pressure relieves.
    #[error("cache full and unevictable: {needed} bytes needed, budget {budget}")]
    FullUnevictable { needed: u64, budget: u64 },

    /// The key cannot be mapped to a path inside the cache root.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Clone)]
struct EntryMeta {
    size: u64,
    last_access: u64,
    checksum: [u8; 32],
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    key: String,
    size: u64,
    checksum: [u8; 32],
}

/// Bounded disk + memory cache. See the module docs for semantics.
pub struct TileCache {
    root: PathBuf,
    config: CacheConfig,
    memory: moka::future::Cache<String, Bytes>,
    entries: DashMap<String, EntryMeta>,
    pins: DashMap<String, u32>,
    write_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    total_bytes: AtomicU64,
    clock: AtomicU64,
    metrics: Arc<Metrics>,
}

impl TileCache {
    /// Opens (or creates) a cache rooted at `root`.
    ///
    /// Sweeps leftover temporaries, validates the index file, drops entries
    /// whose backing file is missing or mis-sized, and deletes entry files
    /// that were never indexed (a crash between write and index update).
    pub fn open(root: impl Into<PathBuf>, config: CacheConfig) -> Result<Self, CacheError> {
        Self::open_with_metrics(root, config, Arc::new(Metrics::new()))
    }

    /// Like [`TileCache::open`] with shared pipeline metrics.
    pub fn open_with_metrics(
        root: impl Into<PathBuf>,
        config: CacheConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(root.join(ENTRIES_DIR))?;
        std::fs::create_dir_all(root.join(TMP_DIR))?;
        sweep_dir(&root.join(TMP_DIR));

        let memory = moka::future::Cache::builder()
            .max_capacity(config.memory_max_bytes)
            .weigher(|_key: &String, value: &Bytes| value.len().min(u32::MAX as usize) as u32)
            .build();

        let cache = Self {
            root,
            config,
            memory,
            entries: DashMap::new(),
            pins: DashMap::new(),
            write_locks: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            clock: AtomicU64::new(1),
            metrics,
        };
        cache.load_index();
        Ok(cache)
    }

    /// Pipeline metrics shared with this cache.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Cumulative size of all indexed entries in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Acquire)
    }

    /// Number of indexed entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// The configured disk byte budget.
    pub fn max_size_bytes(&self) -> u64 {
        self.config.max_size_bytes
    }

    /// Returns true if the key is present and visible.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Pins a key against eviction. Pins stack; every `pin` needs a
    /// matching [`TileCache::unpin`]. Pinning a key with no entry is
    /// allowed (an in-flight download pins before its write lands).
    pub fn pin(&self, key: &str) {
        *self.pins.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Releases one pin on a key.
    pub fn unpin(&self, key: &str) {
        if let Some(mut pins) = self.pins.get_mut(key) {
            *pins = pins.saturating_sub(1);
            if *pins == 0 {
                drop(pins);
                self.pins.remove_if(key, |_, count| *count == 0);
            }
        }
    }

    fn is_pinned(&self, key: &str) -> bool {
        self.pins.get(key).map(|p| *p > 0).unwrap_or(false)
    }

    /// Reads a key, promoting disk hits into the memory working set.
    ///
    /// A payload failing its checksum is dropped and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let checksum = match self.entries.get_mut(key) {
            Some(mut meta) => {
                meta.last_access = self.tick();
                meta.checksum
            }
            None => {
                self.metrics.cache_miss();
                return None;
            }
        };

        if let Some(bytes) = self.memory.get(key).await {
            self.metrics.cache_hit();
            return Some(bytes);
        }

        let path = match self.entry_path(key) {
            Ok(path) => path,
            Err(_) => return None,
        };
        let data = tokio::task::spawn_blocking(move || std::fs::read(&path))
            .await
            .ok()
            .and_then(|r| r.ok());
        let Some(data) = data else {
            warn!(key, "cache entry file unreadable, dropping entry");
            self.drop_entry(key).await;
            self.metrics.cache_miss();
            return None;
        };

        let actual: [u8; 32] = Sha256::digest(&data).into();
        if actual != checksum {
            warn!(key, "cache entry failed checksum, dropping entry");
            self.drop_entry(key).await;
            self.metrics.cache_miss();
            return None;
        }

        let bytes = Bytes::from(data);
        self.memory.insert(key.to_string(), bytes.clone()).await;
        self.metrics.cache_hit();
        Some(bytes)
    }

    /// Writes a key durably and makes it visible.
    ///
    /// Evicts least-recently-used unpinned entries first when the write
    /// would exceed the byte budget.
    pub async fn insert(&self, key: &str, payload: Bytes) -> Result<(), CacheError> {
        let final_path = self.entry_path(key)?;
        let lock = self.write_lock(key);
        let _guard = lock.lock().await;

        let old_size = self.entries.get(key).map(|m| m.size).unwrap_or(0);
        let new_size = payload.len() as u64;
        if new_size > old_size {
            self.ensure_capacity(new_size - old_size, key).await?;
        }

        let tmp_path = self
            .root
            .join(TMP_DIR)
            .join(format!("write-{}.tmp", self.tick()));
        let data = payload.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = final_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            {
                let mut file = std::fs::File::create(&tmp_path)?;
                use std::io::Write;
                file.write_all(&data)?;
                file.sync_all()?;
            }
            std::fs::rename(&tmp_path, &final_path)
        })
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))??;

        let checksum: [u8; 32] = Sha256::digest(&payload).into();
        self.entries.insert(
            key.to_string(),
            EntryMeta {
                size: new_size,
                last_access: self.tick(),
                checksum,
            },
        );
        if new_size >= old_size {
            self.total_bytes
                .fetch_add(new_size - old_size, Ordering::AcqRel);
        } else {
            self.total_bytes
                .fetch_sub(old_size - new_size, Ordering::AcqRel);
        }
        self.memory.insert(key.to_string(), payload).await;
        self.persist_index().await;
        debug!(key, size = new_size, "cache entry written");
        Ok(())
    }

    /// Removes a key. Returns true if it existed.
    pub async fn remove(&self, key: &str) -> bool {
        let lock = self.write_lock(key);
        let _guard = lock.lock().await;
        let existed = self.drop_entry(key).await;
        if existed {
            self.persist_index().await;
        }
        existed
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn write_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        let mut path = self.root.join(ENTRIES_DIR);
        for part in key.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(CacheError::InvalidKey(key.to_string()));
            }
            path.push(part);
        }
        Ok(path)
    }

    /// Evicts LRU unpinned entries until `additional` bytes fit.
    async fn ensure_capacity(&self, additional: u64, incoming: &str) -> Result<(), CacheError> {
        while self.total_bytes() + additional > self.config.max_size_bytes {
            let victim = self
                .entries
                .iter()
                .filter(|entry| entry.key() != incoming && !self.is_pinned(entry.key()))
                .min_by_key(|entry| entry.value().last_access)
                .map(|entry| entry.key().clone());
            let Some(victim) = victim else {
                return Err(CacheError::FullUnevictable {
                    needed: additional,
                    budget: self.config.max_size_bytes,
                });
            };
            if self.drop_entry(&victim).await {
                self.metrics.eviction();
                debug!(key = %victim, "evicted cache entry");
            }
        }
        Ok(())
    }

    /// Removes an entry's metadata, memory copy, and backing file.
    async fn drop_entry(&self, key: &str) -> bool {
        let Some((_, meta)) = self.entries.remove(key) else {
            return false;
        };
        self.total_bytes.fetch_sub(meta.size, Ordering::AcqRel);
        self.memory.invalidate(key).await;
        if let Ok(path) = self.entry_path(key) {
            let _ = tokio::task::spawn_blocking(move || std::fs::remove_file(path)).await;
        }
        true
    }

    /// Rebuilds in-memory metadata from the index file, dropping anything
    /// that fails validation and deleting unindexed entry files.
    fn load_index(&self) {
        let records = match read_index_file(&self.root.join(INDEX_FILE)) {
            Ok(records) => records,
            Err(reason) => {
                warn!(reason, "cache index unreadable, starting empty");
                sweep_dir_recursive(&self.root.join(ENTRIES_DIR));
                return;
            }
        };

        let mut total = 0u64;
        for record in records {
            let Ok(path) = self.entry_path(&record.key) else {
                continue;
            };
            match std::fs::metadata(&path) {
                Ok(meta) if meta.len() == record.size => {
                    total += record.size;
                    self.entries.insert(
                        record.key,
                        EntryMeta {
                            size: record.size,
                            last_access: 0,
                            checksum: record.checksum,
                        },
                    );
                }
                _ => {
                    debug!(key = %record.key, "dropping invalid cache entry");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        self.total_bytes.store(total, Ordering::Release);
        self.sweep_unindexed(&self.root.join(ENTRIES_DIR), &mut Vec::new());
        debug!(
            entries = self.entries.len(),
            bytes = total,
            "cache index loaded"
        );
    }

    /// Deletes entry files that are not in the index (never made visible).
    fn sweep_unindexed(&self, dir: &Path, key_parts: &mut Vec<String>) {
        let Ok(read_dir) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            key_parts.push(name);
            if path.is_dir() {
                self.sweep_unindexed(&path, key_parts);
            } else {
                let key = key_parts.join("/");
                if !self.entries.contains_key(&key) {
                    debug!(key, "sweeping unindexed cache file");
                    let _ = std::fs::remove_file(&path);
                }
            }
            key_parts.pop();
        }
    }

    /// Writes the index file (magic, version, count, record list)
    /// atomically via a temporary.
    async fn persist_index(&self) {
        let mut records: Vec<IndexRecord> = self
            .entries
            .iter()
            .map(|entry| IndexRecord {
                key: entry.key().clone(),
                size: entry.value().size,
                checksum: entry.value().checksum,
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));

        let index_path = self.root.join(INDEX_FILE);
        let tmp_path = self
            .root
            .join(TMP_DIR)
            .join(format!("cache.idx.{}.tmp", self.tick()));
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut buf = Vec::new();
            buf.extend_from_slice(INDEX_MAGIC);
            buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
            buf.extend_from_slice(&(records.len() as u32).to_le_bytes());
            let body = bincode::serialize(&records)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            buf.extend_from_slice(&body);
            std::fs::write(&tmp_path, &buf)?;
            std::fs::rename(&tmp_path, &index_path)
        })
        .await;
        if let Ok(Err(error)) = result {
            warn!(%error, "failed to persist cache index");
        }
    }
}

fn read_index_file(path: &Path) -> Result<Vec<IndexRecord>, &'static str> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(_) => return Err("io error"),
    };
    if data.len() < 10 || &data[0..4] != INDEX_MAGIC {
        return Err("bad magic");
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != INDEX_VERSION {
        return Err("unsupported version");
    }
    let count = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let records: Vec<IndexRecord> =
        bincode::deserialize(&data[10..]).map_err(|_| "undecodable records")?;
    if records.len() != count {
        return Err("entry count mismatch");
    }
    Ok(records)
}

/// Deletes every file directly inside `dir`.
fn sweep_dir(dir: &Path) {
    if let Ok(read_dir) = std::fs::read_dir(dir) {
        for entry in read_dir.flatten() {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

/// Deletes every file below `dir`, keeping directories.
fn sweep_dir_recursive(dir: &Path) {
    if let Ok(read_dir) = std::fs::read_dir(dir) {
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() {
                sweep_dir_recursive(&path);
            } else {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}
