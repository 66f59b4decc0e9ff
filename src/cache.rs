//! On-disk cache of Immich API responses.
//!
//! Fetching an album re-downloads every original in it, which is slow and
//! puts load on the photo server. This cache lets repeated builds reuse
//! responses for the configured [`CacheDuration`].
//!
//! # Design
//!
//! The cache is **content-addressed by request**: the key is a SHA-256 of
//! the URL and the `accept` type, so the JSON metadata and the binary
//! original of one asset never collide even though they share an id.
//!
//! Each entry is two files in the cache directory:
//!
//! - `immich-{key}`: the raw response body
//! - `immich-{key}.json`: sidecar with url, accept type and fetch time
//!
//! A hit requires a readable sidecar that matches the request, a fetch time
//! within the cache duration, and the body file. Anything else (missing,
//! corrupt, stale, other version) is a miss and triggers a refetch.
//!
//! Both files are written to a temporary name and renamed into place, body
//! first, so a sidecar always describes a complete body.
//!
//! ## Bypassing the cache
//!
//! [`ResponseCache::disabled`] (`--no-cache` on the CLI) never reads or
//! writes anything.

use crate::config::CacheDuration;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Version of the sidecar format. Bump this to invalidate existing caches
/// when the format or key computation changes.
const ENTRY_VERSION: u32 = 1;

const FILE_PREFIX: &str = "immich-";

/// Sidecar describing one cached response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub version: u32,
    pub url: String,
    pub accept: String,
    /// Seconds since the Unix epoch.
    pub fetched_at: u64,
}

/// Disk-backed response cache. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct ResponseCache {
    dir: Option<PathBuf>,
    duration: CacheDuration,
    hits: AtomicU32,
    misses: AtomicU32,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, duration: CacheDuration) -> Self {
        Self {
            dir: Some(dir.into()),
            duration,
            hits: AtomicU32::new(0),
            misses: AtomicU32::new(0),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            duration: CacheDuration::Ttl(Duration::ZERO),
            hits: AtomicU32::new(0),
            misses: AtomicU32::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Return the cached body for a request, if present and fresh.
    pub async fn get(&self, url: &str, accept: &str) -> Option<Bytes> {
        let dir = self.dir.as_deref()?;
        let found = lookup(dir, self.duration, url, accept).await;
        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(url, accept, "cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(url, accept, "cache miss");
            }
        }
        found
    }

    /// Store a response body. A disabled cache accepts and drops it.
    pub async fn put(&self, url: &str, accept: &str, body: &[u8]) -> io::Result<()> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;

        let (body_path, entry_path) = entry_paths(dir, &cache_key(url, accept));
        let entry = CacheEntry {
            version: ENTRY_VERSION,
            url: url.to_string(),
            accept: accept.to_string(),
            fetched_at: unix_now(),
        };
        let sidecar = serde_json::to_vec_pretty(&entry)?;

        write_atomic(&body_path, body).await?;
        write_atomic(&entry_path, &sidecar).await
    }

    /// Snapshot of hit/miss counters since construction.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

async fn lookup(dir: &Path, duration: CacheDuration, url: &str, accept: &str) -> Option<Bytes> {
    let (body_path, entry_path) = entry_paths(dir, &cache_key(url, accept));

    let sidecar = tokio::fs::read(&entry_path).await.ok()?;
    let entry: CacheEntry = serde_json::from_slice(&sidecar).ok()?;
    if entry.version != ENTRY_VERSION || entry.url != url || entry.accept != accept {
        return None;
    }
    let age = Duration::from_secs(unix_now().saturating_sub(entry.fetched_at));
    if !duration.is_fresh(age) {
        return None;
    }
    tokio::fs::read(&body_path).await.ok().map(Bytes::from)
}

/// SHA-256 of the request identity (URL + accept type), as hex.
pub fn cache_key(url: &str, accept: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\0");
    hasher.update(accept.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn entry_paths(dir: &Path, key: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{FILE_PREFIX}{key}")),
        dir.join(format!("{FILE_PREFIX}{key}.json")),
    )
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}-{}.tmp", std::process::id(), seq));
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Summary of cache performance for a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} fetched ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} fetched", self.misses)
        }
    }
}
