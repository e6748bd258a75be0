//! TTL-bounded response cache
//!
//! Keeps the last successful payload for each `(namespace, key)` so a source
//! can skip a fetch while the entry is fresh, or fall back to it when the
//! dependency is down.
//!
//! # Layout
//!
//! `<cache_dir>/<namespace>/<key_hash>.entry`, where the namespace is
//! sanitized and `key_hash` comes from [`key::key_hash`]. The entry's age is
//! taken from the file's modification time.
//!
//! # Self-healing
//!
//! | On read | Result |
//! |---------|--------|
//! | no file | miss |
//! | age >= TTL | removed, miss |
//! | fails validation | removed, miss |
//! | otherwise | hit |

pub mod key;

pub use key::key_hash;

use crate::artifact::{is_temp_file, AtomicArtifactWriter, Validate, Validator};
use crate::error::{CardkeepError, CardkeepResult};
use crate::naming::sanitize;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

const ENTRY_EXT: &str = "entry";

/// Keyed, TTL-bounded copies of prior successful fetches
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
    validator: Validator,
    writer: AtomicArtifactWriter,
}

impl ResponseCache {
    /// Create a cache rooted at `dir`; payloads are validated as JSON
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            validator: Validator::Json,
            writer: AtomicArtifactWriter::new(),
        }
    }

    /// Use a different validity check for payloads
    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Use a different TTL
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fresh, valid payload
    pub async fn get(&self, namespace: &str, key: &str) -> CardkeepResult<Option<String>> {
        self.get_at(namespace, key, Utc::now()).await
    }

    /// Look up a payload as of `now`
    pub async fn get_at(
        &self,
        namespace: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> CardkeepResult<Option<String>> {
        let path = self.entry_path(namespace, key)?;

        let modified = match fs::metadata(&path).await {
            Ok(meta) => meta
                .modified()
                .map_err(|e| CardkeepError::io(format!("reading mtime of {}", path.display()), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cache miss for {}/{}", namespace, key);
                return Ok(None);
            }
            Err(e) => {
                return Err(CardkeepError::io(
                    format!("reading cache entry {}", path.display()),
                    e,
                ))
            }
        };

        if self.is_stale(DateTime::<Utc>::from(modified), now) {
            debug!("Cache entry for {}/{} expired", namespace, key);
            remove_entry(&path).await?;
            return Ok(None);
        }

        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CardkeepError::io(
                    format!("reading cache entry {}", path.display()),
                    e,
                ))
            }
        };

        if let Err(reason) = self.validator.validate(&content) {
            warn!(
                "Discarding invalid cache entry for {}/{}: {}",
                namespace, key, reason
            );
            remove_entry(&path).await?;
            return Ok(None);
        }

        match String::from_utf8(content) {
            Ok(payload) => {
                debug!("Cache hit for {}/{}", namespace, key);
                Ok(Some(payload))
            }
            Err(_) => {
                warn!("Discarding non-UTF-8 cache entry for {}/{}", namespace, key);
                remove_entry(&path).await?;
                Ok(None)
            }
        }
    }

    /// Store a payload, replacing any previous entry atomically
    pub async fn put(&self, namespace: &str, key: &str, payload: &str) -> CardkeepResult<()> {
        let path = self.entry_path(namespace, key)?;
        self.writer
            .write(&path, payload.as_bytes(), self.validator)
            .await?;
        debug!("Cached {}/{} ({} bytes)", namespace, key, payload.len());
        Ok(())
    }

    /// Remove one entry if present
    pub async fn remove(&self, namespace: &str, key: &str) -> CardkeepResult<()> {
        let path = self.entry_path(namespace, key)?;
        remove_entry(&path).await
    }

    /// Remove every entry in `namespace`, or the whole cache if `None`
    pub async fn clear(&self, namespace: Option<&str>) -> CardkeepResult<u32> {
        let dirs = match namespace {
            Some(ns) => vec![self.dir.join(sanitize(ns)?)],
            None => self.namespace_dirs().await?,
        };

        let mut removed = 0;
        for dir in dirs {
            for path in list_files(&dir).await? {
                remove_entry(&path).await?;
                removed += 1;
            }
        }

        info!("Cleared {} cache file(s)", removed);
        Ok(removed)
    }

    /// Remove expired entries and abandoned temp files
    pub async fn purge_expired(&self) -> CardkeepResult<u32> {
        self.purge_expired_at(Utc::now()).await
    }

    /// Remove entries that are expired as of `now`
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> CardkeepResult<u32> {
        let mut removed = 0;

        for dir in self.namespace_dirs().await? {
            for path in list_files(&dir).await? {
                if is_temp_file(&path) || !self.entry_is_usable(&path, now).await {
                    remove_entry(&path).await?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!("Purged {} cache file(s)", removed);
        }
        Ok(removed)
    }

    async fn entry_is_usable(&self, path: &Path, now: DateTime<Utc>) -> bool {
        if path.extension().is_none_or(|ext| ext != ENTRY_EXT) {
            return false;
        }
        let Ok(meta) = fs::metadata(path).await else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        // Payload format is namespace-specific, so validity is left to `get`
        !self.is_stale(DateTime::<Utc>::from(modified), now)
    }

    fn is_stale(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.ttl.is_zero() {
            return true;
        }
        match now.signed_duration_since(stored_at).to_std() {
            Ok(age) => age >= self.ttl,
            // Written "in the future" relative to `now`: age is zero
            Err(_) => false,
        }
    }

    fn entry_path(&self, namespace: &str, key: &str) -> CardkeepResult<PathBuf> {
        Ok(self
            .dir
            .join(sanitize(namespace)?)
            .join(format!("{}.{}", key_hash(key), ENTRY_EXT)))
    }

    async fn namespace_dirs(&self) -> CardkeepResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(CardkeepError::io("reading cache directory", e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CardkeepError::io("reading cache entry", e))?
        {
            if entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

async fn list_files(dir: &Path) -> CardkeepResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => {
            return Err(CardkeepError::io(
                format!("reading cache namespace {}", dir.display()),
                e,
            ))
        }
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CardkeepError::io("reading cache entry", e))?
    {
        if entry.path().is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}

async fn remove_entry(path: &Path) -> CardkeepResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CardkeepError::io(
            format!("removing cache file {}", path.display()),
            e,
        )),
    }
}
