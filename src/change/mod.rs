//! Hash-based change detection for incremental regeneration
//!
//! The content hash of a generation step is SHA256 over the generator's
//! fingerprint followed by every declared input, in the declared order.
//! JSON inputs are normalized (sorted keys, compact) first so reformatting a
//! snapshot does not count as a change.
//!
//! Records are keyed per artifact, not per generator: one script rendering
//! several cards keeps one record per card. The default key is the generator
//! id plus the output path (see [`task_key`]); callers may supply their own.
//!
//! A step is skipped only when a hash record exists, it matches the fresh
//! hash, and the output artifact is present. Records are advanced only after
//! a successful generation, so failures are retried on the next run.

pub mod generator;

pub use generator::{CommandGenerator, Generator, GeneratorAllowList};

use crate::artifact::{discard_unreadable, AtomicArtifactWriter};
use crate::cache::key_hash;
use crate::error::{CardkeepError, CardkeepResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Persisted hash of the last successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    /// Record key, one per generated artifact
    pub key: String,
    pub generator_id: String,
    pub content_hash: String,
    pub recorded_at: DateTime<Utc>,
}

/// Why a step needs to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No hash record for this artifact
    NoRecord,
    /// Generator or inputs changed since the last success
    HashChanged,
    /// The output artifact is missing on disk
    OutputMissing,
    /// A declared input is missing, so no hash could be computed
    InputMissing,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoRecord => "no previous record",
            Self::HashChanged => "inputs changed",
            Self::OutputMissing => "output missing",
            Self::InputMissing => "input missing",
        };
        write!(f, "{}", text)
    }
}

/// Result of comparing the fresh hash to the stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Nothing to do
    UpToDate { hash: String },
    /// Must regenerate; `hash` is what to record on success, if computable
    Stale {
        reason: StaleReason,
        hash: Option<String>,
    },
}

impl Freshness {
    pub fn needs_regeneration(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::UpToDate { hash } => Some(hash),
            Self::Stale { hash, .. } => hash.as_deref(),
        }
    }
}

/// Default record key for `generator_id` producing `output`
pub fn task_key(generator_id: &str, output: &Path) -> String {
    format!("{}:{}", generator_id, output.display())
}

/// Computes and persists per-artifact content hashes
pub struct ChangeDetector {
    dir: PathBuf,
    writer: AtomicArtifactWriter,
}

impl ChangeDetector {
    /// Create a detector storing records under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writer: AtomicArtifactWriter::new(),
        }
    }

    /// Hash the generator fingerprint and inputs, in order.
    ///
    /// Fails with `PathNotFound` if an input does not exist.
    pub async fn compute_hash(
        &self,
        generator: &dyn Generator,
        inputs: &[PathBuf],
    ) -> CardkeepResult<String> {
        let fingerprint = generator.fingerprint().await?;
        hash_contents(&fingerprint, inputs).await
    }

    /// Whether the step recorded under `key` must run
    pub async fn should_regenerate(
        &self,
        key: &str,
        generator: &dyn Generator,
        inputs: &[PathBuf],
        output: &Path,
    ) -> CardkeepResult<bool> {
        Ok(self
            .check(key, generator, inputs, output)
            .await?
            .needs_regeneration())
    }

    /// Compare the fresh hash with the record under `key` and the output on disk
    pub async fn check(
        &self,
        key: &str,
        generator: &dyn Generator,
        inputs: &[PathBuf],
        output: &Path,
    ) -> CardkeepResult<Freshness> {
        let hash = match self.compute_hash(generator, inputs).await {
            Ok(hash) => hash,
            Err(CardkeepError::PathNotFound(path)) => {
                warn!(
                    "Input {} for {} is missing",
                    path.display(),
                    generator.id()
                );
                return Ok(Freshness::Stale {
                    reason: StaleReason::InputMissing,
                    hash: None,
                });
            }
            Err(e) => return Err(e),
        };

        let stored = self.stored_hash(key).await?;

        let reason = match stored {
            None => Some(StaleReason::NoRecord),
            Some(ref stored) if *stored != hash => Some(StaleReason::HashChanged),
            Some(_) if !fs::try_exists(output).await.unwrap_or(false) => {
                Some(StaleReason::OutputMissing)
            }
            Some(_) => None,
        };

        Ok(match reason {
            Some(reason) => {
                debug!("{} needs regeneration: {}", key, reason);
                Freshness::Stale {
                    reason,
                    hash: Some(hash),
                }
            }
            None => {
                debug!("{} is up to date", key);
                Freshness::UpToDate { hash }
            }
        })
    }

    /// Persist `hash` under `key` after a confirmed successful generation
    pub async fn record_success(
        &self,
        key: &str,
        generator_id: &str,
        hash: &str,
    ) -> CardkeepResult<()> {
        let record = HashRecord {
            key: key.to_string(),
            generator_id: generator_id.to_string(),
            content_hash: hash.to_string(),
            recorded_at: Utc::now(),
        };
        self.writer
            .write_json(&self.record_path(key)?, &record)
            .await?;
        debug!("Recorded hash for {}", key);
        Ok(())
    }

    /// Hash from the last successful generation under `key`, if any
    pub async fn stored_hash(&self, key: &str) -> CardkeepResult<Option<String>> {
        let path = self.record_path(key)?;

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CardkeepError::io(
                    format!("reading hash record {}", path.display()),
                    e,
                ))
            }
        };

        match serde_json::from_str::<HashRecord>(&content) {
            Ok(record) if record.key == key => Ok(Some(record.content_hash)),
            Ok(record) => {
                warn!(
                    "Hash record {} belongs to {}, not {}",
                    path.display(),
                    record.key,
                    key
                );
                Ok(None)
            }
            Err(e) => {
                warn!("Discarding unreadable hash record {}: {}", path.display(), e);
                discard_unreadable(&path).await;
                Ok(None)
            }
        }
    }

    /// Forget the record under `key`, forcing the next run to regenerate
    pub async fn invalidate(&self, key: &str) -> CardkeepResult<()> {
        let path = self.record_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CardkeepError::io(
                format!("removing hash record {}", path.display()),
                e,
            )),
        }
    }

    fn record_path(&self, key: &str) -> CardkeepResult<PathBuf> {
        if key.trim().is_empty() {
            return Err(CardkeepError::InvalidName(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key_hash(key))))
    }
}

/// SHA256 over `identity` followed by each input's (normalized) content
pub async fn hash_contents(identity: &[u8], inputs: &[PathBuf]) -> CardkeepResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(identity);

    for input in inputs {
        let content = match fs::read(input).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CardkeepError::PathNotFound(input.clone()))
            }
            Err(e) => {
                return Err(CardkeepError::io(
                    format!("reading input {}", input.display()),
                    e,
                ))
            }
        };
        hasher.update(normalize(input, content));
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Canonical form of JSON inputs; anything else is hashed as-is
fn normalize(path: &Path, content: Vec<u8>) -> Vec<u8> {
    if path.extension().is_some_and(|ext| ext == "json") {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&content) {
            if let Ok(canonical) = serde_json::to_vec(&value) {
                return canonical;
            }
        }
    }
    content
}
