//! Per-dependency circuit breaker with persisted state
//!
//! Two states only: a dependency is OPEN while it has at least `threshold`
//! recorded failures and the last one happened less than `timeout` ago,
//! otherwise CLOSED. There is no half-open trial call: once the timeout
//! elapses the next check reports CLOSED.
//!
//! ```text
//! CLOSED --record_failure (count >= threshold)--> OPEN
//! OPEN   --record_success------------------------> CLOSED
//! OPEN   --now - last_failure_at >= timeout------> CLOSED
//! ```
//!
//! Each dependency is one JSON file under the circuit directory, written
//! atomically. Records that fail to parse are removed and treated as absent.
//! Two processes updating the same dependency concurrently may race at the
//! check-then-act level; a single pipeline run is expected to own a name.

use crate::artifact::{discard_unreadable, AtomicArtifactWriter};
use crate::config::schema::CircuitConfig;
use crate::error::{CardkeepError, CardkeepResult};
use crate::naming::DependencyName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Derived circuit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Persisted failure record for one dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitRecord {
    /// Dependency name as given by the caller
    pub dependency: String,

    /// Failures since the last success
    pub failure_count: u32,

    /// When the most recent failure was recorded
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Store of circuit records, one file per dependency
pub struct CircuitBreakerStore {
    dir: PathBuf,
    threshold: u32,
    timeout: Duration,
    writer: AtomicArtifactWriter,
}

impl CircuitBreakerStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>, threshold: u32, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            threshold: threshold.max(1),
            timeout,
            writer: AtomicArtifactWriter::new(),
        }
    }

    /// Create a store from configuration
    pub fn from_config(dir: impl Into<PathBuf>, config: &CircuitConfig) -> Self {
        Self::new(dir, config.failure_threshold, config.open_timeout())
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether calls to `name` should be skipped right now
    pub async fn is_open(&self, name: &str) -> CardkeepResult<bool> {
        self.is_open_at(name, Utc::now()).await
    }

    /// Whether calls to `name` should be skipped at `now`
    pub async fn is_open_at(&self, name: &str, now: DateTime<Utc>) -> CardkeepResult<bool> {
        Ok(self.state_at(name, now).await? == CircuitState::Open)
    }

    /// Current state for `name` at `now`
    pub async fn state_at(&self, name: &str, now: DateTime<Utc>) -> CardkeepResult<CircuitState> {
        let name = DependencyName::new(name)?;
        let state = match self.load(&name).await? {
            Some(record) => self.evaluate(&record, now),
            None => CircuitState::Closed,
        };
        Ok(state)
    }

    /// Record a failed call to `name`
    pub async fn record_failure(&self, name: &str) -> CardkeepResult<CircuitRecord> {
        self.record_failure_at(name, Utc::now()).await
    }

    /// Record a failed call to `name` that happened at `now`
    pub async fn record_failure_at(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> CardkeepResult<CircuitRecord> {
        let name = DependencyName::new(name)?;
        let mut record = self.load(&name).await?.unwrap_or_else(|| CircuitRecord {
            dependency: name.as_str().to_string(),
            failure_count: 0,
            last_failure_at: None,
        });

        record.failure_count = record.failure_count.saturating_add(1);
        record.last_failure_at = Some(now);

        self.writer.write_json(&self.record_path(&name), &record).await?;

        if record.failure_count == self.threshold {
            warn!(
                "Circuit for {} opened after {} consecutive failures",
                name, record.failure_count
            );
        } else {
            debug!("{} failure count is now {}", name, record.failure_count);
        }
        Ok(record)
    }

    /// Record a successful call to `name`, fully resetting its record
    pub async fn record_success(&self, name: &str) -> CardkeepResult<()> {
        let name = DependencyName::new(name)?;
        let path = self.record_path(&name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Circuit for {} reset after success", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CardkeepError::io(
                format!("removing circuit record {}", path.display()),
                e,
            )),
        }
    }

    /// Read the raw record for `name`, if any
    pub async fn record(&self, name: &str) -> CardkeepResult<Option<CircuitRecord>> {
        let name = DependencyName::new(name)?;
        self.load(&name).await
    }

    /// All stored records with their state at `now`
    pub async fn list_at(
        &self,
        now: DateTime<Utc>,
    ) -> CardkeepResult<Vec<(CircuitRecord, CircuitState)>> {
        let mut out = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(CardkeepError::io("reading circuit directory", e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CardkeepError::io("reading circuit entry", e))?
        {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(name) = DependencyName::new(stem) else {
                continue;
            };
            if let Some(record) = self.load(&name).await? {
                let state = self.evaluate(&record, now);
                out.push((record, state));
            }
        }

        out.sort_by(|a, b| a.0.dependency.cmp(&b.0.dependency));
        Ok(out)
    }

    fn evaluate(&self, record: &CircuitRecord, now: DateTime<Utc>) -> CircuitState {
        if record.failure_count < self.threshold {
            return CircuitState::Closed;
        }
        let Some(last) = record.last_failure_at else {
            return CircuitState::Closed;
        };
        let elapsed = now.signed_duration_since(last);
        // Negative elapsed (clock skew) counts as within the timeout
        match elapsed.to_std() {
            Ok(elapsed) if elapsed >= self.timeout => CircuitState::Closed,
            _ => CircuitState::Open,
        }
    }

    async fn load(&self, name: &DependencyName) -> CardkeepResult<Option<CircuitRecord>> {
        let path = self.record_path(name);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CardkeepError::io(
                    format!("reading circuit record {}", path.display()),
                    e,
                ))
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(
                    "Discarding unreadable circuit record {}: {}",
                    path.display(),
                    e
                );
                discard_unreadable(&path).await;
                Ok(None)
            }
        }
    }

    fn record_path(&self, name: &DependencyName) -> PathBuf {
        self.dir.join(format!("{}.json", name.key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn test_store(threshold: u32, timeout_secs: u64) -> (CircuitBreakerStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = CircuitBreakerStore::new(
            temp.path().join("circuit"),
            threshold,
            Duration::from_secs(timeout_secs),
        );
        (store, temp)
    }

    #[tokio::test]
    async fn unknown_dependency_is_closed() {
        let (store, _temp) = test_store(3, 60);
        assert!(!store.is_open("never-seen").await.unwrap());
        assert!(store.record("never-seen").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn opens_at_threshold() {
        let (store, _temp) = test_store(3, 60);
        let now = Utc::now();

        store.record_failure_at("github", now).await.unwrap();
        store.record_failure_at("github", now).await.unwrap();
        assert!(!store.is_open_at("github", now).await.unwrap());

        let record = store.record_failure_at("github", now).await.unwrap();
        assert_eq!(record.failure_count, 3);
        assert!(store.is_open_at("github", now).await.unwrap());
    }

    #[tokio::test]
    async fn success_resets_regardless_of_count() {
        let (store, _temp) = test_store(2, 60);
        let now = Utc::now();

        for _ in 0..5 {
            store.record_failure_at("oura", now).await.unwrap();
        }
        assert!(store.is_open_at("oura", now).await.unwrap());

        store.record_success("oura").await.unwrap();
        assert!(!store.is_open_at("oura", now).await.unwrap());
        assert!(store.record("oura").await.unwrap().is_none());

        // Counting starts over
        let record = store.record_failure_at("oura", now).await.unwrap();
        assert_eq!(record.failure_count, 1);
    }

    #[tokio::test]
    async fn closes_after_timeout_without_success() {
        let (store, _temp) = test_store(2, 5);
        let t0 = Utc::now();

        store.record_failure_at("x", t0).await.unwrap();
        store.record_failure_at("x", t0).await.unwrap();
        assert!(store.is_open_at("x", t0).await.unwrap());
        assert!(store
            .is_open_at("x", t0 + ChronoDuration::seconds(4))
            .await
            .unwrap());
        assert!(!store
            .is_open_at("x", t0 + ChronoDuration::seconds(6))
            .await
            .unwrap());
        // Boundary: exactly `timeout` elapsed is closed
        assert!(!store
            .is_open_at("x", t0 + ChronoDuration::seconds(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn failure_after_timeout_reopens_immediately() {
        let (store, _temp) = test_store(2, 5);
        let t0 = Utc::now();

        store.record_failure_at("x", t0).await.unwrap();
        store.record_failure_at("x", t0).await.unwrap();

        let t1 = t0 + ChronoDuration::seconds(10);
        assert!(!store.is_open_at("x", t1).await.unwrap());

        // No half-open trial: one more failure keeps count above threshold
        store.record_failure_at("x", t1).await.unwrap();
        assert!(store.is_open_at("x", t1).await.unwrap());
    }

    #[tokio::test]
    async fn names_are_isolated() {
        let (store, _temp) = test_store(1, 60);
        let now = Utc::now();

        store.record_failure_at("weather-api", now).await.unwrap();
        assert!(store.is_open_at("weather-api", now).await.unwrap());
        assert!(!store.is_open_at("github", now).await.unwrap());

        store.record_success("github").await.unwrap();
        assert!(store.is_open_at("weather-api", now).await.unwrap());
    }

    #[tokio::test]
    async fn names_are_sanitized_for_storage() {
        let (store, temp) = test_store(1, 60);

        store.record_failure("Weather API").await.unwrap();

        assert!(temp.path().join("circuit").join("weather-api.json").exists());
        let record = store.record("weather api").await.unwrap().unwrap();
        assert_eq!(record.dependency, "Weather API");
    }

    #[tokio::test]
    async fn invalid_name_is_rejected() {
        let (store, _temp) = test_store(1, 60);
        assert!(matches!(
            store.record_failure("../..").await,
            Err(CardkeepError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_record_self_heals() {
        let (store, temp) = test_store(1, 60);
        let dir = temp.path().join("circuit");
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("quote.json"), b"{\"failure_count\": ")
            .await
            .unwrap();

        assert!(!store.is_open("quote").await.unwrap());
        assert!(!dir.join("quote.json").exists());
    }

    #[tokio::test]
    async fn lists_records_with_state() {
        let (store, _temp) = test_store(2, 60);
        let now = Utc::now();

        store.record_failure_at("b-service", now).await.unwrap();
        store.record_failure_at("a-service", now).await.unwrap();
        store.record_failure_at("a-service", now).await.unwrap();

        let list = store.list_at(now).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].0.dependency, "a-service");
        assert_eq!(list[0].1, CircuitState::Open);
        assert_eq!(list[1].1, CircuitState::Closed);
    }

    #[tokio::test]
    async fn list_of_missing_dir_is_empty() {
        let (store, _temp) = test_store(2, 60);
        assert!(store.list_at(Utc::now()).await.unwrap().is_empty());
    }
}
