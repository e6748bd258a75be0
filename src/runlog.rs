//! Run history of fetch and generation steps
//!
//! Every step appends one [`RunEntry`] as a JSON line to
//! `<state_dir>/runs.log`. [`summarize`] folds the history into per-step
//! counts (runs, successes, the current failure streak) so an outage that
//! is being masked by fallbacks still shows up.

use crate::config::{schema::Config, ConfigManager};
use crate::error::{CardkeepError, CardkeepResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Consecutive failures after which a step is flagged
pub const ATTENTION_STREAK: u32 = 3;

/// Which flow produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Fetch,
    Generate,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Generate => write!(f, "generate"),
        }
    }
}

/// One finished step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    pub at: DateTime<Utc>,
    pub kind: StepKind,
    /// Dependency name for fetches, record key for generation
    pub name: String,
    /// Outcome label, e.g. `fresh`, `fallback`, `skipped`
    pub outcome: String,
    /// Whether the step did its job (a fallback did not)
    pub ok: bool,
    pub output: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl RunEntry {
    pub fn new(
        kind: StepKind,
        name: impl Into<String>,
        outcome: &str,
        ok: bool,
        output: &Path,
    ) -> Self {
        Self {
            at: Utc::now(),
            kind,
            name: name.into(),
            outcome: outcome.to_string(),
            ok,
            output: output.to_path_buf(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Option<String>) -> Self {
        self.cause = cause;
        self
    }
}

/// Aggregated history of one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub kind: StepKind,
    pub name: String,
    pub runs: u32,
    pub ok_runs: u32,
    /// Failures since the last success
    pub failure_streak: u32,
    pub last_outcome: String,
    pub last_at: DateTime<Utc>,
    pub last_cause: Option<String>,
}

impl StepSummary {
    fn start(entry: &RunEntry) -> Self {
        Self {
            kind: entry.kind,
            name: entry.name.clone(),
            runs: 0,
            ok_runs: 0,
            failure_streak: 0,
            last_outcome: String::new(),
            last_at: entry.at,
            last_cause: None,
        }
    }

    fn add(&mut self, entry: &RunEntry) {
        self.runs += 1;
        if entry.ok {
            self.ok_runs += 1;
            self.failure_streak = 0;
        } else {
            self.failure_streak += 1;
        }
        self.last_outcome = entry.outcome.clone();
        self.last_at = entry.at;
        self.last_cause = entry.cause.clone();
    }

    /// Share of successful runs, 0.0..=100.0
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        f64::from(self.ok_runs) * 100.0 / f64::from(self.runs)
    }

    pub fn needs_attention(&self) -> bool {
        self.failure_streak >= ATTENTION_STREAK
    }
}

/// Fold entries (oldest first) into one summary per step, ordered by kind
/// then name
pub fn summarize(entries: &[RunEntry]) -> Vec<StepSummary> {
    let mut steps: BTreeMap<(StepKind, &str), StepSummary> = BTreeMap::new();
    for entry in entries {
        steps
            .entry((entry.kind, entry.name.as_str()))
            .or_insert_with(|| StepSummary::start(entry))
            .add(entry);
    }
    steps.into_values().collect()
}

/// Append-only run history
pub struct RunLog {
    /// `None` when recording is turned off
    path: Option<PathBuf>,
}

impl RunLog {
    pub fn new(config: &Config) -> Self {
        Self {
            path: config
                .general
                .run_log
                .then(|| ConfigManager::run_log_path(config)),
        }
    }

    /// Record to `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A log that records nothing
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Append `entry`. Failures are logged; the history never fails a step.
    pub async fn append(&self, entry: &RunEntry) {
        let Some(path) = &self.path else {
            return;
        };

        let mut line = match serde_json::to_vec(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize run entry for {}: {}", entry.name, e);
                return;
            }
        };
        line.push(b'\n');

        if let Err(e) = append_line(path, &line).await {
            warn!("Failed to write run log {}: {}", path.display(), e);
        }
    }

    /// Read every entry at `path`, oldest first. Unreadable lines are skipped.
    pub async fn read(path: &Path) -> CardkeepResult<Vec<RunEntry>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CardkeepError::io(
                    format!("reading run log {}", path.display()),
                    e,
                ))
            }
        };

        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping run log line {}: {}", n + 1, e),
            }
        }
        Ok(entries)
    }
}

async fn append_line(path: &Path, line: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line).await?;
    file.flush().await
}
