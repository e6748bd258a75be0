//! Per-source orchestration
//!
//! Fetch flow for one data source:
//!
//! ```text
//! cache hit? ──yes──> write snapshot ─────────────────────────> Cached
//!    │ no
//! circuit open? ──yes──> keep previous snapshot ──────────────> Fallback / Unavailable
//!    │ no
//! fetch with backoff ──ok──> write snapshot, cache, reset circuit > Fresh
//!    │ exhausted / invalid
//! record failure, keep previous snapshot ─────────────────────> Fallback / Unavailable
//! ```
//!
//! Generation flow: change check, generator, validated atomic write, then
//! the hash record is advanced. Any failure leaves the previous artifact and
//! the previous hash record in place.

use crate::artifact::{AtomicArtifactWriter, Validate, Validator};
use crate::cache::ResponseCache;
use crate::change::{task_key, ChangeDetector, Freshness, Generator};
use crate::circuit::CircuitBreakerStore;
use crate::config::{schema::Config, ConfigManager};
use crate::error::{BoxError, CardkeepError, CardkeepResult};
use crate::retry::BackoffExecutor;
use crate::runlog::{RunEntry, RunLog, StepKind};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// One data source: where it comes from and where its snapshot goes
#[derive(Debug, Clone)]
pub struct Source {
    /// External service name, shared by circuit and logs
    pub dependency: String,
    /// Cache namespace
    pub namespace: String,
    /// Identifying request parameters, e.g. a location string
    pub key: String,
    /// Snapshot path
    pub output: PathBuf,
    /// Content check for the payload and snapshot
    pub validator: Validator,
}

/// One artifact to keep up to date
#[derive(Debug, Clone)]
pub struct GenerationTask {
    /// Hash record key; distinct for every artifact
    pub key: String,
    /// Hashed and passed to the generator in this order
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub validator: Validator,
    /// Regenerate even when nothing changed
    pub force: bool,
}

impl GenerationTask {
    /// Task for `generator` writing `output`, keyed by both
    pub fn new(generator: &dyn Generator, inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Self {
        let output = output.into();
        Self {
            key: task_key(generator.id(), &output),
            validator: Validator::for_path(&output),
            inputs,
            output,
            force: false,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// How a fetch ended
#[derive(Debug)]
pub enum FetchOutcome {
    /// Fetched now; snapshot replaced
    Fresh(PathBuf),
    /// Served from a fresh cache entry
    Cached(PathBuf),
    /// Fetch skipped or failed; the previous snapshot is kept
    Fallback { path: PathBuf, cause: CardkeepError },
    /// Fetch skipped or failed and there is no usable previous snapshot
    Unavailable { cause: CardkeepError },
}

impl FetchOutcome {
    /// A usable snapshot exists after this run
    pub fn has_snapshot(&self) -> bool {
        !matches!(self, Self::Unavailable { .. })
    }

    /// The operation itself succeeded, fresh or from cache
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Fresh(_) | Self::Cached(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "fresh",
            Self::Cached(_) => "cached",
            Self::Fallback { .. } => "fallback",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// How a generation step ended
#[derive(Debug)]
pub enum GenerationOutcome {
    /// New artifact written and hash recorded
    Generated(PathBuf),
    /// Inputs unchanged and output present
    Skipped(PathBuf),
    /// Generator or validation failed; `previous_kept` if an artifact remains
    Failed {
        cause: CardkeepError,
        previous_kept: bool,
    },
}

impl GenerationOutcome {
    /// A usable artifact exists after this run
    pub fn has_artifact(&self) -> bool {
        match self {
            Self::Generated(_) | Self::Skipped(_) => true,
            Self::Failed { previous_kept, .. } => *previous_kept,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Generated(_) => "generated",
            Self::Skipped(_) => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Wires retry, circuit, cache, change detection and atomic writes together
pub struct Pipeline {
    executor: BackoffExecutor,
    circuit: CircuitBreakerStore,
    cache: ResponseCache,
    detector: ChangeDetector,
    writer: AtomicArtifactWriter,
    run_log: RunLog,
}

impl Pipeline {
    pub fn new(
        executor: BackoffExecutor,
        circuit: CircuitBreakerStore,
        cache: ResponseCache,
        detector: ChangeDetector,
    ) -> Self {
        Self {
            executor,
            circuit,
            cache,
            detector,
            writer: AtomicArtifactWriter::new(),
            run_log: RunLog::disabled(),
        }
    }

    /// Build every store from configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            BackoffExecutor::from_config(&config.retry),
            CircuitBreakerStore::from_config(ConfigManager::circuit_dir(config), &config.circuit),
            ResponseCache::new(ConfigManager::cache_dir(config), config.cache.ttl()),
            ChangeDetector::new(ConfigManager::hashes_dir(config)),
        )
        .with_run_log(RunLog::new(config))
    }

    #[must_use]
    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = run_log;
        self
    }

    pub fn circuit(&self) -> &CircuitBreakerStore {
        &self.circuit
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Refresh the snapshot for `source` using `fetch` as the operation
    pub async fn fetch<F, Fut, E>(&self, source: &Source, fetch: F) -> CardkeepResult<FetchOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: Into<BoxError>,
    {
        let cache = self.cache.clone().with_validator(source.validator);

        if let Some(payload) = cache.get(&source.namespace, &source.key).await? {
            match self
                .writer
                .write(&source.output, payload.as_bytes(), source.validator)
                .await
            {
                Ok(path) => {
                    info!("{}: using cached response", source.dependency);
                    return Ok(self.finish_fetch(source, FetchOutcome::Cached(path)).await);
                }
                Err(e) => warn!(
                    "{}: cached response could not be written, fetching: {}",
                    source.dependency, e
                ),
            }
        }

        if self.circuit.is_open(&source.dependency).await? {
            let cause = CardkeepError::CircuitOpen(source.dependency.clone());
            let outcome = self.fall_back(source, cause).await;
            return Ok(self.finish_fetch(source, outcome).await);
        }

        let result = self.executor.run(&source.dependency, fetch).await;

        let outcome = match result {
            Ok(payload) => match self
                .writer
                .write(&source.output, payload.as_bytes(), source.validator)
                .await
            {
                Ok(path) => {
                    if let Err(e) = cache.put(&source.namespace, &source.key, &payload).await {
                        warn!("{}: failed to cache response: {}", source.dependency, e);
                    }
                    self.circuit.record_success(&source.dependency).await?;
                    info!("{}: fetched fresh data", source.dependency);
                    FetchOutcome::Fresh(path)
                }
                Err(cause @ CardkeepError::ValidationFailed { .. }) => {
                    self.circuit.record_failure(&source.dependency).await?;
                    self.fall_back(source, cause).await
                }
                Err(e) => return Err(e),
            },
            Err(cause) => {
                self.circuit.record_failure(&source.dependency).await?;
                self.fall_back(source, cause).await
            }
        };

        Ok(self.finish_fetch(source, outcome).await)
    }

    /// Regenerate the task's output unless nothing changed
    pub async fn generate(
        &self,
        generator: &dyn Generator,
        task: &GenerationTask,
    ) -> CardkeepResult<GenerationOutcome> {
        let output = task.output.as_path();
        let freshness = self
            .detector
            .check(&task.key, generator, &task.inputs, output)
            .await?;

        let hash = match freshness {
            Freshness::UpToDate { .. } if !task.force => {
                info!("Skipping {}: data unchanged", output.display());
                let outcome = GenerationOutcome::Skipped(output.to_path_buf());
                return Ok(self.finish_generate(task, outcome).await);
            }
            Freshness::UpToDate { hash } => Some(hash),
            Freshness::Stale { reason, hash } => {
                info!("Generating {}: {}", output.display(), reason);
                hash
            }
        };

        let outcome = match self
            .produce(generator, &task.inputs, output, task.validator)
            .await
        {
            Ok(path) => {
                if let Some(hash) = hash {
                    self.detector
                        .record_success(&task.key, generator.id(), &hash)
                        .await?;
                }
                info!("Generated {}", path.display());
                GenerationOutcome::Generated(path)
            }
            Err(cause) if cause.is_retryable() => {
                let previous_kept = artifact_is_valid(output, task.validator).await;
                if previous_kept {
                    warn!(
                        "FALLBACK: {} generation failed: {}. Preserving existing artifact at {}",
                        generator.id(),
                        cause,
                        output.display()
                    );
                }
                GenerationOutcome::Failed {
                    cause,
                    previous_kept,
                }
            }
            Err(e) => return Err(e),
        };

        Ok(self.finish_generate(task, outcome).await)
    }

    async fn produce(
        &self,
        generator: &dyn Generator,
        inputs: &[PathBuf],
        output: &Path,
        validator: Validator,
    ) -> CardkeepResult<PathBuf> {
        let content = generator.generate(inputs, output).await?;
        self.writer.write(output, &content, validator).await
    }

    async fn fall_back(&self, source: &Source, cause: CardkeepError) -> FetchOutcome {
        if artifact_is_valid(&source.output, source.validator).await {
            warn!(
                "FALLBACK: {} fetch failed: {}. Preserving existing snapshot at {}",
                source.dependency,
                cause,
                source.output.display()
            );
            FetchOutcome::Fallback {
                path: source.output.clone(),
                cause,
            }
        } else {
            warn!(
                "{} unavailable and no previous snapshot at {}: {}",
                source.dependency,
                source.output.display(),
                cause
            );
            FetchOutcome::Unavailable { cause }
        }
    }

    async fn finish_fetch(&self, source: &Source, outcome: FetchOutcome) -> FetchOutcome {
        let cause = match &outcome {
            FetchOutcome::Fallback { cause, .. } | FetchOutcome::Unavailable { cause } => {
                Some(cause.to_string())
            }
            _ => None,
        };
        let entry = RunEntry::new(
            StepKind::Fetch,
            &source.dependency,
            outcome.label(),
            outcome.is_ok(),
            &source.output,
        )
        .with_cause(cause);
        self.run_log.append(&entry).await;
        outcome
    }

    async fn finish_generate(
        &self,
        task: &GenerationTask,
        outcome: GenerationOutcome,
    ) -> GenerationOutcome {
        let cause = match &outcome {
            GenerationOutcome::Failed { cause, .. } => Some(cause.to_string()),
            _ => None,
        };
        let ok = !matches!(outcome, GenerationOutcome::Failed { .. });
        let entry = RunEntry::new(
            StepKind::Generate,
            &task.key,
            outcome.label(),
            ok,
            &task.output,
        )
        .with_cause(cause);
        self.run_log.append(&entry).await;
        outcome
    }
}

/// Whether `path` holds content that `validator` accepts
async fn artifact_is_valid(path: &Path, validator: Validator) -> bool {
    match fs::read(path).await {
        Ok(content) => validator.validate(&content).is_ok(),
        Err(_) => false,
    }
}
