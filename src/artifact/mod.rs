//! Validated atomic writes
//!
//! Every persisted file (snapshots, cards, cache entries, circuit and hash
//! records) goes through [`AtomicArtifactWriter`]:
//!
//! 1. content is written to a hidden temp file next to the target
//! 2. the content is validated
//! 3. the temp file is renamed over the target
//!
//! A reader of the final path only ever sees the previous version or the new,
//! validated version. On validation or IO failure the temp file is removed and
//! the final path is left untouched.

pub mod validate;

pub use validate::{Validate, Validator};

use crate::error::{CardkeepError, CardkeepResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Suffix marking in-flight temp files; stores skip these when scanning
pub const TEMP_SUFFIX: &str = ".cardkeep-tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temp-then-validate-then-rename writer
#[derive(Debug, Clone, Default)]
pub struct AtomicArtifactWriter {
    sync: bool,
}

impl AtomicArtifactWriter {
    /// Create a writer that fsyncs temp files before promoting them
    pub fn new() -> Self {
        Self { sync: true }
    }

    /// Skip fsync (faster, still atomic with respect to other readers)
    pub fn without_sync(mut self) -> Self {
        self.sync = false;
        self
    }

    /// Write `content` to `final_path` if `validator` accepts it.
    ///
    /// Returns the final path on success. On rejection returns
    /// `ValidationFailed` and leaves any previous artifact in place.
    pub async fn write(
        &self,
        final_path: &Path,
        content: &[u8],
        validator: impl Validate,
    ) -> CardkeepResult<PathBuf> {
        let parent = parent_dir(final_path);
        fs::create_dir_all(&parent).await.map_err(|e| {
            CardkeepError::io(format!("creating directory {}", parent.display()), e)
        })?;

        let temp_path = temp_path_for(final_path);

        if let Err(e) = self.write_temp(&temp_path, content).await {
            discard(&temp_path).await;
            return Err(e);
        }

        if let Err(reason) = validator.validate(content) {
            discard(&temp_path).await;
            warn!(
                "Rejected new content for {}: {} (previous version kept)",
                final_path.display(),
                reason
            );
            return Err(CardkeepError::validation(final_path, reason));
        }

        if let Err(e) = fs::rename(&temp_path, final_path).await {
            discard(&temp_path).await;
            return Err(CardkeepError::io(
                format!("promoting {}", final_path.display()),
                e,
            ));
        }

        debug!("Wrote {} ({} bytes)", final_path.display(), content.len());
        Ok(final_path.to_path_buf())
    }

    /// Serialize `value` as pretty JSON and write it atomically
    pub async fn write_json<T: Serialize>(
        &self,
        final_path: &Path,
        value: &T,
    ) -> CardkeepResult<PathBuf> {
        let content = serde_json::to_vec_pretty(value)?;
        self.write(final_path, &content, Validator::Json).await
    }

    async fn write_temp(&self, temp_path: &Path, content: &[u8]) -> CardkeepResult<()> {
        let context = || format!("writing temp file {}", temp_path.display());

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp_path)
            .await
            .map_err(|e| CardkeepError::io(context(), e))?;

        file.write_all(content)
            .await
            .map_err(|e| CardkeepError::io(context(), e))?;
        file.flush().await.map_err(|e| CardkeepError::io(context(), e))?;

        if self.sync {
            file.sync_all()
                .await
                .map_err(|e| CardkeepError::io(context(), e))?;
        }

        Ok(())
    }
}

/// Check whether a path is an in-flight temp file
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(TEMP_SUFFIX))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Temp files live in the same directory so the rename stays on one filesystem
fn temp_path_for(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    parent_dir(final_path).join(format!(
        ".{}.{}.{}{}",
        name,
        std::process::id(),
        seq,
        TEMP_SUFFIX
    ))
}

async fn discard(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove temp file {}: {}", temp_path.display(), e);
        }
    }
}

/// Remove a state file that failed to parse. Returns whether it is gone;
/// a failed removal is logged, never returned.
pub(crate) async fn discard_unreadable(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Failed to remove unreadable {}: {}", path.display(), e);
            false
        }
    }
}
