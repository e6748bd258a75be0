//! Fetch command - refresh one data snapshot
//!
//! The wrapped command's stdout is the payload. Its stderr is logged and
//! never reaches the snapshot.

use crate::cli::args::FetchArgs;
use crate::config::Config;
use crate::error::{CardkeepError, CardkeepResult};
use crate::pipeline::{FetchOutcome, Pipeline, Source};
use console::style;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Execute the fetch command
pub async fn execute(args: FetchArgs, config: &Config) -> CardkeepResult<()> {
    let pipeline = Pipeline::from_config(config);

    let source = Source {
        namespace: args
            .namespace
            .clone()
            .unwrap_or_else(|| args.dependency.clone()),
        dependency: args.dependency.clone(),
        key: args.key.clone(),
        output: args.output.clone(),
        validator: args.validate,
    };

    let timeout = args.timeout_secs.map(Duration::from_secs);
    let command = args.command;

    let outcome = pipeline
        .fetch(&source, || run_fetcher(&command, timeout))
        .await?;

    match outcome {
        FetchOutcome::Fresh(path) => println!(
            "{} {} fetched -> {}",
            style("✓").green(),
            style(&source.dependency).cyan(),
            path.display()
        ),
        FetchOutcome::Cached(path) => println!(
            "{} {} served from cache -> {}",
            style("✓").green(),
            style(&source.dependency).cyan(),
            path.display()
        ),
        FetchOutcome::Fallback { path, cause } => println!(
            "{} {} kept previous snapshot {} ({})",
            style("!").yellow(),
            style(&source.dependency).cyan(),
            path.display(),
            cause
        ),
        FetchOutcome::Unavailable { cause } => return Err(cause),
    }

    Ok(())
}

/// Run the fetcher once, returning its stdout
async fn run_fetcher(command: &[String], timeout: Option<Duration>) -> Result<String, String> {
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| "empty fetch command".to_string())?;

    debug!("Executing: {} {:?}", program, rest);

    let child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, child)
            .await
            .map_err(|_| format!("{} timed out after {:?}", program, limit))?,
        None => child.await,
    }
    .map_err(|e| CardkeepError::command_failed(program.as_str(), e).to_string())?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        debug!("[{}] {}", program, line);
    }

    if !output.status.success() {
        let detail = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim();
        return Err(match output.status.code() {
            Some(code) => format!("{} exited with code {}: {}", program, code, detail),
            None => format!("{} terminated by signal", program),
        });
    }

    String::from_utf8(output.stdout).map_err(|_| format!("{} produced non-UTF-8 output", program))
}
