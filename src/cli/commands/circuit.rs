//! Circuit command - inspect or reset circuit breakers

use crate::circuit::{CircuitBreakerStore, CircuitRecord, CircuitState};
use crate::cli::args::{CircuitAction, CircuitArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::CardkeepResult;
use chrono::{DateTime, Utc};
use console::style;

/// Execute the circuit command
pub async fn execute(args: CircuitArgs, config: &Config) -> CardkeepResult<()> {
    let store =
        CircuitBreakerStore::from_config(ConfigManager::circuit_dir(config), &config.circuit);

    match args.action {
        CircuitAction::Status {
            dependencies,
            format,
        } => show_status(&store, &dependencies, format).await,
        CircuitAction::Reset { dependency } => {
            store.record_success(&dependency).await?;
            println!(
                "{} Circuit for {} closed",
                style("✓").green(),
                style(&dependency).cyan()
            );
            Ok(())
        }
    }
}

async fn show_status(
    store: &CircuitBreakerStore,
    dependencies: &[String],
    format: OutputFormat,
) -> CardkeepResult<()> {
    let now = Utc::now();

    let rows = if dependencies.is_empty() {
        store.list_at(now).await?
    } else {
        let mut rows = Vec::with_capacity(dependencies.len());
        for name in dependencies {
            let record = store.record(name).await?.unwrap_or_else(|| CircuitRecord {
                dependency: name.clone(),
                failure_count: 0,
                last_failure_at: None,
            });
            let state = store.state_at(name, now).await?;
            rows.push((record, state));
        }
        rows
    };

    match format {
        OutputFormat::Table => print_table(&rows, store),
        OutputFormat::Json => print_json(&rows)?,
    }
    Ok(())
}

fn print_table(rows: &[(CircuitRecord, CircuitState)], store: &CircuitBreakerStore) {
    if rows.is_empty() {
        println!("No circuit records. All dependencies are closed.");
        return;
    }

    println!(
        "{:<24} {:<8} {:<10} {:<20}",
        "DEPENDENCY", "STATE", "FAILURES", "LAST FAILURE"
    );
    println!("{}", "-".repeat(64));

    for (record, state) in rows {
        let state_display = match state {
            CircuitState::Open => style("open").red().to_string(),
            CircuitState::Closed => style("closed").green().to_string(),
        };
        println!(
            "{:<24} {:<8} {:<10} {:<20}",
            record.dependency,
            state_display,
            format!("{}/{}", record.failure_count, store.threshold()),
            format_time(record.last_failure_at)
        );
    }
}

fn print_json(rows: &[(CircuitRecord, CircuitState)]) -> CardkeepResult<()> {
    #[derive(serde::Serialize)]
    struct CircuitJson<'a> {
        dependency: &'a str,
        state: CircuitState,
        failure_count: u32,
        last_failure_at: Option<DateTime<Utc>>,
    }

    let json: Vec<CircuitJson> = rows
        .iter()
        .map(|(record, state)| CircuitJson {
            dependency: &record.dependency,
            state: *state,
            failure_count: record.failure_count,
            last_failure_at: record.last_failure_at,
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
