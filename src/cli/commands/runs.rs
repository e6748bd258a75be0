//! Runs command - per-step summary of the run history

use crate::cli::args::{OutputFormat, RunsArgs};
use crate::config::{Config, ConfigManager};
use crate::error::CardkeepResult;
use crate::runlog::{summarize, RunLog, StepSummary, ATTENTION_STREAK};
use console::style;

/// Execute the runs command
pub async fn execute(args: RunsArgs, config: &Config) -> CardkeepResult<()> {
    let path = ConfigManager::run_log_path(config);
    let entries = RunLog::read(&path).await?;

    let mut steps = summarize(&entries);
    if args.failing {
        steps.retain(|step| step.failure_streak > 0);
    }

    match args.format {
        OutputFormat::Table => print_table(&steps, entries.is_empty()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&steps)?),
    }
    Ok(())
}

fn print_table(steps: &[StepSummary], no_history: bool) {
    if no_history {
        println!("No runs recorded yet.");
        return;
    }
    if steps.is_empty() {
        println!("{} No failing steps", style("✓").green());
        return;
    }

    println!(
        "{:<9} {:<36} {:>5} {:>8} {:>7}  {:<12} {}",
        "KIND", "NAME", "RUNS", "SUCCESS", "STREAK", "LAST", "AT"
    );
    println!("{}", "-".repeat(100));

    for step in steps {
        let last = if step.failure_streak == 0 {
            style(&step.last_outcome).green().to_string()
        } else {
            style(&step.last_outcome).yellow().to_string()
        };
        println!(
            "{:<9} {:<36} {:>5} {:>7.1}% {:>7}  {:<12} {}",
            step.kind.to_string(),
            step.name,
            step.runs,
            step.success_rate(),
            step.failure_streak,
            last,
            step.last_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let flagged: Vec<&StepSummary> = steps.iter().filter(|s| s.needs_attention()).collect();
    if !flagged.is_empty() {
        println!();
        for step in flagged {
            println!(
                "{} {} {} failed {} times in a row (threshold {}){}",
                style("!").red(),
                step.kind,
                style(&step.name).cyan(),
                step.failure_streak,
                ATTENTION_STREAK,
                step.last_cause
                    .as_deref()
                    .map(|c| format!(": {}", c))
                    .unwrap_or_default()
            );
        }
    }
}
