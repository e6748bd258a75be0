//! Generate command - incremental artifact regeneration

use crate::change::{CommandGenerator, GeneratorAllowList};
use crate::cli::args::GenerateArgs;
use crate::config::Config;
use crate::error::CardkeepResult;
use crate::pipeline::{GenerationOutcome, GenerationTask, Pipeline};
use console::style;

/// Execute the generate command
pub async fn execute(args: GenerateArgs, config: &Config) -> CardkeepResult<()> {
    let pipeline = Pipeline::from_config(config);
    let allow_list = GeneratorAllowList::from_config(&config.paths);

    let mut generator = CommandGenerator::new(&allow_list, &args.generator)
        .await?
        .with_args(args.args);
    if let Some(interpreter) = args.interpreter {
        generator = generator.with_interpreter(&allow_list, interpreter)?;
    }

    let mut task = GenerationTask::new(&generator, args.inputs, &args.output).forced(args.force);
    if let Some(key) = args.key {
        task = task.with_key(key);
    }
    if let Some(validator) = args.validate {
        task = task.with_validator(validator);
    }

    let outcome = pipeline.generate(&generator, &task).await?;

    let name = args
        .output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.output.display().to_string());

    match outcome {
        GenerationOutcome::Generated(_) => {
            println!("{} Generated {}", style("✓").green(), style(&name).cyan())
        }
        GenerationOutcome::Skipped(_) => println!(
            "{} Skipping {} - data unchanged",
            style("-").dim(),
            style(&name).cyan()
        ),
        GenerationOutcome::Failed {
            cause,
            previous_kept: true,
        } => println!(
            "{} Kept existing {} ({})",
            style("!").yellow(),
            style(&name).cyan(),
            cause
        ),
        GenerationOutcome::Failed { cause, .. } => return Err(cause),
    }

    Ok(())
}
