//! CLI argument definitions using clap derive

use crate::artifact::Validator;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Resilient fetch and incremental card generation
///
/// Wraps flaky API fetches with retries, a circuit breaker and a TTL cache,
/// and regenerates artifacts only when their inputs change. Artifacts are
/// always replaced atomically and only with validated content.
#[derive(Parser, Debug)]
#[command(name = "cardkeep")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CARDKEEP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the state directory from the config
    #[arg(long, global = true, env = "CARDKEEP_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a data source through cache, circuit breaker and retries
    Fetch(FetchArgs),

    /// Regenerate an artifact if its generator or inputs changed
    Generate(GenerateArgs),

    /// Inspect or reset circuit breakers
    Circuit(CircuitArgs),

    /// Manage the response cache
    Cache(CacheArgs),

    /// Summarize recorded fetch and generation runs
    Runs(RunsArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the fetch command
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Dependency name (circuit breaker key), e.g. weather-api
    pub dependency: String,

    /// Cache namespace (defaults to the dependency name)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Cache key identifying the request, e.g. a location
    #[arg(short, long, default_value = "default")]
    pub key: String,

    /// Snapshot path to write
    #[arg(short, long)]
    pub output: PathBuf,

    /// Payload format check (json, toml, svg, non-empty)
    #[arg(long, default_value = "json")]
    pub validate: Validator,

    /// Kill a single attempt after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Command whose stdout is the payload
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the generate command
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Generator program (must be inside paths.generators_dir)
    pub generator: PathBuf,

    /// Input files, hashed and passed to the generator in this order
    #[arg(short, long = "input")]
    pub inputs: Vec<PathBuf>,

    /// Artifact path to write
    #[arg(short, long)]
    pub output: PathBuf,

    /// Artifact format check (defaults from the output extension)
    #[arg(long)]
    pub validate: Option<Validator>,

    /// Change record key (defaults to generator id plus output path)
    #[arg(long)]
    pub key: Option<String>,

    /// Interpreter to run the generator with, e.g. python3
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Regenerate even if nothing changed
    #[arg(short, long)]
    pub force: bool,

    /// Extra arguments passed to the generator after the inputs
    #[arg(last = true)]
    pub args: Vec<String>,
}

/// Arguments for the circuit command
#[derive(Parser, Debug)]
pub struct CircuitArgs {
    /// Subcommand for circuit
    #[command(subcommand)]
    pub action: CircuitAction,
}

/// Circuit subcommands
#[derive(Subcommand, Debug)]
pub enum CircuitAction {
    /// Show circuit state for all or selected dependencies
    Status {
        /// Dependencies to show (all recorded if empty)
        dependencies: Vec<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Close a circuit by clearing its failure record
    Reset {
        /// Dependency to reset
        dependency: String,
    },
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Remove cached responses
    Clear {
        /// Only clear this namespace
        namespace: Option<String>,
    },

    /// Remove expired entries and abandoned temp files
    Purge,
}

/// Arguments for the runs command
#[derive(Parser, Debug)]
pub struct RunsArgs {
    /// Only show steps that are currently failing
    #[arg(long)]
    pub failing: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for status listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_fetch() {
        let cli = Cli::parse_from([
            "cardkeep",
            "fetch",
            "weather-api",
            "--key",
            "New York, NY",
            "--output",
            "data/weather.json",
            "--",
            "curl",
            "-sf",
            "https://example.invalid",
        ]);
        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.dependency, "weather-api");
                assert_eq!(args.key, "New York, NY");
                assert_eq!(args.namespace, None);
                assert_eq!(args.validate, Validator::Json);
                assert_eq!(args.command, vec!["curl", "-sf", "https://example.invalid"]);
            }
            _ => panic!("expected Fetch command"),
        }
    }

    #[test]
    fn cli_fetch_requires_command() {
        let result = Cli::try_parse_from(["cardkeep", "fetch", "x", "--output", "a.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_generate() {
        let cli = Cli::parse_from([
            "cardkeep",
            "generate",
            "scripts/weather.py",
            "-i",
            "data/weather.json",
            "-i",
            "data/location.json",
            "-o",
            "cards/weather.svg",
            "--interpreter",
            "python3",
            "--key",
            "weather-dark",
            "--force",
            "--",
            "--theme=dark",
        ]);
        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(
                    args.inputs,
                    vec![
                        PathBuf::from("data/weather.json"),
                        PathBuf::from("data/location.json")
                    ]
                );
                assert!(args.force);
                assert_eq!(args.validate, None);
                assert_eq!(args.interpreter.as_deref(), Some("python3"));
                assert_eq!(args.key.as_deref(), Some("weather-dark"));
                assert_eq!(args.args, vec!["--theme=dark"]);
            }
            _ => panic!("expected Generate command"),
        }
    }

    #[test]
    fn cli_rejects_unknown_validator() {
        let result = Cli::try_parse_from([
            "cardkeep", "generate", "g.sh", "-o", "x.svg", "--validate", "xml",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_circuit_reset() {
        let cli = Cli::parse_from(["cardkeep", "circuit", "reset", "github"]);
        match cli.command {
            Commands::Circuit(CircuitArgs {
                action: CircuitAction::Reset { dependency },
            }) => assert_eq!(dependency, "github"),
            _ => panic!("expected Circuit Reset command"),
        }
    }

    #[test]
    fn cli_parses_runs() {
        let cli = Cli::parse_from(["cardkeep", "runs", "--failing", "-f", "json"]);
        match cli.command {
            Commands::Runs(args) => {
                assert!(args.failing);
                assert!(matches!(args.format, OutputFormat::Json));
            }
            _ => panic!("expected Runs command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["cardkeep", "-vv", "cache", "purge", "--state-dir", "/tmp/s"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/s")));
        assert!(matches!(
            cli.command,
            Commands::Cache(CacheArgs {
                action: CacheAction::Purge
            })
        ));
    }
}
