//! `odata` compiles OData query options against a schema and optionally runs
//! the plan over a JSON file.
//!
//! ```bash
//! odata --schema sales.yaml plan --root Customer '$filter=Age gt 30&$top=10'
//! odata --schema sales.yaml run --root Customer --data customers.json '$orderby=Name'
//! ODATA__LIMITS__MAX_TOP=50 odata -vv --config odata.yaml --schema sales.yaml check
//! ```

// CLI tools are expected to print to stdout
#![allow(clippy::print_stdout)]

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use odata_core::EngineConfig;
use tracing_subscriber::EnvFilter;

/// Compile and run OData query options
#[derive(Parser)]
#[command(name = "odata")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Schema description (YAML, or JSON when the file ends in `.json`)
    #[arg(short, long)]
    schema: PathBuf,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the compiled plan as JSON
    Plan(QueryArgs),
    /// Run the plan over a JSON array of instances and print the result
    Run {
        #[command(flatten)]
        query: QueryArgs,
        /// JSON file holding an array of instances
        #[arg(short, long)]
        data: PathBuf,
    },
    /// Validate configuration and schema, then print the effective configuration
    Check,
}

#[derive(Args)]
struct QueryArgs {
    /// Entity type the query applies to
    #[arg(short, long)]
    root: String,

    /// Query string, e.g. `$filter=Age gt 30&$top=10`
    #[arg(default_value = "")]
    query: String,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(path) = &cli.config
        && !path.is_file()
    {
        anyhow::bail!("config file does not exist: {}", path.display());
    }

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (ODATA__*)
    let config = EngineConfig::load(cli.config.as_deref())?;
    let engine = commands::load_engine(&cli.schema, &config)?;
    tracing::info!(schema = %cli.schema.display(), "odata starting");

    let output = match cli.command {
        Commands::Plan(args) => commands::plan(&engine, &args.root, &args.query)?,
        Commands::Run { query, data } => {
            commands::run(&engine, &query.root, &query.query, &data)?
        }
        Commands::Check => Ok(serde_json::to_value(&config)?),
    };

    match output {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(rejected) => {
            println!("{}", serde_json::to_string_pretty(&rejected)?);
            Ok(ExitCode::from(2))
        }
    }
}

/// `RUST_LOG` wins over `-v` when set.
fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity_directive(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn verbosity_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
