//! quikdb command-line tool
//!
//! Inspects, checks and migrates a message store directory.

mod commands;
mod formatter;

use clap::{Parser, Subcommand};
use commands::CliError;
use formatter::OutputFormat;
use std::path::PathBuf;

/// quikdb command-line tool
#[derive(Parser, Debug)]
#[command(name = "quikdb")]
#[command(version, about = "Inspect and migrate quikdb message stores")]
pub struct Args {
    /// Store directory
    #[arg(short, long)]
    pub path: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    /// Address book export (JSON) used when rebuilding phone numbers
    #[arg(long, global = true)]
    pub contacts: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the stamped version, last run and record counts
    Status,

    /// Validate the store against the current schema
    Check {
        /// Skip the per-record scan
        #[arg(long)]
        schema_only: bool,
    },

    /// Migrate the store to the current version
    Migrate {
        /// Runner configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Worker threads for transform passes
        #[arg(long)]
        workers: Option<usize>,

        /// Run again over a store whose last migration failed
        #[arg(long)]
        retry_failed: bool,
    },

    /// Stamp an unversioned store at a historical version
    Stamp {
        /// Version the store's data is at
        version: u64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quikdb_core=info,quikdb=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

fn run(args: Args) -> Result<i32, CliError> {
    let formatter = formatter::create_formatter(args.format);
    let registry = commands::registry(args.contacts.as_deref())?;
    let store = commands::open(&args.path)?;

    let (output, code) = match args.command {
        Command::Status => {
            let status = commands::status(&store, &registry)?;
            (formatter.format_status(&status), 0)
        }
        Command::Check { schema_only } => {
            let violations = commands::check(&store, &registry, schema_only)?;
            let code = if violations.is_empty() { 0 } else { 1 };
            (formatter.format_violations(&violations), code)
        }
        Command::Migrate {
            config,
            workers,
            retry_failed,
        } => {
            let config = commands::migration_config(config.as_deref(), workers, retry_failed)?;
            let report = commands::migrate(&store, &registry, config)?;
            (formatter.format_report(&report), 0)
        }
        Command::Stamp { version } => {
            commands::stamp(&store, &registry, version)?;
            (
                formatter.format_message(&format!("stamped at version {}", version)),
                0,
            )
        }
    };

    println!("{}", output);
    store.flush()?;
    Ok(code)
}
