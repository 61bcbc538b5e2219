//! TideDB CLI
//!
//! Command-line tools for TideDB sync payloads and migrations.
//!
//! # Commands
//!
//! - `migration-info` - Show what a migrated client reports on its next pull
//! - `validate-changes` - Validate a pulled change set
//! - `encode` - Convert a JSON change set to CBOR
//! - `decode` - Convert a CBOR change set to JSON

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TideDB command-line tools.
#[derive(Parser)]
#[command(name = "tidedb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the migration descriptor sent with the next pull
    MigrationInfo {
        /// JSON file with the schema migrations
        #[arg(short, long)]
        migrations: PathBuf,

        /// Current schema version
        #[arg(short, long)]
        schema_version: u32,

        /// Schema version of the last pull
        #[arg(short, long)]
        from: u32,
    },

    /// Validate a pulled change set
    ValidateChanges {
        /// JSON file with the change set
        input: PathBuf,
    },

    /// Convert a JSON change set to CBOR
    Encode {
        /// JSON file with the change set
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Convert a CBOR change set to JSON
    Decode {
        /// CBOR file with the change set
        input: PathBuf,

        /// Output file, standard output if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::MigrationInfo {
            migrations,
            schema_version,
            from,
        } => {
            commands::migration_info::run(&migrations, schema_version, from)?;
        }
        Commands::ValidateChanges { input } => {
            commands::validate::run(&input)?;
        }
        Commands::Encode { input, output } => {
            commands::convert::encode(&input, &output)?;
        }
        Commands::Decode { input, output } => {
            commands::convert::decode(&input, output.as_deref())?;
        }
        Commands::Version => {
            println!("TideDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
