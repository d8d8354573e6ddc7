//! Recordbase Command-Line Tool
//!
//! Applies configuration documents and runs record operations against a
//! local recordbase database on behalf of a user described in a JSON file.

mod commands;
mod formatter;

use clap::Parser;
use formatter::OutputFormat;
use recordbase_core::StorageConfig;
use std::path::PathBuf;

/// Recordbase Command-Line Tool
#[derive(Parser, Debug)]
#[command(name = "recordbase")]
#[command(version, about = "Recordbase administration and record tool")]
pub struct Args {
    /// Database directory
    #[arg(long, default_value = "./recordbase_data")]
    pub data_path: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Use a throwaway database (for trying commands out)
    #[arg(long)]
    pub temporary: bool,

    /// Attempts to claim an unused record identifier
    #[arg(long, default_value_t = recordbase_core::storage::DEFAULT_ID_RETRY_LIMIT)]
    pub id_retry_limit: usize,

    #[command(subcommand)]
    pub command: commands::Command,
}

impl Args {
    /// Build the storage configuration.
    pub fn storage_config(&self) -> StorageConfig {
        let config = if self.temporary {
            StorageConfig::temporary()
        } else {
            StorageConfig::new(&self.data_path)
        };
        config.with_id_retry_limit(self.id_retry_limit)
    }
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recordbase_cli=info,recordbase_core=warn".into()),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

fn run(args: Args) -> Result<(), commands::CliError> {
    let db = recordbase_core::Database::open(args.storage_config())?;
    let formatter = formatter::create_formatter(args.format);

    let output = commands::execute(&db, args.command, &*formatter)?;
    db.flush()?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
