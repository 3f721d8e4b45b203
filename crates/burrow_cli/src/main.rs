//! Burrow CLI
//!
//! Command-line tools for Burrow databases.
//!
//! # Commands
//!
//! - `get`, `set`, `delete`, `ttl` - Single-key reads and writes
//! - `inspect` - Display logs, segments and manifest state
//! - `verify` - Check every record checksum
//! - `compact` - Flush and merge segments to reclaim space
//! - `dump-wal` - Dump log records for debugging

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::{Format, with_database};
use error::{CliError, CliResult};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Burrow command-line database tools.
#[derive(Parser)]
#[command(name = "burrow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored under a key
    Get {
        /// Key to read
        key: String,

        /// Always print the value as hex
        #[arg(long)]
        hex: bool,
    },

    /// Store a value under a key
    Set {
        /// Key to write
        key: String,

        /// Value to store
        value: String,

        /// Expire the key after this many milliseconds (0 or less: never)
        #[arg(long, allow_negative_numbers = true)]
        ttl_ms: Option<i64>,
    },

    /// Delete a key
    Delete {
        /// Key to delete
        key: String,
    },

    /// Print the milliseconds left before a key expires
    Ttl {
        /// Key to check
        key: String,
    },

    /// Display logs, segments and manifest state
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify database integrity
    Verify {
        /// Check log records
        #[arg(short, long)]
        wal: bool,

        /// Check segment records
        #[arg(short, long)]
        segments: bool,
    },

    /// Flush and merge all segments into one
    Compact {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Dump log records for debugging
    DumpWal {
        /// Only dump this log file id
        #[arg(short, long)]
        wal: Option<u64>,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    if let Commands::Version = cli.command {
        println!("burrow {}", env!("CARGO_PKG_VERSION"));
        println!("burrow_core {}", burrow_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or(CliError::MissingPath)?;
    debug!(path = %path.display(), "running command");

    match cli.command {
        Commands::Get { key, hex } => {
            let value = with_database(&path, false, |db| commands::kv::get(db, &key))?;
            if hex {
                println!("{}", commands::to_hex(&value));
            } else {
                let mut out = std::io::stdout().lock();
                out.write_all(&value)
                    .and_then(|()| out.write_all(b"\n"))
                    .map_err(burrow_core::CoreError::from)?;
            }
        }
        Commands::Set { key, value, ttl_ms } => {
            with_database(&path, true, |db| commands::kv::set(db, &key, &value, ttl_ms))?;
        }
        Commands::Delete { key } => {
            with_database(&path, false, |db| commands::kv::delete(db, &key))?;
        }
        Commands::Ttl { key } => {
            match with_database(&path, false, |db| commands::kv::ttl(db, &key))? {
                Some(left) => println!("{}", left.as_millis()),
                None => println!("-1"),
            }
        }
        Commands::Inspect { format } => commands::inspect::run(&path, format)?,
        Commands::Verify { wal, segments } => {
            // No flag means check everything.
            let all = !wal && !segments;
            commands::verify::run(&path, wal || all, segments || all)?;
        }
        Commands::Compact { format } => commands::compact::run(&path, format)?,
        Commands::DumpWal { wal, limit, format } => {
            commands::dump_wal::run(&path, wal, limit, format)?;
        }
        Commands::Version => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_set_with_negative_ttl() {
        let cli = Cli::parse_from(["burrow", "-p", "db", "set", "k", "v", "--ttl-ms", "-1"]);
        match cli.command {
            Commands::Set { ttl_ms, .. } => assert_eq!(ttl_ms, Some(-1)),
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn commands_other_than_version_need_a_path() {
        let cli = Cli::parse_from(["burrow", "get", "k"]);
        assert!(matches!(run(cli), Err(CliError::MissingPath)));
    }
}
