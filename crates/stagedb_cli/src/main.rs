//! StageDB CLI
//!
//! Command-line tools that drive a StageDB stack over an in-memory store.
//!
//! # Commands
//!
//! - `demo` - Run the salary scenario end to end with change callbacks
//! - `stress` - Run concurrent insert transactions and report throughput

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// StageDB command-line tools.
#[derive(Parser)]
#[command(name = "stagedb")]
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
    /// Run the salary scenario end to end
    Demo {
        /// Starting salary
        #[arg(short, long, default_value = "10000")]
        salary: i64,

        /// Salary after the raise
        #[arg(short, long, default_value = "20000")]
        raise: i64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run concurrent insert transactions
    Stress {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Transactions per worker thread
        #[arg(short = 'n', long, default_value = "100")]
        transactions: usize,

        /// Objects created per transaction
        #[arg(short, long, default_value = "2")]
        objects: usize,

        /// Dispatch transactions asynchronously from the main thread
        #[arg(short, long)]
        dispatch: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo {
            salary,
            raise,
            format,
        } => {
            commands::demo::run(salary, raise, &format)?;
        }
        Commands::Stress {
            threads,
            transactions,
            objects,
            dispatch,
            format,
        } => {
            commands::stress::run(threads, transactions, objects, dispatch, &format)?;
        }
        Commands::Version => {
            println!("StageDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("StageDB Core v{}", stagedb_core::VERSION);
        }
    }

    Ok(())
}
