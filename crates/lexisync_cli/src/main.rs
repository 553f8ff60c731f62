//! LexiSync CLI
//!
//! Command-line tools for inspecting a device's change queue and managing
//! sync bearer tokens.
//!
//! # Commands
//!
//! - `dump-queue` - List queued changes and their failure state
//! - `compact-queue` - Rewrite the queue file to drop acknowledged records
//! - `issue-token` - Sign a bearer token for a user
//! - `verify-token` - Check a bearer token and print its claims

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// LexiSync command-line tools.
#[derive(Parser)]
#[command(name = "lexisync")]
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
    /// List queued changes and their failure state
    DumpQueue {
        /// Path to the queue file
        path: PathBuf,

        /// Only show changes the server rejected
        #[arg(long)]
        failed: bool,

        /// Maximum number of changes to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the queue file to drop acknowledged records
    CompactQueue {
        /// Path to the queue file
        path: PathBuf,
    },

    /// Sign a bearer token for a user
    IssueToken {
        /// User the token authenticates
        #[arg(short, long)]
        user: String,

        /// HMAC secret shared with the server
        #[arg(short, long)]
        secret: String,
    },

    /// Check a bearer token and print its claims
    VerifyToken {
        /// Token to check
        token: String,

        /// HMAC secret shared with the server
        #[arg(short, long)]
        secret: String,

        /// Token lifetime in hours
        #[arg(long, default_value = "720")]
        expiry_hours: u64,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

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
        Commands::DumpQueue {
            path,
            failed,
            limit,
            format,
        } => {
            commands::queue::dump(&path, failed, limit, &format)?;
        }
        Commands::CompactQueue { path } => {
            commands::queue::compact(&path)?;
        }
        Commands::IssueToken { user, secret } => {
            println!("{}", commands::token::issue(&user, secret.as_bytes())?);
        }
        Commands::VerifyToken {
            token,
            secret,
            expiry_hours,
        } => {
            let expiry = Duration::from_secs(expiry_hours.saturating_mul(3600));
            commands::token::verify(&token, secret.as_bytes(), expiry)?;
        }
        Commands::Version => {
            println!("LexiSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
