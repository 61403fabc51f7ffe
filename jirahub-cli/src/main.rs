//! jirahub: keep GitHub issues and a JIRA project in sync.
//!
//! # Usage
//!
//! ```text
//! jirahub generate-config
//! jirahub check-permissions <config>...
//! jirahub sync <config>... [--min-updated-at TS] [--state-path PATH] [--dry-run]
//! ```
//!
//! `-v/--verbose` raises logging to `info` and prints every planned write.
//! Credentials come from `JIRAHUB_JIRA_USERNAME`, `JIRAHUB_JIRA_PASSWORD` and
//! `JIRAHUB_GITHUB_TOKEN`.

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check_permissions::CheckPermissionsArgs, generate_config::GenerateConfigArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "jirahub",
    version,
    about = "Bidirectional issue sync between GitHub and JIRA",
    long_about = None,
)]
struct Cli {
    /// Log progress at info level and print every planned write.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a commented configuration template to stdout.
    GenerateConfig(GenerateConfigArgs),

    /// Check GitHub and JIRA credentials and permissions.
    CheckPermissions(CheckPermissionsArgs),

    /// Run one sync pass.
    Sync(SyncArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::GenerateConfig(args) => args.run(),
        Commands::CheckPermissions(args) => args.run(),
        Commands::Sync(args) => args.run(cli.verbose),
    }
}

/// Log to stderr at `warn`, or `info` with `--verbose`. `RUST_LOG` wins.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
