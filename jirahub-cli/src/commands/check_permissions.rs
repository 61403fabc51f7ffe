//! `jirahub check-permissions`: verify credentials and access on both services.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use jirahub_core::Credentials;
use jirahub_sync::check_permissions;

use super::load_config;

/// Arguments for `jirahub check-permissions`.
#[derive(Args, Debug)]
pub struct CheckPermissionsArgs {
    /// Configuration files, merged in order.
    #[arg(required = true, value_name = "CONFIG")]
    pub configs: Vec<PathBuf>,
}

impl CheckPermissionsArgs {
    pub fn run(self) -> Result<ExitCode> {
        let config = load_config(&self.configs)?;
        let (github, jira) = jirahub_trackers::connect(&config, &Credentials::from_env());
        let problems =
            check_permissions(&config, &github, &jira).context("permission check failed")?;

        if problems.is_empty() {
            println!("{} JIRA and GitHub permissions are sufficient", "✓".green());
            return Ok(ExitCode::SUCCESS);
        }
        eprintln!("JIRA and/or GitHub permissions must be corrected:");
        for problem in &problems {
            eprintln!("  {} {problem}", "✗".red());
        }
        Ok(ExitCode::FAILURE)
    }
}
