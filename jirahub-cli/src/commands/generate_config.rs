//! `jirahub generate-config`: print the configuration template.

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use jirahub_core::config;

/// Arguments for `jirahub generate-config`.
#[derive(Args, Debug)]
pub struct GenerateConfigArgs {}

impl GenerateConfigArgs {
    pub fn run(self) -> Result<ExitCode> {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(config::template().as_bytes())
            .context("failed to write template")?;
        Ok(ExitCode::SUCCESS)
    }
}
