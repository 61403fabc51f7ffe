pub mod check_permissions;
pub mod generate_config;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};

use jirahub_core::{config, Config};

/// Load and merge the configuration files named on the command line.
pub fn load_config(paths: &[PathBuf]) -> Result<Config> {
    let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    config::load(paths).with_context(|| format!("failed to load configuration from {}", names.join(", ")))
}
