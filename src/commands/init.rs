use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;

use calmirror_core::SyncConfig;

pub fn run(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => SyncConfig::config_path()?,
    };

    if path.exists() {
        println!("Config already exists at {}", path.display().cyan());
        return Ok(());
    }

    SyncConfig::create_default_config(&path)?;
    println!("Created config at {}", path.display().cyan());
    println!("Fill in the {} and {} sections, then run:", "[google]".bold(), "[discord]".bold());
    println!("  calmirror run");
    Ok(())
}
