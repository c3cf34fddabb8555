//! Config Command
//!
//! Usage:
//!   tickerlens config show [-g] [-f json]
//!   tickerlens config path
//!   tickerlens config init [-g] [--force]

use std::path::Path;

use crate::cli::util::load_config;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show the merged effective config, or the raw global file with `global`
pub fn show(config_path: Option<&Path>, global: bool, format: &str) -> Result<()> {
    if !global {
        let config = load_config(config_path)?;
        return ConfigLoader::show_config(&config, format == "json");
    }

    match ConfigLoader::global_config_path() {
        Some(global_path) if global_path.exists() => {
            let content = std::fs::read_to_string(&global_path)?;
            println!("# Global Config: {}\n", global_path.display());
            println!("{}", content);
        }
        Some(_) => {
            println!("No global config found.");
            println!("Run 'tickerlens config init --global' to create one.");
        }
        None => println!("Cannot determine global config directory."),
    }
    Ok(())
}

pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

pub fn init(global: bool, force: bool) -> Result<()> {
    let (dir, config_path) = if global {
        let dir = ConfigLoader::init_global(force)?;
        let path = dir.join("config.toml");
        (dir, path)
    } else {
        (
            ConfigLoader::init_project(force)?,
            ConfigLoader::project_config_path(),
        )
    };

    println!(
        "✓ Initialized {} configuration",
        if global { "global" } else { "project" }
    );
    println!("  Directory: {}", dir.display());
    println!("  Config:    {}", config_path.display());
    Ok(())
}
