//! Configuration view and validation: `merge-agent config`.

use std::path::Path;

use anyhow::Result;

use super::super::ConfigCommands;

use merge_agent::config::Config;

pub fn cmd_config(config_path: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let config = Config::load(config_path)?;

    match command {
        None | Some(ConfigCommands::Show) => {
            print!("{}", config.redacted().to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }

    Ok(())
}
