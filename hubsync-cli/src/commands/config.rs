//! `config get`, `config set`, `config list` and `config path`.

use std::fmt::Write as _;
use std::path::Path;

use clap::Subcommand;
use hubsync::config::{config_file_path, ConfigFile, ConfigKey};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Get a configuration value
    Get {
        /// Configuration key in format section.key (e.g., channel.endpoint)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key in format section.key (e.g., channel.endpoint)
        key: String,

        /// Value to set
        value: String,
    },

    /// List all configuration settings
    List,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand against `~/.hubsync/config.ini`.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    let path = config_file_path();
    match command {
        ConfigCommands::Get { key } => println!("{}", get_value(&path, &key)?),
        ConfigCommands::Set { key, value } => {
            let key = set_value(&path, &key, &value)?;
            println!("Set {} = {}", key, value);
        }
        ConfigCommands::List => print!("{}", list(&path)?),
        ConfigCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Use 'hubsync config list' to see available keys.",
            key
        ))
    })
}

fn load(path: &Path) -> Result<ConfigFile, CliError> {
    if path.exists() {
        Ok(ConfigFile::load_from(path)?)
    } else {
        Ok(ConfigFile::default())
    }
}

fn get_value(path: &Path, key: &str) -> Result<String, CliError> {
    let key = parse_key(key)?;
    let value = key.get(&load(path)?);
    if value.is_empty() {
        Ok("(not set)".to_string())
    } else {
        Ok(value)
    }
}

fn set_value(path: &Path, key: &str, value: &str) -> Result<ConfigKey, CliError> {
    let key = parse_key(key)?;
    let mut config = load(path)?;
    key.set(&mut config, value)?;
    config.save_to(path)?;
    Ok(key)
}

fn list(path: &Path) -> Result<String, CliError> {
    let config = load(path)?;
    let mut out = String::new();

    let _ = writeln!(out, "Configuration Settings");
    let _ = writeln!(out, "======================");

    let mut current_section = "";
    for key in ConfigKey::all() {
        let section = key.section();
        if section != current_section {
            let _ = writeln!(out);
            let _ = writeln!(out, "[{}]", section);
            current_section = section;
        }

        let value = key.get(&config);
        if value.is_empty() {
            let _ = writeln!(out, "  {} = (not set)", key.key_name());
        } else {
            let _ = writeln!(out, "  {} = {}", key.key_name(), value);
        }
    }

    Ok(out)
}
