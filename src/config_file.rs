use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::config::DigestConfig;

const PROJECT_CONFIG_NAME: &str = ".errdigestrc";

/// Keys understood by errdigest
const KNOWN_KEYS: &[&str] = &[
    "log_dir",
    "log_file",
    "lock_file",
    "max_line_length",
    "timezone",
    "recover_orphans",
    "database",
    "url_batch_size",
];

/// Sections a known key may appear under, besides the root
const KNOWN_SECTIONS: &[&str] = &["ingest", "storage"];

/// Configuration file handler for errdigest
#[derive(Debug, Default, Clone)]
pub struct ConfigFile {
    values: IndexMap<String, String>,
    /// Keys that were present but not understood, as `section.key`
    pub unknown: Vec<String>,
    /// Where the file was loaded from, if anywhere
    pub source: Option<PathBuf>,
}

impl ConfigFile {
    /// Find project-level .errdigestrc by walking up directory tree
    pub fn find_project_config() -> Option<PathBuf> {
        let mut current = env::current_dir().ok()?;
        loop {
            let config_path = current.join(PROJECT_CONFIG_NAME);
            if config_path.exists() {
                return Some(config_path);
            }
            if !current.pop() {
                break;
            }
        }
        None
    }

    /// User config location: $XDG_CONFIG_HOME/errdigest/config.ini, else ~/.config/errdigest/config.ini
    pub fn user_config_path() -> Option<PathBuf> {
        let base = env::var_os("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))?;
        Some(base.join("errdigest").join("config.ini"))
    }

    /// Search locations in precedence order: project .errdigestrc, then user config
    pub fn get_config_paths() -> Vec<PathBuf> {
        Self::find_project_config()
            .into_iter()
            .chain(Self::user_config_path())
            .collect()
    }

    /// Find the first existing configuration file
    pub fn find_config_path() -> Option<PathBuf> {
        Self::get_config_paths().into_iter().find(|p| p.exists())
    }

    /// Load the explicit file if given, otherwise the first discovered one.
    ///
    /// An explicit path that cannot be read is an error; a missing discovered file is not.
    pub fn load_with_custom_path(custom_path: Option<&Path>) -> Result<Self> {
        match custom_path {
            Some(path) => Self::load_from_path(path),
            None => match Self::find_config_path() {
                Some(path) => Self::load_from_path(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse_ini_content(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse INI content from string
    pub fn parse_ini_content(content: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut current_section = String::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current_section = line[1..line.len() - 1].trim().to_ascii_lowercase();
                continue;
            }

            let Some(eq_pos) = line.find('=') else {
                return Err(anyhow!(
                    "line {}: expected 'key = value', got '{}'",
                    index + 1,
                    line
                ));
            };
            let key = line[..eq_pos].trim().to_ascii_lowercase().replace('-', "_");
            let value = unquote(line[eq_pos + 1..].trim());

            let known = KNOWN_KEYS.contains(&key.as_str())
                && (current_section.is_empty()
                    || KNOWN_SECTIONS.contains(&current_section.as_str()));
            if known {
                config.values.insert(key, value.to_string());
            } else if current_section.is_empty() {
                config.unknown.push(key);
            } else {
                config.unknown.push(format!("{}.{}", current_section, key));
            }
        }

        Ok(config)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Directory that relative paths in this file resolve against
    pub fn base_dir(&self) -> Option<&Path> {
        self.source.as_deref().and_then(Path::parent)
    }

    /// Show configuration information with precedence details
    pub fn show_config(config: &DigestConfig, loaded: &ConfigFile) {
        println!("Configuration precedence: CLI > --config > project .errdigestrc > user config > defaults\n");

        match &loaded.source {
            Some(path) => println!("Configuration loaded from:\n  {}", path.display()),
            None => println!("No configuration file loaded. Using defaults."),
        }
        for key in &loaded.unknown {
            println!("  (ignored unknown key '{}')", key);
        }

        println!("\nEffective settings:");
        for (key, value) in config.describe() {
            println!("  {} = {}", key, value);
        }

        println!("\nConfiguration search locations (in precedence order):");
        match Self::find_project_config() {
            Some(path) => println!("  1. Project: {} (found)", path.display()),
            None => println!("  1. Project: {} (searched up directory tree, not found)", PROJECT_CONFIG_NAME),
        }
        if let Some(path) = Self::user_config_path() {
            let status = if path.exists() { "(found)" } else { "(not found)" };
            println!("  2. User: {} {}", path.display(), status);
        }

        if loaded.source.is_none() {
            println!("\nExample configuration file ({}):", PROJECT_CONFIG_NAME);
            println!();
            println!("log_dir = /var/log/myapp");
            println!();
            println!("[ingest]");
            println!("timezone = Europe/Prague");
            println!("max_line_length = 8192");
            println!();
            println!("[storage]");
            println!("database = /var/lib/errdigest/errors.sqlite3");
            println!("url_batch_size = 50");
        }
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
