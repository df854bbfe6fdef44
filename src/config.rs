use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};

use crate::config_file::ConfigFile;

pub const DEFAULT_LOG_FILE: &str = "error.log";
pub const DEFAULT_LOCK_FILE: &str = "lock-errdigest";
pub const DEFAULT_DATABASE_FILE: &str = "errdigest.sqlite3";
pub const DEFAULT_URL_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Color output mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorMode {
    #[default]
    Auto,
    Always,
    Never,
}

/// Runtime configuration for ingestion and queries
#[derive(Debug, Clone, PartialEq)]
pub struct DigestConfig {
    /// Directory holding the active log, the lock file and diagnostic snapshots
    pub log_dir: PathBuf,
    /// Name of the active log inside `log_dir`
    pub log_file: String,
    /// Name of the lock file inside `log_dir`
    pub lock_file: String,
    /// Explicit database path; `None` means `<log_dir>/errdigest.sqlite3`
    pub database: Option<PathBuf>,
    pub url_batch_size: usize,
    pub max_line_length: usize,
    /// Zone for log timestamps without their own zone, and for display
    pub timezone: Tz,
    pub recover_orphans: bool,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl DigestConfig {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            log_file: DEFAULT_LOG_FILE.to_string(),
            lock_file: DEFAULT_LOCK_FILE.to_string(),
            database: None,
            url_batch_size: DEFAULT_URL_BATCH_SIZE,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            timezone: Tz::UTC,
            recover_orphans: true,
        }
    }

    pub fn active_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.log_dir.join(&self.lock_file)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.log_dir.join(DEFAULT_DATABASE_FILE))
    }

    /// Overlay values from a config file. Relative paths resolve against `base_dir`.
    pub fn apply_file(&mut self, file: &ConfigFile, base_dir: Option<&Path>) -> Result<()> {
        let resolve = |value: &str| -> PathBuf {
            let path = PathBuf::from(value);
            match base_dir {
                Some(base) if path.is_relative() => base.join(path),
                _ => path,
            }
        };

        if let Some(value) = file.get("log_dir") {
            self.log_dir = resolve(value);
        }
        if let Some(value) = file.get("log_file") {
            self.log_file = parse_file_name("log_file", value)?;
        }
        if let Some(value) = file.get("lock_file") {
            self.lock_file = parse_file_name("lock_file", value)?;
        }
        if let Some(value) = file.get("database") {
            self.database = Some(resolve(value));
        }
        if let Some(value) = file.get("url_batch_size") {
            self.url_batch_size = parse_positive("url_batch_size", value)?;
        }
        if let Some(value) = file.get("max_line_length") {
            self.max_line_length = parse_positive("max_line_length", value)?;
        }
        if let Some(value) = file.get("timezone") {
            self.timezone = parse_timezone(value)?;
        }
        if let Some(value) = file.get("recover_orphans") {
            self.recover_orphans = parse_bool("recover_orphans", value)?;
        }
        Ok(())
    }

    /// Render the effective configuration as `key = value` lines.
    pub fn describe(&self) -> Vec<(String, String)> {
        vec![
            ("log_dir".to_string(), self.log_dir.display().to_string()),
            ("log_file".to_string(), self.log_file.clone()),
            ("lock_file".to_string(), self.lock_file.clone()),
            (
                "database".to_string(),
                self.database_path().display().to_string(),
            ),
            ("url_batch_size".to_string(), self.url_batch_size.to_string()),
            (
                "max_line_length".to_string(),
                self.max_line_length.to_string(),
            ),
            ("timezone".to_string(), self.timezone.name().to_string()),
            (
                "recover_orphans".to_string(),
                self.recover_orphans.to_string(),
            ),
        ]
    }
}

pub fn parse_timezone(value: &str) -> Result<Tz> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|e| anyhow!("invalid timezone '{}': {}", value, e))
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    let parsed: usize = value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a positive integer, got '{}'", key, value))?;
    if parsed == 0 {
        return Err(anyhow!("{} must be greater than zero", key));
    }
    Ok(parsed)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(anyhow!("{} must be true or false, got '{}'", key, other)),
    }
}

fn parse_file_name(key: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() || value.contains('/') || value.contains('\\') || value == ".." {
        return Err(anyhow!(
            "{} must be a plain file name inside log_dir, got '{}'",
            key,
            value
        ));
    }
    Ok(value.to_string())
}
