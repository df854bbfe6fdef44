// Command-line surface: argument definitions and their mapping onto DigestConfig

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use crate::config::{parse_timezone, ColorMode, DigestConfig};
use crate::config_file::ConfigFile;
use crate::store::{ErrorKey, ErrorOrder};

/// Default row cap for `urls`
pub const DEFAULT_URL_LIMIT: usize = 100;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Default,
    Json,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderBy {
    #[default]
    Count,
    LastSeen,
}

impl From<OrderBy> for ErrorOrder {
    fn from(order: OrderBy) -> Self {
        match order {
            OrderBy::Count => ErrorOrder::Count,
            OrderBy::LastSeen => ErrorOrder::LastSeen,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "errdigest")]
#[command(about = "Rotate an application error log and keep recurring errors aggregated and queryable")]
#[command(
    long_about = "Rotate an application error log and keep recurring errors aggregated and queryable\n\nEach ingestion pass takes the active log away under an exclusive lock, parses it, folds\nrepeated errors into one record per (severity, message, file, line) and adds the counts to\nthe SQLite store. Listing errors runs a pass first when new log data is waiting.\n\nCOMMON EXAMPLES:\n  errdigest --log-dir /var/log/app ingest --stats\n  errdigest list --since 24h --order last-seen\n  errdigest urls 42 --limit 20\n  errdigest resolve 42"
)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Use this config file instead of searching for one
    #[arg(long, global = true, value_name = "PATH", help_heading = "Configuration")]
    pub config: Option<PathBuf>,

    /// Do not load any config file
    #[arg(long = "ignore-config", global = true, conflicts_with = "config", help_heading = "Configuration")]
    pub ignore_config: bool,

    /// Directory holding the active log, the lock file and diagnostic snapshots
    #[arg(long = "log-dir", global = true, value_name = "DIR", help_heading = "Configuration")]
    pub log_dir: Option<PathBuf>,

    /// SQLite database path (default: <log-dir>/errdigest.sqlite3)
    #[arg(long, global = true, value_name = "PATH", help_heading = "Configuration")]
    pub database: Option<PathBuf>,

    /// Time zone for zone-less log timestamps and for display (e.g. Europe/Prague)
    #[arg(long = "tz", global = true, value_name = "ZONE", help_heading = "Configuration")]
    pub timezone: Option<String>,

    /// More diagnostics on stderr (-v info, -vv debug); ERRDIGEST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count, help_heading = "Diagnostics")]
    pub verbose: u8,

    /// Emit diagnostics as JSON lines
    #[arg(long = "log-json", global = true, help_heading = "Diagnostics")]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one ingestion pass (does nothing if another pass holds the lock)
    Ingest {
        /// Print pass statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// List aggregated errors, ingesting pending log data first
    List(ListArgs),

    /// Show one error with its snapshots and comments
    Show {
        #[arg(value_parser = parse_error_key, value_name = "ID|FINGERPRINT")]
        key: ErrorKey,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List the URLs an error was seen on, most frequent first
    Urls {
        #[arg(value_parser = parse_error_key, value_name = "ID|FINGERPRINT")]
        key: ErrorKey,

        /// Maximum number of URLs
        #[arg(long, default_value_t = DEFAULT_URL_LIMIT)]
        limit: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Mark an error as resolved
    Resolve {
        #[arg(value_parser = parse_error_key, value_name = "ID|FINGERPRINT")]
        key: ErrorKey,
    },

    /// Mark a resolved error as active again
    Reopen {
        #[arg(value_parser = parse_error_key, value_name = "ID|FINGERPRINT")]
        key: ErrorKey,
    },

    /// Append a timestamped comment to an error
    Comment {
        #[arg(value_parser = parse_error_key, value_name = "ID|FINGERPRINT")]
        key: ErrorKey,

        text: String,

        #[arg(long)]
        author: Option<String>,
    },

    /// Link an error to an issue; omit ISSUE to clear the link
    Link {
        #[arg(value_parser = parse_error_key, value_name = "ID|FINGERPRINT")]
        key: ErrorKey,

        issue: Option<String>,
    },

    /// Write a stored diagnostic snapshot to stdout
    Snapshot {
        #[arg(value_name = "REF")]
        reference: String,
    },

    /// Show the effective configuration and where it came from
    Config,

    /// Generate a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Only errors last seen at or after this time (date, date-time, RFC 3339 or duration like 24h)
    #[arg(long, value_name = "WHEN")]
    pub since: Option<String>,

    /// Only errors last seen at or before this time; a bare date includes the whole day
    #[arg(long, value_name = "WHEN")]
    pub until: Option<String>,

    /// Include resolved errors
    #[arg(long)]
    pub all: bool,

    #[arg(long, value_enum, default_value = "count")]
    pub order: OrderBy,

    /// Do not ingest pending log data first
    #[arg(long = "no-ingest")]
    pub no_ingest: bool,

    /// Group by severity
    #[arg(long)]
    pub group: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "format", value_enum, default_value = "default")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long = "no-color", conflicts_with = "force_color")]
    pub no_color: bool,

    /// Force colored output even when stdout is not a terminal
    #[arg(long = "force-color")]
    pub force_color: bool,
}

impl OutputArgs {
    pub fn color_mode(&self) -> ColorMode {
        if self.no_color {
            ColorMode::Never
        } else if self.force_color {
            ColorMode::Always
        } else {
            ColorMode::Auto
        }
    }
}

fn parse_error_key(value: &str) -> std::result::Result<ErrorKey, String> {
    value.parse::<ErrorKey>().map_err(|e| e.to_string())
}

impl GlobalArgs {
    /// Load the config file this invocation asks for (if any).
    pub fn load_config_file(&self) -> Result<ConfigFile> {
        if self.ignore_config {
            return Ok(ConfigFile::default());
        }
        ConfigFile::load_with_custom_path(self.config.as_deref())
    }

    /// defaults < config file < command line
    pub fn resolve_config(&self, file: &ConfigFile) -> Result<DigestConfig> {
        let mut config = DigestConfig::default();
        config.apply_file(file, file.base_dir())?;

        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(database) = &self.database {
            config.database = Some(database.clone());
        }
        if let Some(zone) = &self.timezone {
            config.timezone = parse_timezone(zone)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_options() {
        let cli = Cli::try_parse_from([
            "errdigest",
            "--log-dir",
            "/var/log/app",
            "list",
            "--since",
            "24h",
            "--order",
            "last-seen",
            "--all",
            "-F",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.global.log_dir, Some(PathBuf::from("/var/log/app")));
        let Command::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.since.as_deref(), Some("24h"));
        assert_eq!(args.order, OrderBy::LastSeen);
        assert!(args.all);
        assert_eq!(args.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["errdigest", "ingest", "-vv", "--database", "x.db"]).unwrap();
        assert_eq!(cli.global.verbose, 2);
        assert_eq!(cli.global.database, Some(PathBuf::from("x.db")));
    }

    #[test]
    fn test_invalid_key_is_a_usage_error() {
        let err = Cli::try_parse_from(["errdigest", "resolve", "not-a-key"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_urls_default_limit() {
        let cli = Cli::try_parse_from(["errdigest", "urls", "3"]).unwrap();
        match cli.command {
            Command::Urls { key, limit, .. } => {
                assert_eq!(key, ErrorKey::Id(3));
                assert_eq!(limit, DEFAULT_URL_LIMIT);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let file = ConfigFile::parse_ini_content("log_dir = /from/file\ntimezone = Asia/Tokyo").unwrap();
        let global = GlobalArgs {
            log_dir: Some(PathBuf::from("/from/cli")),
            ..GlobalArgs::default()
        };
        let config = global.resolve_config(&file).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/from/cli"));
        assert_eq!(config.timezone, chrono_tz::Tz::Asia__Tokyo);
    }
}
