use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::LineParser;
use crate::timestamp::parse_log_timestamp;

/// Severity every exception-class label is folded into.
pub const FATAL_SEVERITY: &str = "Fatal error";

// Line format:
//   [<date> <time>] [PHP ]<severity>: <message> in <path>:<line>[  @  <url>][  @@  <snapshot>]
//
// The `U` flag swaps greediness, so `.+?` below is greedy and `.+` is lazy. Matching is
// leftmost-first, which keeps capture boundaries identical to a backtracking engine.
static LINE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?iU)^\[(?P<date>.+?) (?P<time>.+)\] (PHP )*?(?P<severity>.+): (?P<message>.+)",
        r" in (?P<file>[/\\a-z0-9_.:-]+):(?P<line>\d+)",
        r"(  @  (?P<url>.+))?(  @@  (?P<snapshot>.+))?$",
    ))
    .expect("error log line pattern must compile")
});

/// One error observation recovered from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedError {
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    pub message: String,
    pub source_file: String,
    pub source_line: u32,
    pub origin_url: Option<String>,
    pub snapshot_ref: Option<String>,
}

/// Why a line did not produce a [`ParsedError`].
///
/// Continuation lines of wrapped entries fail with `NoMatch`; that is the normal case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    NoMatch,
    BadTimestamp(String),
    BadLineNumber(String),
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::NoMatch => write!(f, "line does not match the error log format"),
            ParseFailure::BadTimestamp(stamp) => {
                write!(f, "cannot build a timestamp from '{}'", stamp)
            }
            ParseFailure::BadLineNumber(raw) => write!(f, "invalid source line number '{}'", raw),
        }
    }
}

impl std::error::Error for ParseFailure {}

/// Parser for the single recognised error-log line format.
#[derive(Debug, Clone)]
pub struct ErrorLogParser {
    timezone: Tz,
}

impl Default for ErrorLogParser {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl ErrorLogParser {
    /// `timezone` applies to timestamps that carry no zone of their own.
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn parse(&self, line: &str) -> Result<ParsedError, ParseFailure> {
        let captures = LINE_PATTERN.captures(line).ok_or(ParseFailure::NoMatch)?;
        let capture = |name: &str| captures.name(name).map(|m| m.as_str()).unwrap_or_default();

        // `date` is greedy and swallows the clock when the stamp carries a zone.
        let stamp = format!("{} {}", capture("date"), capture("time").replace('-', ":"));
        let timestamp = parse_log_timestamp(&stamp, self.timezone)
            .ok_or_else(|| ParseFailure::BadTimestamp(stamp.clone()))?;

        let raw_line = capture("line");
        let source_line = raw_line
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ParseFailure::BadLineNumber(raw_line.to_string()))?;

        let (severity, message) = fold_exception_severity(capture("severity"), capture("message"));

        Ok(ParsedError {
            timestamp,
            severity,
            message,
            source_file: capture("file").to_string(),
            source_line,
            origin_url: captures.name("url").map(|m| m.as_str().to_string()),
            snapshot_ref: captures.name("snapshot").map(|m| m.as_str().to_string()),
        })
    }
}

impl LineParser for ErrorLogParser {
    fn parse_line(&self, line: &str) -> Result<ParsedError, ParseFailure> {
        self.parse(line)
    }
}

/// Parse with zone-less timestamps read as UTC.
pub fn parse_line(line: &str) -> Result<ParsedError, ParseFailure> {
    ErrorLogParser::default().parse(line)
}

/// Exception class names move into the message so distinct classes stay distinct, while the
/// severity buckets them all under [`FATAL_SEVERITY`].
fn fold_exception_severity(severity: &str, message: &str) -> (String, String) {
    if severity.to_lowercase().contains("exception") {
        (
            FATAL_SEVERITY.to_string(),
            format!("{}: {}", severity, message),
        )
    } else {
        (severity.to_string(), message.to_string())
    }
}
