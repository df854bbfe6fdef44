pub mod error_log;

pub use error_log::{ErrorLogParser, ParseFailure, ParsedError};

/// Turns one logical log line into a structured error record.
///
/// Implemented by [`ErrorLogParser`]; closures work too, which keeps the continuation merger
/// testable against arbitrary accept/reject rules.
pub trait LineParser {
    fn parse_line(&self, line: &str) -> Result<ParsedError, ParseFailure>;
}

impl<F> LineParser for F
where
    F: Fn(&str) -> Result<ParsedError, ParseFailure>,
{
    fn parse_line(&self, line: &str) -> Result<ParsedError, ParseFailure> {
        self(line)
    }
}
