use std::io::{self, IsTerminal};
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding a `tracing` filter directive, e.g. `errdigest=debug`
pub const LOG_ENV: &str = "ERRDIGEST_LOG";

/// Default filter for a `-v` count when `ERRDIGEST_LOG` is unset
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Initialize diagnostics on stderr.
///
/// `ERRDIGEST_LOG` wins over the verbosity flag. A subscriber that is already installed
/// (tests calling this twice) is left in place.
pub fn init_logging(verbosity: u8, json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let builder = fmt().with_env_filter(filter).with_writer(io::stderr);
    let _ = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder
            .with_ansi(io::stderr().is_terminal())
            .with_target(false)
            .try_init()
    };
}
