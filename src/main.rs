use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::{info, warn};

use errdigest::cli::{Cli, Command, ListArgs, OutputArgs, OutputFormat};
use errdigest::config_file::ConfigFile;
use errdigest::formatters::{DefaultFormatter, Formatter, JsonFormatter};
use errdigest::logging::init_logging;
use errdigest::platform::{is_broken_pipe, ExitCode, InterruptGuard};
use errdigest::timestamp::{parse_bound, Bound};
use errdigest::tty::should_use_colors_with_mode;
use errdigest::{DigestConfig, DigestError, ErrorQuery, LogAnalyzer};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitCode::InvalidUsage
            } else {
                ExitCode::Success
            };
            let _ = e.print();
            code.exit();
        }
    };

    init_logging(cli.global.verbose, cli.global.log_json);

    match run(cli) {
        Ok(code) => code.exit(),
        Err(e) if is_broken_pipe(&e) => ExitCode::Success.exit(),
        Err(e) => {
            eprintln!("errdigest: Error: {}", user_message(&e));
            exit_code_for(&e).exit();
        }
    }
}

const INTERNAL_FAILURE: &str = "the operation failed (rerun with -v for details)";

/// Rotation and storage failures print a generic line; the full chain goes to the log.
fn user_message(err: &anyhow::Error) -> String {
    let internal = err.chain().any(|cause| {
        cause
            .downcast_ref::<DigestError>()
            .is_some_and(DigestError::is_internal)
            || cause.is::<rusqlite::Error>()
    });
    if internal {
        info!(error = %format!("{:#}", err), "operation failed");
        INTERNAL_FAILURE.to_string()
    } else {
        format!("{:#}", err)
    }
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<DigestError>() {
        Some(e) if e.is_not_found() => ExitCode::NotFound,
        Some(DigestError::InvalidSnapshotRef(_)) => ExitCode::InvalidUsage,
        _ => ExitCode::GeneralError,
    }
}

fn usage_error(message: impl std::fmt::Display) -> ExitCode {
    eprintln!("errdigest: Error: {}", message);
    ExitCode::InvalidUsage
}

fn formatter_for(output: &OutputArgs, config: &DigestConfig) -> Box<dyn Formatter> {
    match output.format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Default => Box::new(DefaultFormatter::new(
            should_use_colors_with_mode(output.color_mode()),
            config.timezone,
        )),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "errdigest", &mut io::stdout());
        return Ok(ExitCode::Success);
    }

    let file = cli.global.load_config_file()?;
    for key in &file.unknown {
        warn!(key = %key, "ignoring unknown config key");
    }
    let config = cli.global.resolve_config(&file)?;

    if let Command::Config = cli.command {
        ConfigFile::show_config(&config, &file);
        return Ok(ExitCode::Success);
    }

    let mut analyzer = LogAnalyzer::open(config.clone()).with_context(|| {
        format!(
            "failed to open error database {}",
            config.database_path().display()
        )
    })?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Ingest { stats } => {
            let guard = InterruptGuard::install()?;
            let report = analyzer.ingest()?;
            guard.exit_if_interrupted();
            match report {
                Some(report) => {
                    writeln!(
                        out,
                        "Ingested {} records ({} distinct errors) from {} snapshot(s)",
                        report.records_parsed, report.distinct_errors, report.snapshots
                    )?;
                    if stats {
                        eprintln!("{}", report.format_stats());
                    }
                }
                None => writeln!(
                    out,
                    "Nothing ingested: no new log data, or another pass is running"
                )?,
            }
        }
        Command::List(args) => return list(&mut analyzer, &config, &args, &mut out),
        Command::Show { key, output } => {
            let error = analyzer.get_error(&key)?;
            formatter_for(&output, &config).write_error(&mut out, &error)?;
        }
        Command::Urls { key, limit, output } => {
            let urls = analyzer.list_urls(&key, Some(limit))?;
            formatter_for(&output, &config).write_urls(&mut out, &urls)?;
        }
        Command::Resolve { key } => {
            analyzer.mark_resolved(&key)?;
            writeln!(out, "Error {} marked resolved", key)?;
        }
        Command::Reopen { key } => {
            analyzer.mark_reopened(&key)?;
            writeln!(out, "Error {} reopened", key)?;
        }
        Command::Comment { key, text, author } => {
            if text.trim().is_empty() {
                return Ok(usage_error("comment text must not be empty"));
            }
            analyzer.append_comment(&key, &text, author.as_deref())?;
            writeln!(out, "Comment added to error {}", key)?;
        }
        Command::Link { key, issue } => {
            let issue = issue.as_deref().map(str::trim).filter(|i| !i.is_empty());
            analyzer.link_issue(&key, issue)?;
            match issue {
                Some(issue) => writeln!(out, "Error {} linked to {}", key, issue)?,
                None => writeln!(out, "Issue link removed from error {}", key)?,
            }
        }
        Command::Snapshot { reference } => {
            let bytes = analyzer.read_snapshot(&reference)?;
            out.write_all(&bytes)?;
        }
        // Answered before the store is opened.
        Command::Config | Command::Completions { .. } => {}
    }

    out.flush()?;
    Ok(ExitCode::Success)
}

fn list(
    analyzer: &mut LogAnalyzer,
    config: &DigestConfig,
    args: &ListArgs,
    out: &mut dyn Write,
) -> Result<ExitCode> {
    let since = match args.since.as_deref().map(|s| parse_bound(s, config.timezone, Bound::Start)) {
        Some(Err(e)) => return Ok(usage_error(format!("--since: {}", e))),
        Some(Ok(dt)) => Some(dt),
        None => None,
    };
    let until = match args.until.as_deref().map(|s| parse_bound(s, config.timezone, Bound::End)) {
        Some(Err(e)) => return Ok(usage_error(format!("--until: {}", e))),
        Some(Ok(dt)) => Some(dt),
        None => None,
    };

    let query = ErrorQuery {
        since,
        until,
        only_active: !args.all,
        order: args.order.into(),
    };

    let errors = if args.no_ingest {
        analyzer.list_errors_without_ingest(&query)?
    } else {
        let guard = InterruptGuard::install()?;
        let errors = analyzer.list_errors(&query)?;
        guard.exit_if_interrupted();
        errors
    };

    formatter_for(&args.output, config).write_errors(out, &errors, args.group)?;
    out.flush()?;
    Ok(ExitCode::Success)
}
