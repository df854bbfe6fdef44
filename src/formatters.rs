use std::io::{self, Write};

use chrono_tz::Tz;

use crate::colors::ColorScheme;
use crate::store::{group_by_severity, AggregateError, AggregateUrl, ErrorStatus};
use crate::timestamp::format_timestamp;

/// Renders query results to a writer
pub trait Formatter {
    fn write_errors(&self, out: &mut dyn Write, errors: &[AggregateError], grouped: bool)
        -> io::Result<()>;
    fn write_error(&self, out: &mut dyn Write, error: &AggregateError) -> io::Result<()>;
    fn write_urls(&self, out: &mut dyn Write, urls: &[AggregateUrl]) -> io::Result<()>;
}

/// Human-readable columns for the terminal
pub struct DefaultFormatter {
    colors: ColorScheme,
    timezone: Tz,
}

impl DefaultFormatter {
    pub fn new(use_colors: bool, timezone: Tz) -> Self {
        Self {
            colors: ColorScheme::new(use_colors),
            timezone,
        }
    }

    fn format_error_line(&self, error: &AggregateError) -> String {
        let c = &self.colors;
        let mut line = format!(
            "{}#{:<5}{} {}{:>6}x{} {}{}{} {}{}{} {}{}:{}{} {}",
            c.id,
            error.id,
            c.reset,
            c.count,
            error.occurrence_count,
            c.reset,
            c.timestamp,
            format_timestamp(&error.last_seen_at, self.timezone),
            c.reset,
            c.severity(&error.severity),
            error.severity,
            c.reset,
            c.location,
            error.source_file,
            error.source_line,
            c.reset,
            error.message,
        );
        if error.status == ErrorStatus::Resolved {
            line.push_str(&format!(" {}[resolved]{}", c.resolved, c.reset));
        }
        if let Some(issue) = &error.linked_issue_ref {
            line.push_str(&format!(" [{}]", issue));
        }
        if !error.snapshots.is_empty() {
            let n = error.snapshots.len();
            line.push_str(&format!(
                " ({} snapshot{})",
                n,
                if n == 1 { "" } else { "s" }
            ));
        }
        line
    }
}

impl Formatter for DefaultFormatter {
    fn write_errors(
        &self,
        out: &mut dyn Write,
        errors: &[AggregateError],
        grouped: bool,
    ) -> io::Result<()> {
        if errors.is_empty() {
            return writeln!(out, "No errors recorded.");
        }
        if !grouped {
            for error in errors {
                writeln!(out, "{}", self.format_error_line(error))?;
            }
            return Ok(());
        }

        for (index, (severity, group)) in group_by_severity(errors).into_iter().enumerate() {
            if index > 0 {
                writeln!(out)?;
            }
            writeln!(
                out,
                "{}{}{} ({})",
                self.colors.heading,
                severity,
                self.colors.reset,
                group.len()
            )?;
            for error in group {
                writeln!(out, "  {}", self.format_error_line(error))?;
            }
        }
        Ok(())
    }

    fn write_error(&self, out: &mut dyn Write, error: &AggregateError) -> io::Result<()> {
        let c = &self.colors;
        writeln!(out, "{}#{}{} {}", c.id, error.id, c.reset, error.fingerprint)?;
        writeln!(
            out,
            "severity:    {}{}{}",
            c.severity(&error.severity),
            error.severity,
            c.reset
        )?;
        writeln!(out, "message:     {}", error.message)?;
        writeln!(
            out,
            "location:    {}{}:{}{}",
            c.location, error.source_file, error.source_line, c.reset
        )?;
        writeln!(out, "status:      {}", error.status)?;
        writeln!(out, "occurrences: {}", error.occurrence_count)?;
        writeln!(
            out,
            "last seen:   {}",
            format_timestamp(&error.last_seen_at, self.timezone)
        )?;
        if let Some(issue) = &error.linked_issue_ref {
            writeln!(out, "issue:       {}", issue)?;
        }
        if !error.snapshots.is_empty() {
            writeln!(out, "snapshots:")?;
            for snapshot in &error.snapshots {
                writeln!(
                    out,
                    "  {}{}{}  {}",
                    c.timestamp,
                    format_timestamp(&snapshot.captured_at, self.timezone),
                    c.reset,
                    snapshot.snapshot_ref
                )?;
            }
        }
        if !error.comments.is_empty() {
            writeln!(out, "comments:")?;
            for comment in error.comments.lines() {
                writeln!(out, "  {}", comment)?;
            }
        }
        Ok(())
    }

    fn write_urls(&self, out: &mut dyn Write, urls: &[AggregateUrl]) -> io::Result<()> {
        if urls.is_empty() {
            return writeln!(out, "No URLs recorded.");
        }
        for url in urls {
            writeln!(
                out,
                "{}{:>6}x{} {}{}{} {}",
                self.colors.count,
                url.occurrence_count,
                self.colors.reset,
                self.colors.timestamp,
                format_timestamp(&url.last_seen_at, self.timezone),
                self.colors.reset,
                url.url
            )?;
        }
        Ok(())
    }
}

/// Pretty-printed JSON documents
pub struct JsonFormatter;

impl JsonFormatter {
    fn write_value<T: serde::Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *out, value)?;
        writeln!(out)
    }
}

impl Formatter for JsonFormatter {
    fn write_errors(
        &self,
        out: &mut dyn Write,
        errors: &[AggregateError],
        grouped: bool,
    ) -> io::Result<()> {
        if grouped {
            Self::write_value(out, &group_by_severity(errors))
        } else {
            Self::write_value(out, errors)
        }
    }

    fn write_error(&self, out: &mut dyn Write, error: &AggregateError) -> io::Result<()> {
        Self::write_value(out, error)
    }

    fn write_urls(&self, out: &mut dyn Write, urls: &[AggregateUrl]) -> io::Result<()> {
        Self::write_value(out, urls)
    }
}
