use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader};
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::aggregate::{Aggregator, Drafts};
use crate::config::DigestConfig;
use crate::error::{DigestError, Result};
use crate::parsers::ErrorLogParser;
use crate::pipeline::ContinuationMerger;
use crate::readers::BoundedLineReader;
use crate::rotation::{LogRotator, SnapshotHandle};
use crate::stats::IngestReport;
use crate::store::{AggregateError, AggregateUrl, ErrorKey, ErrorQuery, ErrorStore};
use crate::timestamp::format_timestamp;

/// Ties the rotator, parser, aggregator and store together.
pub struct LogAnalyzer {
    config: DigestConfig,
    rotator: LogRotator,
    parser: ErrorLogParser,
    store: ErrorStore,
}

impl LogAnalyzer {
    pub fn open(config: DigestConfig) -> Result<Self> {
        let database = config.database_path();
        let store = ErrorStore::open(&database)?.with_url_batch_size(config.url_batch_size);
        debug!(database = %database.display(), "opened aggregate store");
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: DigestConfig, store: ErrorStore) -> Self {
        Self {
            rotator: LogRotator::from_config(&config),
            parser: ErrorLogParser::new(config.timezone),
            store,
            config,
        }
    }

    pub fn config(&self) -> &DigestConfig {
        &self.config
    }

    pub fn has_pending_work(&self) -> bool {
        self.rotator.has_pending_work()
    }

    /// Run one ingestion pass.
    ///
    /// `Ok(None)` means another pass holds the lock or there was no log data.
    pub fn ingest(&mut self) -> Result<Option<IngestReport>> {
        let started = Instant::now();
        let Some(pass) = self.rotator.begin_ingestion_pass()? else {
            return Ok(None);
        };

        let mut report = IngestReport {
            snapshots: pass.snapshots().len(),
            recovered_snapshots: pass.recovered(),
            ..IngestReport::default()
        };

        let mut aggregator = Aggregator::new();
        for snapshot in pass.snapshots() {
            self.read_snapshot_into(snapshot, &mut aggregator, &mut report)?;
        }

        let mut drafts = aggregator.into_drafts();
        self.resolve_capture_times(&mut drafts);
        report.distinct_errors = drafts.len();
        report.distinct_urls = drafts.values().map(|d| d.urls.len()).sum();

        let committed = self.store.commit(&drafts)?;
        report.add_commit(committed);

        // Snapshots are deleted and the lock released here.
        drop(pass);
        report.elapsed = started.elapsed();

        info!(
            snapshots = report.snapshots,
            lines = report.lines_read,
            records = report.records_parsed,
            dropped = report.dropped_lines,
            errors = report.distinct_errors,
            "ingestion pass complete"
        );
        Ok(Some(report))
    }

    fn read_snapshot_into(
        &self,
        snapshot: &SnapshotHandle,
        aggregator: &mut Aggregator,
        report: &mut IngestReport,
    ) -> Result<()> {
        let file = snapshot.open()?;
        let mut reader = BoundedLineReader::new(BufReader::new(file), self.config.max_line_length);
        let mut read_error: Option<io::Error> = None;

        let merge_stats = {
            let lines = reader.by_ref().map_while(|line| match line {
                Ok(line) => Some(line),
                Err(e) => {
                    read_error = Some(e);
                    None
                }
            });
            let mut merger = ContinuationMerger::new(lines, &self.parser);
            aggregator.extend(merger.by_ref());
            merger.stats()
        };

        report.add_read(reader.stats());
        report.add_merge(merge_stats);
        debug!(
            path = %snapshot.path().display(),
            recovered = snapshot.is_recovered(),
            parsed = merge_stats.parsed,
            merged = merge_stats.merged,
            dropped = merge_stats.dropped,
            "read log snapshot"
        );

        match read_error {
            Some(e) => Err(DigestError::io(snapshot.path(), e)),
            None => Ok(()),
        }
    }

    /// Use the diagnostic file's modification time as capture time when the file exists.
    fn resolve_capture_times(&self, drafts: &mut Drafts) {
        let mut cache: HashMap<String, Option<DateTime<Utc>>> = HashMap::new();
        for draft in drafts.values_mut() {
            for snapshot in &mut draft.snapshots {
                let modified = cache
                    .entry(snapshot.reference.clone())
                    .or_insert_with(|| snapshot_mtime(&self.config.log_dir, &snapshot.reference));
                if let Some(modified) = modified {
                    snapshot.captured_at = *modified;
                }
            }
        }
    }

    /// Query interface. Runs an ingestion pass first when there is unprocessed log data.
    pub fn list_errors(&mut self, query: &ErrorQuery) -> Result<Vec<AggregateError>> {
        if self.has_pending_work() {
            if let Some(report) = self.ingest()? {
                debug!(stats = %report.format_stats(), "ingested before listing");
            }
        }
        self.list_errors_without_ingest(query)
    }

    pub fn list_errors_without_ingest(&self, query: &ErrorQuery) -> Result<Vec<AggregateError>> {
        self.store.list_errors(query)
    }

    pub fn get_error(&self, key: &ErrorKey) -> Result<AggregateError> {
        self.store.get_error(key)
    }

    pub fn list_urls(&self, key: &ErrorKey, limit: Option<usize>) -> Result<Vec<AggregateUrl>> {
        self.store.list_urls(key, limit)
    }

    pub fn mark_resolved(&self, key: &ErrorKey) -> Result<()> {
        self.store.mark_resolved(key)
    }

    pub fn mark_reopened(&self, key: &ErrorKey) -> Result<()> {
        self.store.mark_reopened(key)
    }

    pub fn append_comment(&self, key: &ErrorKey, text: &str, author: Option<&str>) -> Result<()> {
        let line = format_comment(Utc::now(), self.config.timezone, text, author);
        self.store.append_comment(key, &line)
    }

    pub fn link_issue(&self, key: &ErrorKey, issue_ref: Option<&str>) -> Result<()> {
        self.store.link_issue(key, issue_ref)
    }

    /// Blob interface: raw bytes of a diagnostic snapshot in `log_dir`.
    pub fn read_snapshot(&self, reference: &str) -> Result<Vec<u8>> {
        validate_snapshot_ref(reference)?;
        let path = self.config.log_dir.join(reference);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(DigestError::SnapshotNotFound(reference.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DigestError::SnapshotNotFound(reference.to_string()))
            }
            Err(e) => return Err(DigestError::io(path, e)),
        }
        fs::read(&path).map_err(|e| DigestError::io(path, e))
    }
}

/// Reject references that could name something outside `log_dir`.
pub fn validate_snapshot_ref(reference: &str) -> Result<()> {
    let invalid = reference.is_empty()
        || reference.contains('/')
        || reference.contains('\\')
        || reference.contains("..")
        || reference.contains('\0');
    if invalid {
        return Err(DigestError::InvalidSnapshotRef(reference.to_string()));
    }
    Ok(())
}

/// `2024-01-31 12:00:00 - text (#author)`
pub fn format_comment(
    at: DateTime<Utc>,
    tz: chrono_tz::Tz,
    text: &str,
    author: Option<&str>,
) -> String {
    let mut line = format!("{} - {}", format_timestamp(&at, tz), text.trim());
    if let Some(author) = author.map(str::trim).filter(|a| !a.is_empty()) {
        line.push_str(&format!(" (#{})", author));
    }
    line
}

fn snapshot_mtime(log_dir: &Path, reference: &str) -> Option<DateTime<Utc>> {
    validate_snapshot_ref(reference).ok()?;
    let modified = fs::metadata(log_dir.join(reference))
        .and_then(|m| m.modified())
        .ok()?;
    Some(DateTime::<Utc>::from(modified))
}
