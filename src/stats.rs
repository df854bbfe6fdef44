use std::time::Duration;

use serde::Serialize;

use crate::pipeline::MergeStats;
use crate::readers::ReadStats;
use crate::store::CommitReport;

/// Statistics collected during one ingestion pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub snapshots: usize,
    pub recovered_snapshots: usize,
    pub lines_read: usize,
    pub fragments: usize,
    pub blank_lines: usize,
    pub records_parsed: usize,
    pub continuation_merges: usize,
    pub dropped_lines: usize,
    pub distinct_errors: usize,
    pub distinct_urls: usize,
    pub errors_inserted: usize,
    pub errors_updated: usize,
    pub url_batches: usize,
    pub snapshot_links: usize,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl IngestReport {
    pub fn add_read(&mut self, stats: ReadStats) {
        self.lines_read += stats.lines_read;
        self.fragments += stats.fragments;
        self.blank_lines += stats.blank_lines;
    }

    pub fn add_merge(&mut self, stats: MergeStats) {
        self.records_parsed += stats.parsed + stats.merged;
        self.continuation_merges += stats.merged;
        self.dropped_lines += stats.dropped;
    }

    pub fn add_commit(&mut self, report: CommitReport) {
        self.errors_inserted += report.errors_inserted;
        self.errors_updated += report.errors_updated;
        self.url_batches += report.url_batches;
        self.snapshot_links += report.snapshot_links_added;
    }

    pub fn format_stats(&self) -> String {
        let mut output = format!(
            "Lines processed: {} total, {} parsed, {} dropped",
            self.lines_read, self.records_parsed, self.dropped_lines
        );

        if self.continuation_merges > 0 {
            output.push_str(&format!(", {} joined", self.continuation_merges));
        }
        if self.fragments > 0 {
            output.push_str(&format!(", {} oversized fragments", self.fragments));
        }

        output.push_str(&format!(
            "; Errors: {} distinct ({} new, {} updated), {} URLs",
            self.distinct_errors, self.errors_inserted, self.errors_updated, self.distinct_urls
        ));

        if self.snapshot_links > 0 {
            output.push_str(&format!(", {} snapshot links", self.snapshot_links));
        }

        output.push_str(&format!("; {} snapshot", self.snapshots));
        if self.snapshots != 1 {
            output.push('s');
        }
        if self.recovered_snapshots > 0 {
            output.push_str(&format!(" ({} recovered)", self.recovered_snapshots));
        }

        let processing_time_ms = self.elapsed.as_millis();
        output.push_str(&format!(" in {}ms", processing_time_ms));

        if processing_time_ms > 0 && self.lines_read > 0 {
            let lines_per_sec = (self.lines_read as f64 * 1000.0) / processing_time_ms as f64;
            output.push_str(&format!(" ({:.0} lines/s)", lines_per_sec));
        }

        output
    }
}
