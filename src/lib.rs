// Core library for errdigest: error-log rotation, parsing, aggregation and storage

pub mod aggregate;
pub mod cli;
pub mod colors;
pub mod config;
pub mod config_file;
pub mod error;
pub mod formatters;
pub mod logging;
pub mod parsers;
pub mod pipeline;
pub mod platform;
pub mod readers;
pub mod rotation;
pub mod service;
pub mod stats;
pub mod store;
pub mod timestamp;
pub mod tty;

pub use aggregate::{aggregate, AggregateDraft, Aggregator, Drafts, ErrorFingerprint, UrlFingerprint};
pub use config::DigestConfig;
pub use error::{DigestError, Result};
pub use parsers::{ErrorLogParser, LineParser, ParseFailure, ParsedError};
pub use pipeline::{ContinuationMerger, MergeStats};
pub use rotation::{FileLock, IngestionPass, LeaseProvider, LogRotator, SnapshotHandle};
pub use service::LogAnalyzer;
pub use stats::IngestReport;
pub use store::{
    AggregateError, AggregateUrl, ErrorKey, ErrorOrder, ErrorQuery, ErrorStatus, ErrorStore,
    SnapshotLink,
};
