use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::parsers::ParsedError;

/// Drafts keyed by fingerprint, in first-seen order.
pub type Drafts = IndexMap<ErrorFingerprint, AggregateDraft>;

/// Length-prefixed SHA-256 over the given fields, hex encoded.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` apart.
fn digest_fields(fields: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Identity of a logical defect: digest of severity, message, source file and source line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorFingerprint(String);

impl ErrorFingerprint {
    pub fn of(severity: &str, message: &str, source_file: &str, source_line: u32) -> Self {
        let line = source_line.to_string();
        Self(digest_fields(&[
            severity.as_bytes(),
            message.as_bytes(),
            source_file.as_bytes(),
            line.as_bytes(),
        ]))
    }

    pub fn for_error(error: &ParsedError) -> Self {
        Self::of(
            &error.severity,
            &error.message,
            &error.source_file,
            error.source_line,
        )
    }

    /// Accepts a stored or user-supplied fingerprint (64 hex digits, any case).
    pub fn parse(value: &str) -> Option<Self> {
        is_sha256_hex(value).then(|| Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ErrorFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Digest of a URL string, unique per error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UrlFingerprint(String);

impl UrlFingerprint {
    pub fn of(url: &str) -> Self {
        Self(digest_fields(&[url.as_bytes()]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UrlFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for UrlFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Per-URL tally inside a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlDraft {
    pub url: String,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
}

impl UrlDraft {
    fn new(url: String, seen_at: DateTime<Utc>) -> Self {
        Self {
            url,
            count: 1,
            last_seen: seen_at,
        }
    }

    fn record(&mut self, seen_at: DateTime<Utc>) {
        self.count += 1;
        self.last_seen = seen_at;
    }
}

/// A diagnostic snapshot referenced by an observation.
///
/// `captured_at` starts as the observation time; the ingestion pass replaces it with the
/// snapshot file's modification time when the file is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotObservation {
    pub reference: String,
    pub captured_at: DateTime<Utc>,
}

/// In-memory accumulation of every observation sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateDraft {
    pub fingerprint: ErrorFingerprint,
    pub severity: String,
    pub message: String,
    pub source_file: String,
    pub source_line: u32,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
    pub urls: IndexMap<UrlFingerprint, UrlDraft>,
    pub snapshots: Vec<SnapshotObservation>,
}

impl AggregateDraft {
    fn new(fingerprint: ErrorFingerprint, error: ParsedError) -> Self {
        let mut draft = Self {
            fingerprint,
            severity: error.severity,
            message: error.message,
            source_file: error.source_file,
            source_line: error.source_line,
            count: 1,
            last_seen: error.timestamp,
            urls: IndexMap::new(),
            snapshots: Vec::new(),
        };
        draft.attach(error.origin_url, error.snapshot_ref, error.timestamp);
        draft
    }

    /// Fold a later observation in. Timestamps are last-write-wins, not max.
    fn record(&mut self, error: ParsedError) {
        self.count += 1;
        self.last_seen = error.timestamp;
        self.attach(error.origin_url, error.snapshot_ref, error.timestamp);
    }

    fn attach(
        &mut self,
        url: Option<String>,
        snapshot: Option<String>,
        seen_at: DateTime<Utc>,
    ) {
        if let Some(url) = url {
            self.urls
                .entry(UrlFingerprint::of(&url))
                .and_modify(|existing| existing.record(seen_at))
                .or_insert_with(|| UrlDraft::new(url, seen_at));
        }
        if let Some(reference) = snapshot {
            self.snapshots.push(SnapshotObservation {
                reference,
                captured_at: seen_at,
            });
        }
    }

    /// Observations of this error that carried a URL.
    pub fn url_observations(&self) -> u64 {
        self.urls.values().map(|u| u.count).sum()
    }
}

/// Groups parsed errors by fingerprint. Pure and order-sensitive.
#[derive(Debug, Default)]
pub struct Aggregator {
    drafts: Drafts,
    observations: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, error: ParsedError) {
        self.observations += 1;
        let fingerprint = ErrorFingerprint::for_error(&error);
        match self.drafts.get_mut(&fingerprint) {
            Some(draft) => draft.record(error),
            None => {
                let draft = AggregateDraft::new(fingerprint.clone(), error);
                self.drafts.insert(fingerprint, draft);
            }
        }
    }

    /// Number of records folded in so far.
    pub fn observations(&self) -> usize {
        self.observations
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    pub fn drafts(&self) -> &Drafts {
        &self.drafts
    }

    pub fn into_drafts(self) -> Drafts {
        self.drafts
    }
}

impl Extend<ParsedError> for Aggregator {
    fn extend<T: IntoIterator<Item = ParsedError>>(&mut self, iter: T) {
        for error in iter {
            self.observe(error);
        }
    }
}

/// Aggregate a whole stream at once.
pub fn aggregate<I: IntoIterator<Item = ParsedError>>(errors: I) -> Drafts {
    let mut aggregator = Aggregator::new();
    aggregator.extend(errors);
    aggregator.into_drafts()
}
