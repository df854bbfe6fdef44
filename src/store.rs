use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, Type, Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use tracing::debug;

use crate::aggregate::{AggregateDraft, Drafts, ErrorFingerprint};
use crate::config::DEFAULT_URL_BATCH_SIZE;
use crate::error::{DigestError, Result};

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Ids per `IN (...)` list when loading snapshot links.
const ID_CHUNK: usize = 500;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS errors (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint      TEXT    NOT NULL UNIQUE,
    status           TEXT    NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'resolved')),
    source_file      TEXT    NOT NULL,
    source_line      INTEGER NOT NULL CHECK (source_line > 0),
    message          TEXT    NOT NULL,
    severity         TEXT    NOT NULL,
    occurrence_count INTEGER NOT NULL CHECK (occurrence_count >= 1),
    last_seen_ms     INTEGER NOT NULL,
    issue_ref        TEXT,
    comments         TEXT    NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS errors_last_seen ON errors (last_seen_ms);

CREATE TABLE IF NOT EXISTS error_urls (
    error_id         INTEGER NOT NULL REFERENCES errors (id),
    fingerprint      TEXT    NOT NULL,
    url              TEXT    NOT NULL,
    occurrence_count INTEGER NOT NULL CHECK (occurrence_count >= 1),
    last_seen_ms     INTEGER NOT NULL,
    PRIMARY KEY (error_id, fingerprint)
);

CREATE TABLE IF NOT EXISTS error_snapshots (
    error_id     INTEGER NOT NULL REFERENCES errors (id),
    snapshot_ref TEXT    NOT NULL,
    captured_ms  INTEGER NOT NULL,
    PRIMARY KEY (error_id, snapshot_ref)
);
";

const ERROR_COLUMNS: &str = "id, fingerprint, status, source_file, source_line, message, severity, \
     occurrence_count, last_seen_ms, issue_ref, comments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStatus {
    Active,
    Resolved,
}

impl ErrorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorStatus::Active => "active",
            ErrorStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromSql for ErrorStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "active" => Ok(ErrorStatus::Active),
            "resolved" => Ok(ErrorStatus::Resolved),
            other => Err(FromSqlError::Other(
                format!("unknown error status '{}'", other).into(),
            )),
        }
    }
}

impl FromSql for ErrorFingerprint {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        ErrorFingerprint::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("malformed fingerprint '{}'", raw).into()))
    }
}

/// Addresses one stored error, by its numeric id or its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKey {
    Id(i64),
    Fingerprint(ErrorFingerprint),
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKey::Id(id) => write!(f, "{}", id),
            ErrorKey::Fingerprint(fp) => write!(f, "{}", fp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is neither an error id nor a fingerprint")]
pub struct ParseKeyError(String);

impl FromStr for ErrorKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(fp) = ErrorFingerprint::parse(s) {
            return Ok(ErrorKey::Fingerprint(fp));
        }
        match s.parse::<i64>() {
            Ok(id) if id > 0 => Ok(ErrorKey::Id(id)),
            _ => Err(ParseKeyError(s.to_string())),
        }
    }
}

impl From<ErrorFingerprint> for ErrorKey {
    fn from(fp: ErrorFingerprint) -> Self {
        ErrorKey::Fingerprint(fp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotLink {
    pub snapshot_ref: String,
    pub captured_at: DateTime<Utc>,
}

/// Durable aggregate of every observation of one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateError {
    pub id: i64,
    pub fingerprint: ErrorFingerprint,
    pub status: ErrorStatus,
    pub source_file: String,
    pub source_line: u32,
    pub message: String,
    pub severity: String,
    pub occurrence_count: u64,
    pub last_seen_at: DateTime<Utc>,
    pub linked_issue_ref: Option<String>,
    pub comments: String,
    /// Newest capture first.
    pub snapshots: Vec<SnapshotLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateUrl {
    pub error_id: i64,
    pub url_fingerprint: String,
    pub url: String,
    pub occurrence_count: u64,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorOrder {
    #[default]
    Count,
    LastSeen,
}

/// Filter and ordering for [`ErrorStore::list_errors`]. Bounds apply to `last_seen_at`
/// and are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub only_active: bool,
    pub order: ErrorOrder,
}

impl Default for ErrorQuery {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            only_active: true,
            order: ErrorOrder::Count,
        }
    }
}

/// What one `commit` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub errors_inserted: usize,
    pub errors_updated: usize,
    pub urls_upserted: usize,
    pub url_batches: usize,
    pub snapshot_links_added: usize,
}

/// Group errors by severity, keeping the incoming order within and across groups.
pub fn group_by_severity(errors: &[AggregateError]) -> IndexMap<&str, Vec<&AggregateError>> {
    let mut groups: IndexMap<&str, Vec<&AggregateError>> = IndexMap::new();
    for error in errors {
        groups.entry(error.severity.as_str()).or_default().push(error);
    }
    groups
}

/// SQLite-backed aggregate store.
pub struct ErrorStore {
    conn: Connection,
    url_batch_size: usize,
}

impl ErrorStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            debug!(version = SCHEMA_VERSION, "initialised aggregate store schema");
        }

        Ok(Self {
            conn,
            url_batch_size: DEFAULT_URL_BATCH_SIZE,
        })
    }

    /// Rows per multi-row URL upsert statement. Zero is treated as one.
    pub fn with_url_batch_size(mut self, size: usize) -> Self {
        self.url_batch_size = size.max(1);
        self
    }

    /// Merge drafts into the store.
    ///
    /// Each draft commits in its own transaction, so a failure leaves earlier drafts of the
    /// same pass committed and the failing draft untouched.
    pub fn commit(&mut self, drafts: &Drafts) -> Result<CommitReport> {
        let mut report = CommitReport::default();
        for draft in drafts.values() {
            let tx = self.conn.transaction()?;
            upsert_draft(&tx, draft, self.url_batch_size, &mut report)?;
            tx.commit()?;
        }
        debug!(
            inserted = report.errors_inserted,
            updated = report.errors_updated,
            urls = report.urls_upserted,
            url_batches = report.url_batches,
            snapshots = report.snapshot_links_added,
            "committed drafts"
        );
        Ok(report)
    }

    pub fn list_errors(&self, query: &ErrorQuery) -> Result<Vec<AggregateError>> {
        let mut sql = format!("SELECT {} FROM errors", ERROR_COLUMNS);
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if query.only_active {
            clauses.push("status = 'active'");
        }
        if let Some(since) = query.since {
            clauses.push("last_seen_ms >= ?");
            values.push(Value::Integer(since.timestamp_millis()));
        }
        if let Some(until) = query.until {
            clauses.push("last_seen_ms <= ?");
            values.push(Value::Integer(until.timestamp_millis()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(match query.order {
            ErrorOrder::Count => " ORDER BY occurrence_count DESC, last_seen_ms DESC, id",
            ErrorOrder::LastSeen => " ORDER BY last_seen_ms DESC, occurrence_count DESC, id",
        });

        let mut stmt = self.conn.prepare(&sql)?;
        let mut errors = stmt
            .query_map(params_from_iter(values), error_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        self.load_snapshots(&mut errors)?;
        Ok(errors)
    }

    pub fn get_error(&self, key: &ErrorKey) -> Result<AggregateError> {
        let id = self.resolve_id(key)?;
        let sql = format!("SELECT {} FROM errors WHERE id = ?1", ERROR_COLUMNS);
        let error = self.conn.query_row(&sql, [id], error_from_row)?;
        let mut errors = vec![error];
        self.load_snapshots(&mut errors)?;
        Ok(errors.remove(0))
    }

    /// URLs of one error, most frequent first.
    pub fn list_urls(&self, key: &ErrorKey, limit: Option<usize>) -> Result<Vec<AggregateUrl>> {
        let id = self.resolve_id(key)?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            "SELECT error_id, fingerprint, url, occurrence_count, last_seen_ms
             FROM error_urls
             WHERE error_id = ?1
             ORDER BY occurrence_count DESC, last_seen_ms DESC, url
             LIMIT ?2",
        )?;
        let urls = stmt
            .query_map(params![id, limit], |row| {
                Ok(AggregateUrl {
                    error_id: row.get(0)?,
                    url_fingerprint: row.get(1)?,
                    url: row.get(2)?,
                    occurrence_count: row.get(3)?,
                    last_seen_at: millis_column(row, 4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(urls)
    }

    pub fn mark_resolved(&self, key: &ErrorKey) -> Result<()> {
        self.set_status(key, ErrorStatus::Resolved)
    }

    pub fn mark_reopened(&self, key: &ErrorKey) -> Result<()> {
        self.set_status(key, ErrorStatus::Active)
    }

    fn set_status(&self, key: &ErrorKey, status: ErrorStatus) -> Result<()> {
        let id = self.resolve_id(key)?;
        self.conn.execute(
            "UPDATE errors SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        debug!(id, status = %status, "updated error status");
        Ok(())
    }

    /// Append one already formatted line to the error's comment log.
    pub fn append_comment(&self, key: &ErrorKey, line: &str) -> Result<()> {
        let id = self.resolve_id(key)?;
        self.conn.execute(
            "UPDATE errors
             SET comments = CASE WHEN comments = '' THEN ?1 ELSE comments || char(10) || ?1 END
             WHERE id = ?2",
            params![line, id],
        )?;
        Ok(())
    }

    /// Set or clear the linked issue reference.
    pub fn link_issue(&self, key: &ErrorKey, issue_ref: Option<&str>) -> Result<()> {
        let id = self.resolve_id(key)?;
        self.conn.execute(
            "UPDATE errors SET issue_ref = ?1 WHERE id = ?2",
            params![issue_ref, id],
        )?;
        Ok(())
    }

    fn resolve_id(&self, key: &ErrorKey) -> Result<i64> {
        let found = match key {
            ErrorKey::Id(id) => self
                .conn
                .query_row("SELECT id FROM errors WHERE id = ?1", [id], |row| row.get(0))
                .optional()?,
            ErrorKey::Fingerprint(fp) => self
                .conn
                .query_row(
                    "SELECT id FROM errors WHERE fingerprint = ?1",
                    [fp.as_str()],
                    |row| row.get(0),
                )
                .optional()?,
        };
        found.ok_or_else(|| DigestError::ErrorNotFound(key.to_string()))
    }

    fn load_snapshots(&self, errors: &mut [AggregateError]) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        let mut by_id: IndexMap<i64, Vec<SnapshotLink>> = IndexMap::new();
        let ids: Vec<i64> = errors.iter().map(|e| e.id).collect();

        for chunk in ids.chunks(ID_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT error_id, snapshot_ref, captured_ms FROM error_snapshots
                 WHERE error_id IN ({})
                 ORDER BY captured_ms DESC, snapshot_ref",
                placeholders
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    SnapshotLink {
                        snapshot_ref: row.get(1)?,
                        captured_at: millis_column(row, 2)?,
                    },
                ))
            })?;
            for row in rows {
                let (error_id, link) = row?;
                by_id.entry(error_id).or_default().push(link);
            }
        }

        for error in errors.iter_mut() {
            if let Some(links) = by_id.swap_remove(&error.id) {
                error.snapshots = links;
            }
        }
        Ok(())
    }
}

fn upsert_draft(
    tx: &Transaction<'_>,
    draft: &AggregateDraft,
    url_batch_size: usize,
    report: &mut CommitReport,
) -> Result<()> {
    let (error_id, stored_count): (i64, u64) = tx.query_row(
        "INSERT INTO errors
             (fingerprint, source_file, source_line, message, severity, occurrence_count, last_seen_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(fingerprint) DO UPDATE SET
             occurrence_count = occurrence_count + excluded.occurrence_count,
             last_seen_ms = excluded.last_seen_ms
         RETURNING id, occurrence_count",
        params![
            draft.fingerprint.as_str(),
            draft.source_file,
            draft.source_line,
            draft.message,
            draft.severity,
            draft.count,
            draft.last_seen.timestamp_millis(),
        ],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    if stored_count == draft.count {
        report.errors_inserted += 1;
    } else {
        report.errors_updated += 1;
    }

    let urls: Vec<_> = draft.urls.iter().collect();
    for batch in urls.chunks(url_batch_size) {
        let rows = vec!["(?, ?, ?, ?, ?)"; batch.len()].join(", ");
        let sql = format!(
            "INSERT INTO error_urls (error_id, fingerprint, url, occurrence_count, last_seen_ms)
             VALUES {}
             ON CONFLICT(error_id, fingerprint) DO UPDATE SET
                 occurrence_count = occurrence_count + excluded.occurrence_count,
                 last_seen_ms = excluded.last_seen_ms",
            rows
        );
        let mut values: Vec<Value> = Vec::with_capacity(batch.len() * 5);
        for (fingerprint, url) in batch {
            values.push(Value::Integer(error_id));
            values.push(Value::Text(fingerprint.as_str().to_string()));
            values.push(Value::Text(url.url.clone()));
            values.push(Value::Integer(url.count as i64));
            values.push(Value::Integer(url.last_seen.timestamp_millis()));
        }
        tx.execute(&sql, params_from_iter(values))?;
        report.urls_upserted += batch.len();
        report.url_batches += 1;
    }

    let mut link = tx.prepare_cached(
        "INSERT INTO error_snapshots (error_id, snapshot_ref, captured_ms)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(error_id, snapshot_ref) DO NOTHING",
    )?;
    for snapshot in &draft.snapshots {
        report.snapshot_links_added += link.execute(params![
            error_id,
            snapshot.reference,
            snapshot.captured_at.timestamp_millis(),
        ])?;
    }
    Ok(())
}

fn millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(FromSqlError::OutOfRange(ms)),
        )
    })
}

fn error_from_row(row: &Row<'_>) -> rusqlite::Result<AggregateError> {
    Ok(AggregateError {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        status: row.get(2)?,
        source_file: row.get(3)?,
        source_line: row.get(4)?,
        message: row.get(5)?,
        severity: row.get(6)?,
        occurrence_count: row.get(7)?,
        last_seen_at: millis_column(row, 8)?,
        linked_issue_ref: row.get(9)?,
        comments: row.get(10)?,
        snapshots: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::parsers::ParsedError;
    use chrono::TimeZone;

    fn at(day: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 10, minute, 0).unwrap()
    }

    fn error(message: &str, when: DateTime<Utc>) -> ParsedError {
        ParsedError {
            timestamp: when,
            severity: "Error".to_string(),
            message: message.to_string(),
            source_file: "/a.php".to_string(),
            source_line: 5,
            origin_url: None,
            snapshot_ref: None,
        }
    }

    fn with_url(mut e: ParsedError, url: &str) -> ParsedError {
        e.origin_url = Some(url.to_string());
        e
    }

    fn with_snapshot(mut e: ParsedError, reference: &str) -> ParsedError {
        e.snapshot_ref = Some(reference.to_string());
        e
    }

    fn all(store: &ErrorStore) -> Vec<AggregateError> {
        store
            .list_errors(&ErrorQuery {
                only_active: false,
                ..ErrorQuery::default()
            })
            .unwrap()
    }

    #[test]
    fn test_counts_accumulate_across_commits() {
        let mut store = ErrorStore::open_in_memory().unwrap();
        let report = store.commit(&aggregate(vec![error("X", at(1, 0))])).unwrap();
        assert_eq!(report.errors_inserted, 1);

        let first = all(&store);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].occurrence_count, 1);
        assert_eq!(first[0].status, ErrorStatus::Active);

        let report = store
            .commit(&aggregate(vec![error("X", at(2, 0)), error("X", at(2, 5))]))
            .unwrap();
        assert_eq!(report.errors_updated, 1);

        let second = all(&store);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].occurrence_count, 3);
        assert_eq!(second[0].last_seen_at, at(2, 5));
    }

    #[test]
    fn test_url_batches_persist_every_row() {
        let mut store = ErrorStore::open_in_memory().unwrap().with_url_batch_size(50);
        let errors: Vec<_> = (0..120)
            .map(|i| with_url(error("X", at(1, 0)), &format!("http://example.com/{}", i)))
            .collect();
        let report = store.commit(&aggregate(errors)).unwrap();
        assert_eq!(report.urls_upserted, 120);
        assert_eq!(report.url_batches, 3);

        let key = ErrorKey::Id(all(&store)[0].id);
        assert_eq!(store.list_urls(&key, None).unwrap().len(), 120);
        assert_eq!(store.list_urls(&key, Some(10)).unwrap().len(), 10);
    }

    #[test]
    fn test_url_counts_accumulate() {
        let mut store = ErrorStore::open_in_memory().unwrap();
        store
            .commit(&aggregate(vec![
                with_url(error("X", at(1, 0)), "/a"),
                with_url(error("X", at(1, 1)), "/b"),
                with_url(error("X", at(1, 2)), "/a"),
                error("X", at(1, 3)),
            ]))
            .unwrap();
        store
            .commit(&aggregate(vec![with_url(error("X", at(2, 0)), "/b")]))
            .unwrap();
        store
            .commit(&aggregate(vec![with_url(error("X", at(3, 0)), "/b")]))
            .unwrap();

        let errors = all(&store);
        assert_eq!(errors[0].occurrence_count, 6);
        let urls = store.list_urls(&ErrorKey::Id(errors[0].id), None).unwrap();
        let summary: Vec<_> = urls
            .iter()
            .map(|u| (u.url.as_str(), u.occurrence_count))
            .collect();
        assert_eq!(summary, vec![("/b", 3), ("/a", 2)]);
        assert_eq!(urls[0].last_seen_at, at(3, 0));
    }

    #[test]
    fn test_snapshot_links_are_deduplicated() {
        let mut store = ErrorStore::open_in_memory().unwrap();
        let drafts = aggregate(vec![
            with_snapshot(error("X", at(1, 0)), "one.html"),
            with_snapshot(error("X", at(1, 1)), "one.html"),
            with_snapshot(error("X", at(1, 2)), "two.html"),
        ]);
        let report = store.commit(&drafts).unwrap();
        assert_eq!(report.snapshot_links_added, 2);
        let again = store.commit(&drafts).unwrap();
        assert_eq!(again.snapshot_links_added, 0);

        let errors = all(&store);
        let refs: Vec<_> = errors[0]
            .snapshots
            .iter()
            .map(|s| s.snapshot_ref.as_str())
            .collect();
        assert_eq!(refs, vec!["two.html", "one.html"]);
    }

    #[test]
    fn test_status_transitions_keep_counters() {
        let mut store = ErrorStore::open_in_memory().unwrap();
        store
            .commit(&aggregate(vec![error("X", at(1, 0)), error("Y", at(1, 1))]))
            .unwrap();
        let fp = ErrorFingerprint::of("Error", "X", "/a.php", 5);
        let key = ErrorKey::Fingerprint(fp);
        let before = store.get_error(&key).unwrap();

        store.mark_resolved(&key).unwrap();
        assert_eq!(store.get_error(&key).unwrap().status, ErrorStatus::Resolved);
        assert_eq!(store.list_errors(&ErrorQuery::default()).unwrap().len(), 1);

        store.mark_reopened(&key).unwrap();
        let after = store.get_error(&key).unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn test_ingestion_does_not_touch_status() {
        let mut store = ErrorStore::open_in_memory().unwrap();
        store.commit(&aggregate(vec![error("X", at(1, 0))])).unwrap();
        let key = ErrorKey::Id(1);
        store.mark_resolved(&key).unwrap();
        store.commit(&aggregate(vec![error("X", at(2, 0))])).unwrap();
        let stored = store.get_error(&key).unwrap();
        assert_eq!(stored.status, ErrorStatus::Resolved);
        assert_eq!(stored.occurrence_count, 2);
    }

    #[test]
    fn test_unknown_keys_are_not_found() {
        let store = ErrorStore::open_in_memory().unwrap();
        let key = ErrorKey::Id(42);
        assert!(matches!(
            store.mark_resolved(&key),
            Err(DigestError::ErrorNotFound(_))
        ));
        assert!(store.get_error(&key).unwrap_err().is_not_found());
        assert!(store.list_urls(&key, None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_ordering_and_date_filters() {
        let mut store = ErrorStore::open_in_memory().unwrap();
        store
            .commit(&aggregate(vec![
                error("rare", at(5, 0)),
                error("common", at(1, 0)),
                error("common", at(2, 0)),
                error("old", at(1, 0)),
            ]))
            .unwrap();

        let messages = |query: ErrorQuery| -> Vec<String> {
            store
                .list_errors(&query)
                .unwrap()
                .into_iter()
                .map(|e| e.message)
                .collect()
        };

        assert_eq!(
            messages(ErrorQuery::default()),
            vec!["common", "rare", "old"]
        );
        assert_eq!(
            messages(ErrorQuery {
                order: ErrorOrder::LastSeen,
                ..ErrorQuery::default()
            }),
            vec!["rare", "common", "old"]
        );
        assert_eq!(
            messages(ErrorQuery {
                since: Some(at(2, 0)),
                ..ErrorQuery::default()
            }),
            vec!["common", "rare"]
        );
        assert_eq!(
            messages(ErrorQuery {
                until: Some(at(1, 59)),
                ..ErrorQuery::default()
            }),
            vec!["old"]
        );
    }

    #[test]
    fn test_comments_and_issue_links() {
        let mut store = ErrorStore::open_in_memory().unwrap();
        store.commit(&aggregate(vec![error("X", at(1, 0))])).unwrap();
        let key = ErrorKey::Id(1);

        store.append_comment(&key, "first").unwrap();
        store.append_comment(&key, "second").unwrap();
        store.link_issue(&key, Some("BUG-7")).unwrap();
        let stored = store.get_error(&key).unwrap();
        assert_eq!(stored.comments, "first\nsecond");
        assert_eq!(stored.linked_issue_ref.as_deref(), Some("BUG-7"));

        store.link_issue(&key, None).unwrap();
        store.commit(&aggregate(vec![error("X", at(2, 0))])).unwrap();
        let stored = store.get_error(&key).unwrap();
        assert_eq!(stored.linked_issue_ref, None);
        assert_eq!(stored.comments, "first\nsecond");
    }

    #[test]
    fn test_error_key_parsing() {
        let fp = ErrorFingerprint::of("Error", "X", "/a.php", 5);
        assert_eq!("17".parse::<ErrorKey>().unwrap(), ErrorKey::Id(17));
        assert_eq!(
            fp.as_str().parse::<ErrorKey>().unwrap(),
            ErrorKey::Fingerprint(fp)
        );
        assert!("0".parse::<ErrorKey>().is_err());
        assert!("abc".parse::<ErrorKey>().is_err());
    }

    #[test]
    fn test_group_by_severity_keeps_order() {
        let mut store = ErrorStore::open_in_memory().unwrap();
        let mut warning = error("W", at(1, 0));
        warning.severity = "Warning".to_string();
        store
            .commit(&aggregate(vec![
                error("A", at(1, 0)),
                error("A", at(1, 1)),
                warning,
                error("B", at(1, 2)),
            ]))
            .unwrap();
        let errors = all(&store);
        let groups = group_by_severity(&errors);
        let keys: Vec<_> = groups.keys().copied().collect();
        assert_eq!(keys, vec!["Error", "Warning"]);
        assert_eq!(groups["Error"].len(), 2);
    }

    #[test]
    fn test_reopen_existing_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.sqlite3");
        {
            let mut store = ErrorStore::open(&path).unwrap();
            store.commit(&aggregate(vec![error("X", at(1, 0))])).unwrap();
        }
        let store = ErrorStore::open(&path).unwrap();
        assert_eq!(all(&store).len(), 1);
    }
}
