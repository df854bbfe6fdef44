use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, info, warn};

use crate::config::DigestConfig;
use crate::error::{DigestError, Result};

const SNAPSHOT_SUFFIX_LEN: usize = 8;
const SNAPSHOT_NAME_ATTEMPTS: usize = 16;

/// Something that can hand out an exclusive lease without waiting.
///
/// `Ok(None)` means the lease is held elsewhere.
pub trait LeaseProvider {
    type Lease;

    fn try_acquire(&self) -> Result<Option<Self::Lease>>;
}

/// `flock(2)` on a well-known file. Works across processes and across separate opens
/// within one process.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Held lock; released when dropped.
pub struct FileLease {
    _lock: Flock<File>,
}

impl std::fmt::Debug for FileLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FileLease")
    }
}

impl LeaseProvider for FileLock {
    type Lease = FileLease;

    fn try_acquire(&self) -> Result<Option<FileLease>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|e| DigestError::io(&self.path, e))?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(FileLease { _lock: lock })),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(DigestError::io(&self.path, io::Error::from(errno))),
        }
    }
}

/// A private copy of log data owned by one ingestion pass. The file is removed on drop.
#[derive(Debug)]
pub struct SnapshotHandle {
    path: PathBuf,
    recovered: bool,
}

impl SnapshotHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the snapshot was left behind by an earlier, interrupted pass.
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub fn open(&self) -> Result<File> {
        File::open(&self.path).map_err(|e| DigestError::io(&self.path, e))
    }
}

impl Drop for SnapshotHandle {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed log snapshot"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove log snapshot"),
        }
    }
}

/// Everything one ingestion pass owns.
///
/// Fields drop in declaration order, so snapshots are deleted before the lease is released.
#[derive(Debug)]
pub struct IngestionPass<L> {
    snapshots: Vec<SnapshotHandle>,
    _lease: L,
}

impl<L> IngestionPass<L> {
    /// Recovered snapshots first (oldest first), then the freshly rotated one.
    pub fn snapshots(&self) -> &[SnapshotHandle] {
        &self.snapshots
    }

    pub fn recovered(&self) -> usize {
        self.snapshots.iter().filter(|s| s.recovered).count()
    }
}

/// Hands the active log off to private snapshots under an exclusive lease.
#[derive(Debug)]
pub struct LogRotator<L = FileLock> {
    log_dir: PathBuf,
    log_file: String,
    lock: L,
    recover_orphans: bool,
}

impl LogRotator<FileLock> {
    pub fn from_config(config: &DigestConfig) -> Self {
        Self::with_lock(
            &config.log_dir,
            &config.log_file,
            FileLock::new(config.lock_path()),
        )
        .recover_orphans(config.recover_orphans)
    }
}

impl<L: LeaseProvider> LogRotator<L> {
    pub fn with_lock(log_dir: impl Into<PathBuf>, log_file: impl Into<String>, lock: L) -> Self {
        Self {
            log_dir: log_dir.into(),
            log_file: log_file.into(),
            lock,
            recover_orphans: true,
        }
    }

    pub fn recover_orphans(mut self, enabled: bool) -> Self {
        self.recover_orphans = enabled;
        self
    }

    pub fn active_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }

    /// Cheap check for work, without taking the lease.
    pub fn has_pending_work(&self) -> bool {
        if self.active_log_path().exists() {
            return true;
        }
        self.recover_orphans
            && self
                .find_orphans()
                .map(|orphans| !orphans.is_empty())
                .unwrap_or(false)
    }

    /// Try to start a pass.
    ///
    /// Returns `Ok(None)` when the lease is held elsewhere or there is nothing to process.
    /// A rename failure other than a missing active log aborts the pass, leaves the active log
    /// in place and releases the lease.
    pub fn begin_ingestion_pass(&self) -> Result<Option<IngestionPass<L::Lease>>> {
        let Some(lease) = self.lock.try_acquire()? else {
            info!("another ingestion pass holds the lock, skipping");
            return Ok(None);
        };

        // Listed before the rename so the fresh snapshot is never mistaken for an orphan.
        let orphans = if self.recover_orphans {
            self.find_orphans()?
        } else {
            Vec::new()
        };

        let fresh = self.rotate_active_log()?;

        let mut snapshots: Vec<SnapshotHandle> = orphans
            .into_iter()
            .map(|path| {
                warn!(path = %path.display(), "recovering snapshot left by an interrupted pass");
                SnapshotHandle {
                    path,
                    recovered: true,
                }
            })
            .collect();
        if let Some(path) = fresh {
            snapshots.push(SnapshotHandle {
                path,
                recovered: false,
            });
        }

        if snapshots.is_empty() {
            debug!(path = %self.active_log_path().display(), "no log data to ingest");
            return Ok(None);
        }

        Ok(Some(IngestionPass {
            snapshots,
            _lease: lease,
        }))
    }

    fn rotate_active_log(&self) -> Result<Option<PathBuf>> {
        let active = self.active_log_path();
        let target = self.unused_snapshot_path()?;
        match fs::rename(&active, &target) {
            Ok(()) => {
                debug!(from = %active.display(), to = %target.display(), "rotated active log");
                Ok(Some(target))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(DigestError::Rotation {
                path: active,
                source,
            }),
        }
    }

    fn unused_snapshot_path(&self) -> Result<PathBuf> {
        for _ in 0..SNAPSHOT_NAME_ATTEMPTS {
            let suffix: String = (0..SNAPSHOT_SUFFIX_LEN)
                .map(|_| fastrand::lowercase())
                .collect();
            let candidate = self.log_dir.join(snapshot_file_name(&self.log_file, &suffix));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(DigestError::Rotation {
            path: self.active_log_path(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "could not pick an unused snapshot name",
            ),
        })
    }

    /// Snapshot files in `log_dir`, oldest modification first.
    fn find_orphans(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DigestError::io(&self.log_dir, e)),
        };

        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DigestError::io(&self.log_dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_snapshot_name(&self.log_file, name) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, entry.path()));
        }
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }
}

fn split_log_name(log_file: &str) -> (&str, Option<&str>) {
    match log_file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (log_file, None),
    }
}

/// `error.log` + `abcdefgh` -> `error-abcdefgh.log.tmp`
fn snapshot_file_name(log_file: &str, suffix: &str) -> String {
    match split_log_name(log_file) {
        (stem, Some(ext)) => format!("{}-{}.{}.tmp", stem, suffix, ext),
        (stem, None) => format!("{}-{}.tmp", stem, suffix),
    }
}

fn is_snapshot_name(log_file: &str, name: &str) -> bool {
    let (stem, ext) = split_log_name(log_file);
    let tail = match ext {
        Some(ext) => format!(".{}.tmp", ext),
        None => ".tmp".to_string(),
    };
    let Some(rest) = name.strip_prefix(stem).and_then(|r| r.strip_prefix('-')) else {
        return false;
    };
    let Some(suffix) = rest.strip_suffix(tail.as_str()) else {
        return false;
    };
    suffix.len() == SNAPSHOT_SUFFIX_LEN && suffix.bytes().all(|b| b.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn rotator(dir: &TempDir) -> LogRotator {
        LogRotator::with_lock(
            dir.path(),
            "error.log",
            FileLock::new(dir.path().join("lock-errdigest")),
        )
    }

    #[test]
    fn test_snapshot_names() {
        assert_eq!(snapshot_file_name("error.log", "abcdefgh"), "error-abcdefgh.log.tmp");
        assert_eq!(snapshot_file_name("errors", "abcdefgh"), "errors-abcdefgh.tmp");
        assert!(is_snapshot_name("error.log", "error-abcdefgh.log.tmp"));
        assert!(!is_snapshot_name("error.log", "error-abc.log.tmp"));
        assert!(!is_snapshot_name("error.log", "error-ABCDEFGH.log.tmp"));
        assert!(!is_snapshot_name("error.log", "error.log"));
        assert!(!is_snapshot_name("error.log", "access-abcdefgh.log.tmp"));
        assert!(is_snapshot_name("errors", "errors-qwertyui.tmp"));
    }

    #[test]
    fn test_missing_log_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert!(rotator(&dir).begin_ingestion_pass().unwrap().is_none());
        assert!(!rotator(&dir).has_pending_work());
    }

    #[test]
    fn test_rotation_moves_log_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("error.log");
        fs::write(&active, "line\n").unwrap();

        let rotator = rotator(&dir);
        assert!(rotator.has_pending_work());
        let pass = rotator.begin_ingestion_pass().unwrap().unwrap();
        assert!(!active.exists());
        assert_eq!(pass.snapshots().len(), 1);

        let snapshot = pass.snapshots()[0].path().to_path_buf();
        assert!(!pass.snapshots()[0].is_recovered());
        assert_eq!(fs::read_to_string(&snapshot).unwrap(), "line\n");

        drop(pass);
        assert!(!snapshot.exists());
        // Lease released: a new pass can start once there is data again.
        fs::write(&active, "again\n").unwrap();
        assert!(rotator.begin_ingestion_pass().unwrap().is_some());
    }

    #[test]
    fn test_held_lock_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("error.log"), "line\n").unwrap();

        let lock = FileLock::new(dir.path().join("lock-errdigest"));
        let held = lock.try_acquire().unwrap();
        assert!(held.is_some());
        assert!(lock.try_acquire().unwrap().is_none());

        assert!(rotator(&dir).begin_ingestion_pass().unwrap().is_none());
        assert!(dir.path().join("error.log").exists());

        drop(held);
        assert!(rotator(&dir).begin_ingestion_pass().unwrap().is_some());
    }

    #[test]
    fn test_concurrent_passes_are_exclusive() {
        let dir = Arc::new(tempfile::tempdir().unwrap());
        fs::write(dir.path().join("error.log"), "line\n").unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let dir = Arc::clone(&dir);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let pass = rotator(&dir).begin_ingestion_pass().unwrap();
                    let started = pass.is_some();
                    // Hold any pass until both threads have tried.
                    barrier.wait();
                    drop(pass);
                    started
                })
            })
            .collect();

        let started = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|started| *started)
            .count();
        assert_eq!(started, 1);
    }

    #[test]
    fn test_orphans_are_recovered_before_fresh_log() {
        let dir = tempfile::tempdir().unwrap();
        let orphan = dir.path().join("error-zzzzzzzz.log.tmp");
        fs::write(&orphan, "old\n").unwrap();
        fs::write(dir.path().join("error.log"), "new\n").unwrap();
        fs::write(dir.path().join("unrelated.tmp"), "keep\n").unwrap();

        let pass = rotator(&dir).begin_ingestion_pass().unwrap().unwrap();
        assert_eq!(pass.snapshots().len(), 2);
        assert_eq!(pass.recovered(), 1);
        assert_eq!(pass.snapshots()[0].path(), orphan.as_path());
        assert!(pass.snapshots()[0].is_recovered());
        assert_eq!(
            fs::read_to_string(pass.snapshots()[1].path()).unwrap(),
            "new\n"
        );

        drop(pass);
        assert!(!orphan.exists());
        assert!(dir.path().join("unrelated.tmp").exists());
    }

    #[test]
    fn test_orphans_alone_start_a_pass() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("error-abcdefgh.log.tmp"), "old\n").unwrap();
        let rotator = rotator(&dir);
        assert!(rotator.has_pending_work());
        let pass = rotator.begin_ingestion_pass().unwrap().unwrap();
        assert_eq!(pass.recovered(), 1);
    }

    #[test]
    fn test_orphan_recovery_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let orphan = dir.path().join("error-abcdefgh.log.tmp");
        fs::write(&orphan, "old\n").unwrap();
        let rotator = rotator(&dir).recover_orphans(false);
        assert!(!rotator.has_pending_work());
        assert!(rotator.begin_ingestion_pass().unwrap().is_none());
        assert!(orphan.exists());
    }

    #[test]
    fn test_rename_failure_leaves_log_in_place() {
        // log_dir is a regular file, so rename fails with ENOTDIR rather than NotFound.
        let dir = tempfile::tempdir().unwrap();
        let lock_dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let rotator = LogRotator::with_lock(
            &blocker,
            "error.log",
            FileLock::new(lock_dir.path().join("lock")),
        )
        .recover_orphans(false);

        match rotator.begin_ingestion_pass() {
            Err(DigestError::Rotation { .. }) => {}
            other => panic!("expected rotation failure, got {:?}", other.map(|p| p.is_some())),
        }
        assert!(blocker.exists());
        // Lease was released.
        assert!(FileLock::new(lock_dir.path().join("lock"))
            .try_acquire()
            .unwrap()
            .is_some());
    }
}
