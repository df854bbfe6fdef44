use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures that end an ingestion pass or a query.
///
/// Parse failures and lock contention are not errors here: the former are absorbed by the
/// continuation merger, the latter is reported as `Ok(None)` by the rotator.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to rotate {path}: {source}")]
    Rotation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("storage error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("snapshot '{0}' does not exist")]
    SnapshotNotFound(String),

    #[error("invalid snapshot reference '{0}'")]
    InvalidSnapshotRef(String),

    #[error("no recorded error matches '{0}'")]
    ErrorNotFound(String),
}

impl DigestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DigestError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the user-facing "does not exist" outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DigestError::SnapshotNotFound(_) | DigestError::ErrorNotFound(_)
        )
    }

    /// True for rotation, filesystem and storage failures whose detail stays out of user output.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            DigestError::Rotation { .. } | DigestError::Io { .. } | DigestError::Persistence(_)
        )
    }
}

pub type Result<T, E = DigestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(DigestError::SnapshotNotFound("x".into()).is_not_found());
        assert!(DigestError::ErrorNotFound("7".into()).is_not_found());
        assert!(!DigestError::InvalidSnapshotRef("../x".into()).is_not_found());
        let rotation = DigestError::Rotation {
            path: PathBuf::from("/tmp/error.log"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!rotation.is_not_found());
        assert!(rotation.is_internal());
        assert!(DigestError::Persistence(rusqlite::Error::InvalidQuery).is_internal());
        assert!(!DigestError::ErrorNotFound("7".into()).is_internal());
        assert!(!DigestError::InvalidSnapshotRef("../x".into()).is_internal());
        assert!(rotation.to_string().contains("/tmp/error.log"));
    }
}
