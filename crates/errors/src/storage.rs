//! Cache and module-file failures

use std::borrow::Cow;
use std::io;
use std::path::Path;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Bytes did not hash to the digest the manifest promised.
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("corrupted cache data: {message}")]
    CorruptedData { message: String },

    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    #[error("no space left writing {path}")]
    DiskFull { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("not found: {path}")]
    PathNotFound { path: String },

    #[error("IO error: {message}")]
    IoError { message: String },
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
        }
    }
}

impl StorageError {
    /// Classify an `io::Error` hit while touching `path`.
    #[must_use]
    pub fn from_io_with_path(err: &io::Error, path: &Path) -> Self {
        let path_string = || path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::PathNotFound { path: path_string() },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path: path_string() },
            io::ErrorKind::StorageFull => Self::DiskFull { path: path_string() },
            _ => Self::IoError {
                message: format!("{}: {err}", path.display()),
            },
        }
    }
}

impl UserFacingError for StorageError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        Some(match self {
            Self::HashMismatch { .. } => {
                "The server returned content that does not match the signed manifest."
            }
            Self::CorruptedData { .. } => "Delete the cache directory; it is rebuilt on next load.",
            Self::DiskFull { .. } => "Free up disk space in the cache directory and retry.",
            Self::PermissionDenied { .. } => "Make the cache directory writable by the current user.",
            _ => return None,
        })
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::DiskFull { .. } | Self::IoError { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        Some(match self {
            Self::HashMismatch { .. } => "storage.hash_mismatch",
            Self::CorruptedData { .. } => "storage.corrupted_data",
            Self::InvalidPath { .. } => "storage.invalid_path",
            Self::DiskFull { .. } => "storage.disk_full",
            Self::PermissionDenied { .. } => "storage.permission_denied",
            Self::PathNotFound { .. } => "storage.path_not_found",
            Self::IoError { .. } => "storage.io_error",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_variants() {
        let path = Path::new("/cache/abc");
        let err = StorageError::from_io_with_path(&io::Error::from(io::ErrorKind::NotFound), path);
        assert!(matches!(err, StorageError::PathNotFound { ref path } if path == "/cache/abc"));

        let err = StorageError::from_io_with_path(&io::Error::other("boom"), path);
        assert!(matches!(err, StorageError::IoError { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.user_hint(), None);
    }
}
