//! Error types for vfskit.

use std::io::{Error as IoError, ErrorKind};

use crate::path::VfsPath;

/// Result type alias using vfskit's [`FsError`].
pub type Result<T> = std::result::Result<T, FsError>;

/// Closed set of filesystem failure kinds.
///
/// Every variant carries the offending path; operations that involve two
/// paths (copy, move) report the destination as the offending path and the
/// source in `other`.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Path does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// The path that was not found.
        path: VfsPath,
    },

    /// Expected a file but found something else.
    #[error("not a file: {path}")]
    NotAFile {
        /// The path that is not a file.
        path: VfsPath,
    },

    /// Expected a directory but found something else.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// The path that is not a directory.
        path: VfsPath,
    },

    /// Entity kind the operation cannot handle (e.g. special files).
    #[error("unsupported entity: {path}")]
    UnsupportedEntity {
        /// The offending path.
        path: VfsPath,
    },

    /// Underlying storage I/O failure.
    #[error("io error at {path}: {source}")]
    Io {
        /// The path involved in the failed operation.
        path: VfsPath,
        /// The underlying I/O error.
        #[source]
        source: IoError,
    },

    /// Permission denied by the underlying storage.
    #[error("permission denied: {path}")]
    PermissionDenied {
        /// The path where permission was denied.
        path: VfsPath,
    },

    /// Path already exists when it must not.
    #[error("already exists: {path}")]
    AlreadyExists {
        /// The conflicting path.
        path: VfsPath,
        /// Source path for copy/move conflicts.
        other: Option<VfsPath>,
    },

    /// Directory delete without `recursive` on a non-empty directory.
    #[error("directory not empty: {path}")]
    NotEmptyDirectory {
        /// The non-empty directory.
        path: VfsPath,
    },

    /// Directory copy/move/delete without `recursive`.
    #[error("recursive not specified for directory: {path}")]
    RecursiveNotSpecified {
        /// The directory that requires `recursive`.
        path: VfsPath,
    },

    /// No writable backend can serve the operation.
    #[error("read-only filesystem: {path}")]
    ReadOnly {
        /// The path the write was aimed at.
        path: VfsPath,
    },

    /// The operation's context was canceled.
    #[error("operation canceled: {reason}")]
    ContextCanceled {
        /// Reason passed to `cancel`.
        reason: String,
    },
}

impl FsError {
    pub(crate) fn not_found(path: &VfsPath) -> Self {
        FsError::NotFound { path: path.clone() }
    }

    pub(crate) fn not_a_file(path: &VfsPath) -> Self {
        FsError::NotAFile { path: path.clone() }
    }

    pub(crate) fn not_a_directory(path: &VfsPath) -> Self {
        FsError::NotADirectory { path: path.clone() }
    }

    pub(crate) fn already_exists(path: &VfsPath) -> Self {
        FsError::AlreadyExists {
            path: path.clone(),
            other: None,
        }
    }

    pub(crate) fn already_exists_from(path: &VfsPath, src: &VfsPath) -> Self {
        FsError::AlreadyExists {
            path: path.clone(),
            other: Some(src.clone()),
        }
    }

    pub(crate) fn io(path: &VfsPath, source: IoError) -> Self {
        FsError::Io {
            path: path.clone(),
            source,
        }
    }

    /// Rewrite every path carried by this error.
    ///
    /// Adapters that translate between path spaces use this so failures
    /// always surface the path the caller asked about.
    pub(crate) fn map_paths(self, f: impl Fn(VfsPath) -> VfsPath) -> Self {
        match self {
            FsError::NotFound { path } => FsError::NotFound { path: f(path) },
            FsError::NotAFile { path } => FsError::NotAFile { path: f(path) },
            FsError::NotADirectory { path } => FsError::NotADirectory { path: f(path) },
            FsError::UnsupportedEntity { path } => FsError::UnsupportedEntity { path: f(path) },
            FsError::Io { path, source } => FsError::Io {
                path: f(path),
                source,
            },
            FsError::PermissionDenied { path } => FsError::PermissionDenied { path: f(path) },
            FsError::AlreadyExists { path, other } => FsError::AlreadyExists {
                path: f(path),
                other: other.map(f),
            },
            FsError::NotEmptyDirectory { path } => FsError::NotEmptyDirectory { path: f(path) },
            FsError::RecursiveNotSpecified { path } => {
                FsError::RecursiveNotSpecified { path: f(path) }
            }
            FsError::ReadOnly { path } => FsError::ReadOnly { path: f(path) },
            canceled @ FsError::ContextCanceled { .. } => canceled,
        }
    }

    /// Map a host I/O error onto the closed taxonomy.
    ///
    /// Well-known kinds become their structured counterparts so callers can
    /// match on them uniformly across backends; everything else stays `Io`.
    pub(crate) fn from_io(path: &VfsPath, source: IoError) -> Self {
        match source.kind() {
            ErrorKind::NotFound => FsError::not_found(path),
            ErrorKind::PermissionDenied => FsError::PermissionDenied { path: path.clone() },
            ErrorKind::AlreadyExists => FsError::already_exists(path),
            ErrorKind::DirectoryNotEmpty => FsError::NotEmptyDirectory { path: path.clone() },
            _ => FsError::io(path, source),
        }
    }
}
