//! Error taxonomy shared by the file store, the index backends, and the
//! ingestion services.
//!
//! Skipping a non-code or oversized file is not an error; ingestion reports
//! it as an outcome instead.

use std::fmt::Display;

/// Errors surfaced by repovault operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Repository, file, or directory is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Add-file target already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Path escapes the repository root or is malformed.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A file was expected but the path is a directory.
    #[error("Not a file: {0}")]
    NotAFile(String),

    /// A directory was expected but the path is a file.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Staging or committing failed.
    #[error("Version control operation failed: {0}")]
    VersionControl(String),

    /// A write, delete, or query against the search index failed.
    #[error("Search index operation failed: {0}")]
    IndexBackend(String),

    /// The embedding provider failed for a file.
    #[error("Embedding failed for {path}: {message}")]
    Embedding { path: String, message: String },

    /// Underlying filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Wrap any displayable backend failure as [`Error::IndexBackend`].
    pub fn index(err: impl Display) -> Self {
        Error::IndexBackend(err.to_string())
    }

    /// Wrap an I/O failure, naming the path it happened on.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::AlreadyExists(_) => "AlreadyExists",
            Error::InvalidPath(_) => "InvalidPath",
            Error::NotAFile(_) => "NotAFile",
            Error::NotADirectory(_) => "NotADirectory",
            Error::VersionControl(_) => "VersionControlFailure",
            Error::IndexBackend(_) => "IndexBackendFailure",
            Error::Embedding { .. } => "EmbeddingFailure",
            Error::Io { .. } => "IoFailure",
        }
    }
}
