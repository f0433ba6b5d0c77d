//! Search-index abstraction for repovault.
//!
//! The [`SearchIndex`] trait is the projection side of the system: code
//! documents are upserted by id, removed by exact path, by path prefix, or
//! by repository, and queried with a [`SearchQuery`]. Backends are
//! pluggable (SQLite in the app crate, [`memory::InMemoryIndex`] here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::CodeDocument;
use crate::search::{SearchPage, SearchQuery};

/// Outcome of a bulk write. Failed items do not abort the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub written: usize,
    pub failed: usize,
}

impl BulkReport {
    pub fn merge(&mut self, other: BulkReport) {
        self.written += other.written;
        self.failed += other.failed;
    }
}

/// Per-repository document counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryStats {
    pub repository_id: String,
    pub repository_identifier: String,
    pub documents: u64,
    pub chunks: u64,
    pub embedded: u64,
}

/// Abstract search-index backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](SearchIndex::upsert) | Write one document, replacing any with the same id |
/// | [`bulk_upsert`](SearchIndex::bulk_upsert) | Write many documents in one round trip |
/// | [`replace_path`](SearchIndex::replace_path) | Atomically swap the document at a path |
/// | [`delete_by_path`](SearchIndex::delete_by_path) | Remove documents at an exact path |
/// | [`delete_by_path_prefix`](SearchIndex::delete_by_path_prefix) | Remove every document under a folder |
/// | [`delete_by_repository`](SearchIndex::delete_by_repository) | Remove every document of a repository |
/// | [`refresh`](SearchIndex::refresh) | Best-effort request to make writes visible |
/// | [`search`](SearchIndex::search) | Free-text query with filters and pagination |
/// | [`stats`](SearchIndex::stats) | Document and chunk counts per repository |
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Write one document keyed by its id. Documents at the same path with
    /// another id are left alone.
    async fn upsert(&self, document: &CodeDocument) -> Result<()>;

    /// Write many documents. Per-item failures are counted, not raised;
    /// an `Err` means the batch as a whole could not be attempted.
    async fn bulk_upsert(&self, documents: &[CodeDocument]) -> Result<BulkReport>;

    /// Delete every document at `(document.repository_id, document.file_path)`
    /// and write `document`, as one atomic step. Concurrent calls for the
    /// same path leave exactly one document behind. Returns how many
    /// documents were replaced.
    async fn replace_path(&self, document: &CodeDocument) -> Result<u64>;

    /// Delete documents whose repository id and path both match exactly.
    /// Returns the number removed.
    async fn delete_by_path(&self, repository_id: &str, path: &str) -> Result<u64>;

    /// Delete documents whose path starts with `folder_path` + `/`.
    async fn delete_by_path_prefix(&self, repository_id: &str, folder_path: &str) -> Result<u64>;

    /// Delete every document of the repository with this identifier.
    async fn delete_by_repository(&self, repository_identifier: &str) -> Result<u64>;

    /// Ask the backend to make recent writes visible to readers.
    async fn refresh(&self) -> Result<()>;

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage>;

    async fn stats(&self) -> Result<Vec<RepositoryStats>>;
}

/// Normalize a folder path into a prefix that ends with `/`.
///
/// The root folder yields the empty prefix, which matches everything.
///
/// ```rust
/// use repovault_core::index::folder_prefix;
///
/// assert_eq!(folder_prefix("docs"), "docs/");
/// assert_eq!(folder_prefix("/docs/api/"), "docs/api/");
/// assert_eq!(folder_prefix(""), "");
/// ```
pub fn folder_prefix(folder_path: &str) -> String {
    let trimmed = folder_path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
