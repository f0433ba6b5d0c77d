//! Core data models used throughout repovault.
//!
//! These types describe what the versioned file store returns (entries,
//! directory listings, file contents), what travels on the change-event
//! boundary, and the code documents written to the search index.

use std::borrow::Cow;
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coordinates of a repository: its opaque metadata id and the identifier
/// that names its working tree on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub id: String,
    pub identifier: String,
}

impl RepositoryRef {
    pub fn new(id: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            identifier: identifier.into(),
        }
    }
}

/// One entry in a directory listing.
///
/// `path` is repository-relative with forward slashes and no leading slash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entry {
    File {
        path: String,
        name: String,
        size: u64,
    },
    Directory {
        path: String,
        name: String,
    },
}

impl Entry {
    pub fn path(&self) -> &str {
        match self {
            Entry::File { path, .. } | Entry::Directory { path, .. } => path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entry::File { name, .. } | Entry::Directory { name, .. } => name,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Entry::Directory { .. })
    }

    /// Size in bytes; `None` for directories.
    pub fn size(&self) -> Option<u64> {
        match self {
            Entry::File { size, .. } => Some(*size),
            Entry::Directory { .. } => None,
        }
    }
}

/// Listing order: directories before files, each group by name ascending.
pub fn compare_entries(a: &Entry, b: &Entry) -> Ordering {
    b.is_directory()
        .cmp(&a.is_directory())
        .then_with(|| a.name().cmp(b.name()))
}

/// A directory path plus its sorted entries. Built fresh on every listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryContent {
    pub path: String,
    pub entries: Vec<Entry>,
}

impl DirectoryContent {
    /// Build a listing, sorting `entries` with [`compare_entries`].
    pub fn new(path: impl Into<String>, mut entries: Vec<Entry>) -> Self {
        entries.sort_by(compare_entries);
        Self {
            path: path.into(),
            entries,
        }
    }

    pub fn directories(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.is_directory())
    }

    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| !e.is_directory())
    }
}

/// Raw bytes of one file as read from the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub content: Vec<u8>,
}

impl FileContent {
    /// Content decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Kind of change carried by a [`ChangedFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// A single file change inside a repository-updated notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub kind: ChangeKind,
}

/// A line-aligned slice of a file's content.
///
/// `index` is 0-based and contiguous; `start_line`/`end_line` are 1-based
/// and inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub index: usize,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// The indexed representation of one file.
///
/// `id` is freshly generated on every (re-)ingestion; the index keeps at
/// most one live document per `(repository_id, file_path)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeDocument {
    pub id: String,
    pub repository_id: String,
    pub repository_identifier: String,
    pub file_path: String,
    pub file_name: String,
    pub extension: Option<String>,
    pub language: String,
    pub content: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub chunks: Vec<CodeChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}
