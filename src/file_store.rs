//! Versioned file store.
//!
//! Each mutating operation runs the same sequence: resolve and bounds-check
//! the path, mutate the working tree, stage everything, commit. One logical
//! operation produces at most one commit. After the commit a
//! [`ChangeEvent`] is published so the index can catch up.
//!
//! There is no rollback. If staging or committing fails after the
//! filesystem mutation succeeded, the change stays in the working tree
//! uncommitted, a warning is logged and the caller gets
//! [`Error::VersionControl`]. The next successful operation commits it
//! along with its own change.
//!
//! Operations are synchronous. Mutations against one repository must be
//! serialized by the caller; reads may run concurrently.
//!
//! | Operation | Errors |
//! |-----------|--------|
//! | [`add_file`](VersionedFileStore::add_file) | `AlreadyExists`, `NotADirectory` (parent is a file) |
//! | [`update_file`](VersionedFileStore::update_file) | `NotFound`, `NotAFile` |
//! | [`delete_file`](VersionedFileStore::delete_file) | `NotFound`, `NotAFile` |
//! | [`create_folder`](VersionedFileStore::create_folder) | `NotADirectory` |
//! | [`delete_folder`](VersionedFileStore::delete_folder) | `NotFound`, `NotADirectory` |
//! | [`list_directory`](VersionedFileStore::list_directory) | `NotFound`, `NotADirectory` |
//! | [`read_file`](VersionedFileStore::read_file) | `NotFound`, `NotAFile` |
//!
//! All of them can also fail with `NotFound` (unknown repository),
//! `InvalidPath` (traversal, or a path inside `.git`) and `Io`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use repovault_core::models::{DirectoryContent, Entry, FileContent, RepositoryRef};
use repovault_core::paths::{self, VCS_DIR};
use repovault_core::{Error, Result};

use crate::config::Config;
use crate::events::{ChangeEvent, EventPublisher, NullPublisher};
use crate::resolver::{PathResolver, ResolvedPath};
use crate::vcs::{CommitOutcome, GitCli, VersionControl};

/// Zero-byte file that keeps an otherwise empty folder in the history.
pub const FOLDER_MARKER: &str = ".gitkeep";

/// File and folder operations on git-backed working trees.
pub struct VersionedFileStore {
    resolver: PathResolver,
    vcs: Arc<dyn VersionControl>,
    publisher: Arc<dyn EventPublisher>,
}

impl VersionedFileStore {
    pub fn new(resolver: PathResolver, vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            resolver,
            vcs,
            publisher: Arc::new(NullPublisher),
        }
    }

    /// Store over `[repositories].root` using the `git` binary from `[git]`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            PathResolver::from_config(config),
            Arc::new(GitCli::new(&config.git)),
        )
    }

    /// Publish change events to `publisher` after each commit.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Create an empty working tree for `identifier`.
    pub fn init_repository(&self, identifier: &str) -> Result<PathBuf> {
        let root = self.resolver.prepare_root(identifier)?;
        self.vcs.init(&root)?;
        info!(repository = identifier, root = %root.display(), "initialized repository");
        Ok(root)
    }

    /// Current commit id of the repository, if it has one.
    pub fn head(&self, repo: &RepositoryRef) -> Result<Option<String>> {
        let root = self.resolver.resolve_root(&repo.identifier)?;
        self.vcs.head(&root)
    }

    pub fn commit_count(&self, repo: &RepositoryRef) -> Result<u64> {
        let root = self.resolver.resolve_root(&repo.identifier)?;
        self.vcs.commit_count(&root)
    }

    /// Write a new file. Never overwrites.
    pub fn add_file(
        &self,
        repo: &RepositoryRef,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<CommitOutcome> {
        let (root, target) = self.resolve_for_mutation(repo, path)?;
        if exists(&target.absolute) {
            return Err(Error::AlreadyExists(target.relative));
        }
        create_parents(&root, &target)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target.absolute)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::AlreadyExists(target.relative.clone()),
                _ => Error::io(target.relative.clone(), e),
            })?;
        file.write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::io(target.relative.clone(), e))?;

        let message = message_or(message, || format!("Add {}", target.relative));
        let outcome = self.commit(&root, &target.relative, &message)?;
        self.publisher.publish(ChangeEvent::FileCreated {
            repository_id: repo.id.clone(),
            repository_identifier: repo.identifier.clone(),
            file_path: target.relative,
        });
        Ok(outcome)
    }

    /// Replace the content of an existing file.
    pub fn update_file(
        &self,
        repo: &RepositoryRef,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<CommitOutcome> {
        let (root, target) = self.resolve_for_mutation(repo, path)?;
        require_file(&target)?;

        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&target.absolute)
            .map_err(|e| Error::io(target.relative.clone(), e))?;
        file.write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::io(target.relative.clone(), e))?;

        let message = message_or(message, || format!("Update {}", target.relative));
        let outcome = self.commit(&root, &target.relative, &message)?;
        self.publisher.publish(ChangeEvent::FileUpdated {
            repository_id: repo.id.clone(),
            repository_identifier: repo.identifier.clone(),
            file_path: target.relative,
        });
        Ok(outcome)
    }

    pub fn delete_file(
        &self,
        repo: &RepositoryRef,
        path: &str,
        message: &str,
    ) -> Result<CommitOutcome> {
        let (root, target) = self.resolve_for_mutation(repo, path)?;
        require_file(&target)?;

        fs::remove_file(&target.absolute).map_err(|e| Error::io(target.relative.clone(), e))?;

        let message = message_or(message, || format!("Delete {}", target.relative));
        let outcome = self.commit(&root, &target.relative, &message)?;
        self.publisher.publish(ChangeEvent::FileDeleted {
            repository_id: repo.id.clone(),
            file_path: target.relative,
        });
        Ok(outcome)
    }

    /// Create a folder (and its ancestors) with a marker file inside.
    /// Creating an existing folder is not an error.
    pub fn create_folder(
        &self,
        repo: &RepositoryRef,
        path: &str,
        message: &str,
    ) -> Result<CommitOutcome> {
        let (root, target) = self.resolve_for_mutation(repo, path)?;
        if target.absolute.exists() && !target.absolute.is_dir() {
            return Err(Error::NotADirectory(target.relative));
        }
        create_parents(&root, &target)?;
        fs::create_dir_all(&target.absolute).map_err(|e| Error::io(target.relative.clone(), e))?;

        let marker = target.absolute.join(FOLDER_MARKER);
        if !exists(&marker) {
            fs::File::create(&marker).map_err(|e| Error::io(target.relative.clone(), e))?;
        }

        let message = message_or(message, || format!("Create folder {}", target.relative));
        let outcome = self.commit(&root, &target.relative, &message)?;
        self.publisher.publish(ChangeEvent::FolderCreated {
            repository_id: repo.id.clone(),
            repository_identifier: repo.identifier.clone(),
            folder_path: target.relative,
        });
        Ok(outcome)
    }

    /// Remove a folder and everything under it, children before parents.
    pub fn delete_folder(
        &self,
        repo: &RepositoryRef,
        path: &str,
        message: &str,
    ) -> Result<CommitOutcome> {
        let (root, target) = self.resolve_for_mutation(repo, path)?;
        let meta = fs::symlink_metadata(&target.absolute)
            .map_err(|_| Error::NotFound(target.relative.clone()))?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(target.relative));
        }

        for entry in WalkDir::new(&target.absolute).contents_first(true) {
            let entry = entry.map_err(|e| {
                let rel = target.relative.clone();
                match e.into_io_error() {
                    Some(io) => Error::io(rel, io),
                    None => Error::InvalidPath(format!("{}: filesystem loop", rel)),
                }
            })?;
            let removed = if entry.file_type().is_dir() {
                fs::remove_dir(entry.path())
            } else {
                fs::remove_file(entry.path())
            };
            removed.map_err(|e| Error::io(entry.path().display().to_string(), e))?;
        }

        let message = message_or(message, || format!("Delete folder {}", target.relative));
        let outcome = self.commit(&root, &target.relative, &message)?;
        self.publisher.publish(ChangeEvent::FolderDeleted {
            repository_id: repo.id.clone(),
            repository_identifier: repo.identifier.clone(),
            folder_path: target.relative,
        });
        Ok(outcome)
    }

    /// List a directory. `None`, `""` and `"/"` mean the root.
    ///
    /// The VCS metadata directory and symbolic links are left out.
    pub fn list_directory(&self, repo: &RepositoryRef, path: Option<&str>) -> Result<DirectoryContent> {
        let (_root, target) = self.resolve_for_read(repo, path.unwrap_or(""))?;
        let meta = fs::metadata(&target.absolute)
            .map_err(|_| Error::NotFound(display_path(&target)))?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(target.relative));
        }

        let dir = fs::read_dir(&target.absolute).map_err(|e| Error::io(display_path(&target), e))?;
        let mut entries = Vec::new();
        for item in dir {
            let item = item.map_err(|e| Error::io(display_path(&target), e))?;
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                debug!(dir = %target.relative, "skipping entry with a non UTF-8 name");
                continue;
            };
            if name == VCS_DIR {
                continue;
            }
            let file_type = item
                .file_type()
                .map_err(|e| Error::io(paths::child(&target.relative, &name), e))?;
            let path = paths::child(&target.relative, &name);
            if file_type.is_dir() {
                entries.push(Entry::Directory { path, name });
            } else if file_type.is_file() {
                let size = item
                    .metadata()
                    .map_err(|e| Error::io(path.clone(), e))?
                    .len();
                entries.push(Entry::File { path, name, size });
            }
        }

        Ok(DirectoryContent::new(target.relative, entries))
    }

    pub fn read_file(&self, repo: &RepositoryRef, path: &str) -> Result<FileContent> {
        let (_root, target) = self.resolve_for_read(repo, path)?;
        require_file(&target)?;
        let content = fs::read(&target.absolute).map_err(|e| Error::io(target.relative.clone(), e))?;
        Ok(FileContent {
            name: paths::file_name(&target.relative).to_string(),
            size: content.len() as u64,
            path: target.relative,
            content,
        })
    }

    fn resolve_for_read(&self, repo: &RepositoryRef, path: &str) -> Result<(PathBuf, ResolvedPath)> {
        let root = self.resolver.resolve_root(&repo.identifier)?;
        let target = self.resolver.resolve(&root, path)?;
        if target.is_vcs_metadata() {
            return Err(Error::InvalidPath(format!("{} is version-control metadata", path)));
        }
        Ok((root, target))
    }

    fn resolve_for_mutation(&self, repo: &RepositoryRef, path: &str) -> Result<(PathBuf, ResolvedPath)> {
        let (root, target) = self.resolve_for_read(repo, path)?;
        if target.is_root() {
            return Err(Error::InvalidPath(
                "the repository root cannot be the target of this operation".to_string(),
            ));
        }
        Ok((root, target))
    }

    fn commit(&self, root: &Path, relative: &str, message: &str) -> Result<CommitOutcome> {
        let result = self
            .vcs
            .stage_all(root)
            .and_then(|_| self.vcs.commit(root, message));
        match &result {
            Ok(CommitOutcome::Committed(id)) => debug!(path = relative, commit = %id, "committed"),
            Ok(CommitOutcome::Clean) => debug!(path = relative, "nothing to commit"),
            Err(e) => warn!(
                path = relative,
                error = %e,
                "working tree changed but the commit failed; change left uncommitted"
            ),
        }
        result
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn display_path(target: &ResolvedPath) -> String {
    if target.is_root() {
        "/".to_string()
    } else {
        target.relative.clone()
    }
}

fn require_file(target: &ResolvedPath) -> Result<()> {
    let meta = fs::metadata(&target.absolute).map_err(|_| Error::NotFound(display_path(target)))?;
    if meta.is_dir() {
        return Err(Error::NotAFile(display_path(target)));
    }
    Ok(())
}

/// Create the missing ancestors of `target`, failing if one of them is a file.
fn create_parents(root: &Path, target: &ResolvedPath) -> Result<()> {
    let mut dir = root.to_path_buf();
    let parents = &target.segments[..target.segments.len().saturating_sub(1)];
    for (i, segment) in parents.iter().enumerate() {
        dir.push(segment);
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(Error::NotADirectory(paths::join(&parents[..=i]))),
            Err(_) => {
                fs::create_dir(&dir).map_err(|e| Error::io(paths::join(&parents[..=i]), e))?;
            }
        }
    }
    Ok(())
}

fn message_or(message: &str, default: impl FnOnce() -> String) -> String {
    if message.trim().is_empty() {
        default()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GitConfig;
    use crate::vcs::GitCli;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Recorder(Mutex<Vec<ChangeEvent>>);

    impl EventPublisher for Recorder {
        fn publish(&self, event: ChangeEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn setup() -> (TempDir, VersionedFileStore, RepositoryRef, Arc<Recorder>) {
        let tmp = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let store = VersionedFileStore::new(
            PathResolver::new(tmp.path()),
            Arc::new(GitCli::new(&GitConfig::default())),
        )
        .with_publisher(recorder.clone());
        store.init_repository("demo").unwrap();
        (tmp, store, RepositoryRef::new("42", "demo"), recorder)
    }

    #[test]
    fn test_add_then_read() {
        let (_tmp, store, repo, _) = setup();
        store.add_file(&repo, "src/App.java", b"class App {}", "").unwrap();
        let file = store.read_file(&repo, "src/App.java").unwrap();
        assert_eq!(file.content, b"class App {}");
        assert_eq!(file.name, "App.java");
        assert_eq!(file.size, 12);
    }

    #[test]
    fn test_add_existing_fails() {
        let (_tmp, store, repo, _) = setup();
        store.add_file(&repo, "a.txt", b"one", "first").unwrap();
        let err = store.add_file(&repo, "a.txt", b"two", "second").unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(store.read_file(&repo, "a.txt").unwrap().content, b"one");
    }

    #[test]
    fn test_add_under_file_parent_fails() {
        let (_tmp, store, repo, _) = setup();
        store.add_file(&repo, "a.txt", b"x", "").unwrap();
        let err = store.add_file(&repo, "a.txt/b.txt", b"y", "").unwrap_err();
        assert!(matches!(err, Error::NotADirectory(_)));
    }

    #[test]
    fn test_update_missing_and_directory() {
        let (_tmp, store, repo, _) = setup();
        assert!(matches!(
            store.update_file(&repo, "nope.txt", b"x", ""),
            Err(Error::NotFound(_))
        ));
        store.create_folder(&repo, "dir", "").unwrap();
        assert!(matches!(
            store.update_file(&repo, "dir", b"x", ""),
            Err(Error::NotAFile(_))
        ));
    }

    #[test]
    fn test_update_replaces_content() {
        let (_tmp, store, repo, _) = setup();
        store.add_file(&repo, "a.txt", b"a much longer first version", "").unwrap();
        store.update_file(&repo, "a.txt", b"short", "").unwrap();
        assert_eq!(store.read_file(&repo, "a.txt").unwrap().content, b"short");
    }

    #[test]
    fn test_one_commit_per_operation() {
        let (_tmp, store, repo, _) = setup();
        store.add_file(&repo, "a.txt", b"a", "").unwrap();
        store.create_folder(&repo, "docs", "").unwrap();
        store.update_file(&repo, "a.txt", b"b", "").unwrap();
        assert_eq!(store.commit_count(&repo).unwrap(), 3);

        // Same bytes again: nothing staged, no new commit.
        let outcome = store.update_file(&repo, "a.txt", b"b", "").unwrap();
        assert_eq!(outcome, CommitOutcome::Clean);
        let outcome = store.create_folder(&repo, "docs", "").unwrap();
        assert_eq!(outcome, CommitOutcome::Clean);
        assert_eq!(store.commit_count(&repo).unwrap(), 3);
    }

    #[test]
    fn test_delete_file() {
        let (_tmp, store, repo, _) = setup();
        store.add_file(&repo, "a.txt", b"a", "").unwrap();
        store.delete_file(&repo, "a.txt", "").unwrap();
        assert!(matches!(store.read_file(&repo, "a.txt"), Err(Error::NotFound(_))));
        assert!(matches!(store.delete_file(&repo, "a.txt", ""), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_folder_lifecycle() {
        let (_tmp, store, repo, _) = setup();
        store.create_folder(&repo, "docs/api", "").unwrap();
        store.add_file(&repo, "docs/guide.md", b"# Guide", "").unwrap();
        store.add_file(&repo, "docs/api/ref.md", b"# Ref", "").unwrap();

        assert!(matches!(
            store.delete_folder(&repo, "docs/guide.md", ""),
            Err(Error::NotADirectory(_))
        ));
        store.delete_folder(&repo, "docs", "").unwrap();
        assert!(matches!(
            store.list_directory(&repo, Some("docs")),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.delete_folder(&repo, "docs", ""), Err(Error::NotFound(_))));
        assert!(matches!(store.delete_folder(&repo, "/", ""), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_listing_order_and_hidden_git() {
        let (_tmp, store, repo, _) = setup();
        store.add_file(&repo, "b.txt", b"b", "").unwrap();
        store.add_file(&repo, "A.txt", b"a", "").unwrap();
        store.create_folder(&repo, "zeta", "").unwrap();
        store.create_folder(&repo, "alpha", "").unwrap();

        let listing = store.list_directory(&repo, None).unwrap();
        let names: Vec<&str> = listing.entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["alpha", "zeta", "A.txt", "b.txt"]);
        assert_eq!(listing.path, "");

        let alpha = store.list_directory(&repo, Some("/alpha")).unwrap();
        assert_eq!(alpha.entries.len(), 1);
        assert_eq!(alpha.entries[0].path(), "alpha/.gitkeep");
        assert_eq!(alpha.entries[0].size(), Some(0));

        assert!(matches!(
            store.list_directory(&repo, Some("b.txt")),
            Err(Error::NotADirectory(_))
        ));
    }

    #[test]
    fn test_vcs_metadata_is_off_limits() {
        let (_tmp, store, repo, _) = setup();
        assert!(matches!(
            store.add_file(&repo, ".git/hooks/pre-commit", b"#!/bin/sh", ""),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            store.read_file(&repo, ".git/config"),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            store.delete_folder(&repo, ".git", ""),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_traversal_never_touches_disk() {
        let (tmp, store, repo, _) = setup();
        let err = store
            .add_file(&repo, "../../../escaped.txt", b"x", "")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
        assert!(!tmp.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_unknown_repository() {
        let (_tmp, store, _, _) = setup();
        let other = RepositoryRef::new("1", "other");
        assert!(matches!(
            store.list_directory(&other, None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_events_follow_commits() {
        let (_tmp, store, repo, recorder) = setup();
        store.add_file(&repo, "src/App.java", b"x", "").unwrap();
        store.update_file(&repo, "src/App.java", b"y", "").unwrap();
        store.delete_file(&repo, "src/App.java", "").unwrap();
        store.create_folder(&repo, "docs", "").unwrap();
        store.delete_folder(&repo, "docs", "").unwrap();
        let _ = store.add_file(&repo, "../bad", b"x", "");

        let names: Vec<&str> = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.name())
            .collect();
        assert_eq!(
            names,
            vec!["FileCreated", "FileUpdated", "FileDeleted", "FolderCreated", "FolderDeleted"]
        );
    }

    #[test]
    fn test_default_commit_message() {
        assert_eq!(message_or("  ", || "Add a".into()), "Add a");
        assert_eq!(message_or("custom", || "Add a".into()), "custom");
    }
}
