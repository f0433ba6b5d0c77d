//! Repository roots and safe path resolution.
//!
//! Every working tree lives at `<repositories.root>/<identifier>`. Resolving
//! a repository-relative path happens in two steps:
//!
//! 1. Lexical: [`repovault_core::paths::normalize`] drops `.`, folds `..`
//!    and rejects anything that would climb above the root.
//! 2. Physical: the nearest ancestor of the joined path that exists on disk
//!    is canonicalized and must still sit under the canonical root, so a
//!    symlink inside the tree cannot point a write outside of it.
//!
//! Either failure is [`Error::InvalidPath`].

use std::path::{Path, PathBuf};

use repovault_core::paths::{self, VCS_DIR};
use repovault_core::{Error, Result};

use crate::config::Config;

/// A path that passed both containment checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute location on disk.
    pub absolute: PathBuf,
    /// Normalized repository-relative form (`""` for the root).
    pub relative: String,
    pub segments: Vec<String>,
}

impl ResolvedPath {
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when the path is, or is inside, the VCS metadata directory.
    pub fn is_vcs_metadata(&self) -> bool {
        paths::is_vcs_metadata(&self.segments)
    }
}

/// Maps repository identifiers to working-tree roots.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base: PathBuf,
}

impl PathResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.repositories.root.clone())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Absolute, canonical root of an existing working tree.
    pub fn resolve_root(&self, identifier: &str) -> Result<PathBuf> {
        paths::validate_identifier(identifier)?;
        let root = self.base.join(identifier);
        if !root.is_dir() || !root.join(VCS_DIR).exists() {
            return Err(Error::NotFound(format!("repository {}", identifier)));
        }
        root.canonicalize()
            .map_err(|e| Error::io(root.display().to_string(), e))
    }

    /// Create the directory for a new working tree and return it.
    ///
    /// Fails with [`Error::AlreadyExists`] when a working tree is already
    /// there. The caller turns the directory into a repository.
    pub fn prepare_root(&self, identifier: &str) -> Result<PathBuf> {
        paths::validate_identifier(identifier)?;
        let root = self.base.join(identifier);
        if root.join(VCS_DIR).exists() {
            return Err(Error::AlreadyExists(format!("repository {}", identifier)));
        }
        std::fs::create_dir_all(&root).map_err(|e| Error::io(root.display().to_string(), e))?;
        root.canonicalize()
            .map_err(|e| Error::io(root.display().to_string(), e))
    }

    /// Resolve `relative` under `root`, which must already be canonical.
    pub fn resolve(&self, root: &Path, relative: &str) -> Result<ResolvedPath> {
        let segments = paths::normalize(relative)?;
        let mut absolute = root.to_path_buf();
        for s in &segments {
            absolute.push(s);
        }

        let anchor = nearest_existing(&absolute, root)?;
        if !anchor.starts_with(root) {
            return Err(Error::InvalidPath(format!(
                "{} resolves outside the repository root",
                relative
            )));
        }

        Ok(ResolvedPath {
            absolute,
            relative: paths::join(&segments),
            segments,
        })
    }
}

/// Canonical form of the deepest existing ancestor of `path` (itself included).
fn nearest_existing(path: &Path, root: &Path) -> Result<PathBuf> {
    for candidate in path.ancestors() {
        if std::fs::symlink_metadata(candidate).is_ok() {
            return candidate.canonicalize().map_err(|_| {
                Error::InvalidPath(format!("{} cannot be resolved", candidate.display()))
            });
        }
        if candidate == root {
            break;
        }
    }
    Err(Error::NotFound(format!("{}", root.display())))
}
