//! Lexical path arithmetic for repository-relative paths.
//!
//! Everything here works on strings only: no filesystem access. The
//! application's path resolver joins the normalized segments onto a
//! repository root and adds the symlink check.
//!
//! Both `/` and `\` separate segments, `.` segments are dropped and `..`
//! pops the previous segment. A `..` with nothing left to pop would leave
//! the root, so normalization fails with [`Error::InvalidPath`].

use crate::error::{Error, Result};

/// Name of the version-control metadata directory hidden from listings.
pub const VCS_DIR: &str = ".git";

/// Normalize a repository-relative path into its segments.
///
/// A leading slash is accepted and means "relative to the root"; the empty
/// string and `"/"` normalize to no segments (the root itself).
pub fn normalize(path: &str) -> Result<Vec<String>> {
    if path.contains('\0') {
        return Err(Error::InvalidPath(format!("{:?} contains a NUL byte", path)));
    }

    let mut segments: Vec<String> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::InvalidPath(format!(
                        "{} escapes the repository root",
                        path
                    )));
                }
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(segments)
}

/// Join segments back into the canonical `a/b/c` form (empty for the root).
pub fn join(segments: &[String]) -> String {
    segments.join("/")
}

/// Normalize and re-join in one step.
pub fn normalize_str(path: &str) -> Result<String> {
    normalize(path).map(|segments| join(&segments))
}

/// `None`, `""`, and `"/"` all denote the repository root.
pub fn is_root(path: Option<&str>) -> bool {
    match path {
        None => true,
        Some(p) => p.trim_matches('/').is_empty(),
    }
}

/// Final segment of a path (the whole string when there is no separator).
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Child path of `parent` named `name`.
pub fn child(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// True when the path lives inside the VCS metadata directory.
pub fn is_vcs_metadata(segments: &[String]) -> bool {
    segments.first().map(|s| s == VCS_DIR).unwrap_or(false)
}

/// Validate a repository identifier: a single, non-empty segment.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let bad = identifier.is_empty()
        || identifier == "."
        || identifier == ".."
        || identifier.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::InvalidPath(format!(
            "invalid repository identifier {:?}",
            identifier
        )));
    }
    Ok(())
}
