//! Version-control adapter.
//!
//! [`VersionControl`] is the seam between the file store and the commit
//! history: stage the whole working tree, then commit only when something is
//! staged. [`GitCli`] implements it by running the `git` binary, the same
//! way repository checkouts are driven elsewhere in the crate.
//!
//! Commits are never signed and never run hooks. The committer identity is
//! passed with `-c user.name=… -c user.email=…` so no global git config is
//! required.

use std::path::Path;
use std::process::{Command, Output};

use tracing::debug;

use repovault_core::{Error, Result};

use crate::config::GitConfig;

/// What [`VersionControl::commit`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was created; carries its id.
    Committed(String),
    /// Nothing was staged, so no commit was made.
    Clean,
}

impl CommitOutcome {
    pub fn commit_id(&self) -> Option<&str> {
        match self {
            CommitOutcome::Committed(id) => Some(id),
            CommitOutcome::Clean => None,
        }
    }
}

/// Stage-and-commit operations on a working tree.
pub trait VersionControl: Send + Sync {
    /// Turn `root` into an empty working tree.
    fn init(&self, root: &Path) -> Result<()>;

    /// Stage every change in the working tree, deletions included.
    fn stage_all(&self, root: &Path) -> Result<()>;

    /// Commit staged changes. A clean index is a no-op, never an empty commit.
    fn commit(&self, root: &Path, message: &str) -> Result<CommitOutcome>;

    /// Current commit id, `None` before the first commit.
    fn head(&self, root: &Path) -> Result<Option<String>>;

    /// Number of commits reachable from HEAD.
    fn commit_count(&self, root: &Path) -> Result<u64>;
}

/// [`VersionControl`] backed by the `git` command-line tool.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
    author_name: String,
    author_email: String,
}

impl GitCli {
    pub fn new(config: &GitConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            author_name: config.author_name.clone(),
            author_email: config.author_email.clone(),
        }
    }

    fn command(&self, root: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-c")
            .arg(format!("user.name={}", self.author_name))
            .arg("-c")
            .arg(format!("user.email={}", self.author_email))
            .args(["-c", "commit.gpgsign=false"])
            .current_dir(root);
        cmd
    }

    fn output(&self, root: &Path, args: &[&str]) -> Result<Output> {
        debug!(root = %root.display(), ?args, "git");
        self.command(root).args(args).output().map_err(|e| {
            Error::VersionControl(format!(
                "failed to execute '{} {}': {}. Is git installed?",
                self.binary,
                args.join(" "),
                e
            ))
        })
    }

    /// Run git and require a zero exit status.
    fn run(&self, root: &Path, args: &[&str]) -> Result<String> {
        let output = self.output(root, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::VersionControl(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// True when the index differs from HEAD (or anything is staged before
    /// the first commit).
    fn has_staged_changes(&self, root: &Path) -> Result<bool> {
        let output = self.output(root, &["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(Error::VersionControl(format!(
                    "git diff --cached failed: {}",
                    stderr.trim()
                )))
            }
        }
    }
}

impl VersionControl for GitCli {
    fn init(&self, root: &Path) -> Result<()> {
        self.run(root, &["init", "-q"])?;
        Ok(())
    }

    fn stage_all(&self, root: &Path) -> Result<()> {
        self.run(root, &["add", "-A"])?;
        Ok(())
    }

    fn commit(&self, root: &Path, message: &str) -> Result<CommitOutcome> {
        if !self.has_staged_changes(root)? {
            return Ok(CommitOutcome::Clean);
        }
        self.run(
            root,
            &["commit", "--no-gpg-sign", "--no-verify", "-q", "-m", message],
        )?;
        let id = self.run(root, &["rev-parse", "HEAD"])?;
        Ok(CommitOutcome::Committed(id))
    }

    fn head(&self, root: &Path) -> Result<Option<String>> {
        let output = self.output(root, &["rev-parse", "--verify", "-q", "HEAD"])?;
        if !output.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!sha.is_empty()).then_some(sha))
    }

    fn commit_count(&self, root: &Path) -> Result<u64> {
        if self.head(root)?.is_none() {
            return Ok(0);
        }
        let out = self.run(root, &["rev-list", "--count", "HEAD"])?;
        out.parse::<u64>()
            .map_err(|e| Error::VersionControl(format!("unexpected rev-list output {:?}: {}", out, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git() -> GitCli {
        GitCli::new(&GitConfig::default())
    }

    #[test]
    fn test_commit_only_when_dirty() {
        let tmp = TempDir::new().unwrap();
        let vcs = git();
        vcs.init(tmp.path()).unwrap();
        assert_eq!(vcs.head(tmp.path()).unwrap(), None);
        assert_eq!(vcs.commit_count(tmp.path()).unwrap(), 0);

        vcs.stage_all(tmp.path()).unwrap();
        assert_eq!(vcs.commit(tmp.path(), "empty").unwrap(), CommitOutcome::Clean);

        std::fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        vcs.stage_all(tmp.path()).unwrap();
        let outcome = vcs.commit(tmp.path(), "add a").unwrap();
        let id = outcome.commit_id().unwrap().to_string();
        assert_eq!(vcs.head(tmp.path()).unwrap(), Some(id));
        assert_eq!(vcs.commit_count(tmp.path()).unwrap(), 1);

        vcs.stage_all(tmp.path()).unwrap();
        assert_eq!(vcs.commit(tmp.path(), "again").unwrap(), CommitOutcome::Clean);
        assert_eq!(vcs.commit_count(tmp.path()).unwrap(), 1);
    }

    #[test]
    fn test_stage_all_includes_deletions() {
        let tmp = TempDir::new().unwrap();
        let vcs = git();
        vcs.init(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("a.txt"), "x").unwrap();
        vcs.stage_all(tmp.path()).unwrap();
        vcs.commit(tmp.path(), "add").unwrap();

        std::fs::remove_file(tmp.path().join("a.txt")).unwrap();
        vcs.stage_all(tmp.path()).unwrap();
        assert!(matches!(
            vcs.commit(tmp.path(), "delete").unwrap(),
            CommitOutcome::Committed(_)
        ));
        assert_eq!(vcs.commit_count(tmp.path()).unwrap(), 2);
    }

    #[test]
    fn test_failure_is_version_control_error() {
        let tmp = TempDir::new().unwrap();
        // Not a working tree.
        let err = git().stage_all(tmp.path()).unwrap_err();
        assert_eq!(err.kind(), "VersionControlFailure");
    }

    #[test]
    fn test_missing_binary() {
        let tmp = TempDir::new().unwrap();
        let vcs = GitCli::new(&GitConfig {
            binary: "definitely-not-git-binary".into(),
            ..GitConfig::default()
        });
        assert!(matches!(vcs.init(tmp.path()), Err(Error::VersionControl(_))));
    }
}
