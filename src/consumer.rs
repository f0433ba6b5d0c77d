//! Change-event consumer that keeps the index consistent with the file store.
//!
//! | Event               | Index action                                    |
//! |---------------------|-------------------------------------------------|
//! | `FileCreated`       | index the file                                  |
//! | `FileUpdated`       | re-index the file                               |
//! | `FileDeleted`       | delete documents at the path                    |
//! | `FolderCreated`     | nothing                                         |
//! | `FolderDeleted`     | delete documents under the folder               |
//! | `RepositoryCloned`  | rebuild the repository                          |
//! | `RepositoryUpdated` | per changed file: delete, or (re-)index         |
//!
//! Every action is idempotent, so redelivered events are harmless. A
//! repository update applies every changed file even when some fail, then
//! reports the first failure.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use repovault_core::models::{ChangeKind, RepositoryRef};
use repovault_core::Result;

use crate::events::ChangeEvent;
use crate::ingest::{FileIngestor, IngestOutcome};
use crate::ingest_repo::RepositoryIngestor;

pub struct IndexEventHandler {
    files: Arc<FileIngestor>,
    repositories: Arc<RepositoryIngestor>,
}

impl IndexEventHandler {
    pub fn new(files: Arc<FileIngestor>, repositories: Arc<RepositoryIngestor>) -> Self {
        Self { files, repositories }
    }

    /// Apply one event to the index.
    pub async fn handle(&self, event: &ChangeEvent) -> Result<()> {
        debug!(event = event.name(), repository_id = event.repository_id(), "handling change event");
        match event {
            ChangeEvent::FileCreated {
                repository_id,
                repository_identifier,
                file_path,
            }
            | ChangeEvent::FileUpdated {
                repository_id,
                repository_identifier,
                file_path,
            } => {
                let repo = RepositoryRef::new(repository_id.as_str(), repository_identifier.as_str());
                self.index(&repo, file_path).await
            }
            ChangeEvent::FileDeleted {
                repository_id,
                file_path,
            } => self.files.remove_file(repository_id, file_path).await.map(drop),
            ChangeEvent::FolderCreated { .. } => Ok(()),
            ChangeEvent::FolderDeleted {
                repository_id,
                folder_path,
                ..
            } => self
                .files
                .remove_folder(repository_id, folder_path)
                .await
                .map(drop),
            ChangeEvent::RepositoryCloned { id, identifier } => {
                let repo = RepositoryRef::new(id.as_str(), identifier.as_str());
                self.repositories.ingest_repository(&repo).await.map(drop)
            }
            ChangeEvent::RepositoryUpdated {
                repository_id,
                identifier,
                changed_files,
            } => {
                let repo = RepositoryRef::new(repository_id.as_str(), identifier.as_str());
                let mut first_error = None;
                let mut failed = 0usize;
                for change in changed_files {
                    let applied = match change.kind {
                        ChangeKind::Deleted => {
                            self.files.remove_file(&repo.id, &change.path).await.map(drop)
                        }
                        ChangeKind::Added | ChangeKind::Modified => {
                            self.index(&repo, &change.path).await
                        }
                    };
                    if let Err(e) = applied {
                        warn!(
                            repository = %repo.identifier,
                            path = %change.path,
                            kind = e.kind(),
                            error = %e,
                            "failed to apply changed file, continuing"
                        );
                        failed += 1;
                        first_error.get_or_insert(e);
                    }
                }
                match first_error {
                    Some(e) => {
                        warn!(
                            repository = %repo.identifier,
                            failed,
                            total = changed_files.len(),
                            "repository update applied with failures"
                        );
                        Err(e)
                    }
                    None => Ok(()),
                }
            }
        }
    }

    async fn index(&self, repo: &RepositoryRef, path: &str) -> Result<()> {
        if let IngestOutcome::Skipped(reason) = self.files.index_file(repo, path).await? {
            debug!(repository = %repo.identifier, path, ?reason, "file not indexed");
        }
        Ok(())
    }

    /// Consume events until every sender is dropped. Failures are logged
    /// and the loop moves on to the next event.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<ChangeEvent>) -> EventStats {
        let mut stats = EventStats::default();
        while let Some(event) = rx.recv().await {
            match self.handle(&event).await {
                Ok(()) => stats.handled += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(
                        event = event.name(),
                        repository_id = event.repository_id(),
                        kind = e.kind(),
                        error = %e,
                        "failed to apply change event to index"
                    );
                }
            }
        }
        info!(handled = stats.handled, failed = stats.failed, "change event consumer stopped");
        stats
    }
}

/// Outcome counters for [`IndexEventHandler::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventStats {
    pub handled: u64,
    pub failed: u64,
}
