//! Full-repository ingestion.
//!
//! Rebuilds a repository's slice of the index from its working tree:
//!
//! 1. Check the repository exists, then delete every document it owns.
//! 2. Walk the tree breadth-first through the file store's directory
//!    listing, with a queue of directory paths.
//! 3. Apply the single-file skip rules, build documents, and write them
//!    with `bulk_upsert` every `batch_size` documents and once more at the
//!    end.
//!
//! Failures are isolated to the smallest unit: a directory that cannot be
//! listed loses its subtree, a file that cannot be read or embedded is
//! skipped, and items rejected inside a bulk write are counted. Only a
//! failed bulk write as a whole aborts the run.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use repovault_core::index::BulkReport;
use repovault_core::models::{CodeDocument, Entry, RepositoryRef};
use repovault_core::Result;

use crate::ingest::{FileIngestor, SkipReason};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};

/// Counters for one repository ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents deleted before the rebuild.
    pub removed: u64,
    pub directories: u64,
    pub files_seen: u64,
    pub indexed: u64,
    pub skipped_not_code: u64,
    pub skipped_too_large: u64,
    /// Files that could not be read or embedded.
    pub failed_files: u64,
    /// Directories that could not be listed.
    pub failed_directories: u64,
    /// Documents rejected by the index during bulk writes.
    pub bulk_failed: u64,
}

/// Repository-wide half of the index-consistency pipeline.
pub struct RepositoryIngestor {
    files: Arc<FileIngestor>,
    batch_size: usize,
    progress: Arc<dyn IngestProgressReporter>,
}

impl RepositoryIngestor {
    pub fn new(files: Arc<FileIngestor>) -> Self {
        Self {
            files,
            batch_size: 100,
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Rebuild the index for one repository.
    pub async fn ingest_repository(&self, repo: &RepositoryRef) -> Result<IngestReport> {
        let store = self.files.store();
        let index = self.files.index();

        store.resolver().resolve_root(&repo.identifier)?;

        let mut report = IngestReport {
            removed: index.delete_by_repository(&repo.identifier).await?,
            ..IngestReport::default()
        };

        let mut queue: VecDeque<String> = VecDeque::from([String::new()]);
        let mut batch: Vec<CodeDocument> = Vec::with_capacity(self.batch_size);

        while let Some(dir) = queue.pop_front() {
            self.progress.report(IngestProgressEvent::Scanning {
                repository: repo.identifier.clone(),
                directory: dir.clone(),
                pending: queue.len(),
            });

            let listing = match store.list_directory(repo, Some(dir.as_str())) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(repository = %repo.identifier, directory = %dir, error = %e, "cannot list directory, skipping subtree");
                    report.failed_directories += 1;
                    continue;
                }
            };
            report.directories += 1;

            for entry in listing.entries {
                match entry {
                    Entry::Directory { path, .. } => queue.push_back(path),
                    Entry::File { path, name, size } => {
                        report.files_seen += 1;
                        if let Some(doc) = self.prepare(repo, &path, &name, size, &mut report).await {
                            batch.push(doc);
                        }
                        if batch.len() >= self.batch_size {
                            self.flush(repo, &mut batch, &mut report).await?;
                        }
                    }
                }
            }
        }

        self.flush(repo, &mut batch, &mut report).await?;
        index.refresh().await?;

        info!(
            repository = %repo.identifier,
            indexed = report.indexed,
            files_seen = report.files_seen,
            skipped = report.skipped_not_code + report.skipped_too_large,
            failed = report.failed_files + report.failed_directories + report.bulk_failed,
            "repository ingestion finished"
        );
        Ok(report)
    }

    /// Build the document for one listed file, or record why not.
    async fn prepare(
        &self,
        repo: &RepositoryRef,
        path: &str,
        name: &str,
        size: u64,
        report: &mut IngestReport,
    ) -> Option<CodeDocument> {
        let skip = self
            .files
            .classify(name)
            .or_else(|| self.files.check_size(size));
        if let Some(reason) = skip {
            count_skip(report, &reason);
            return None;
        }

        let file = match self.files.store().read_file(repo, path) {
            Ok(file) => file,
            Err(e) => {
                warn!(repository = %repo.identifier, path, error = %e, "cannot read file, skipping");
                report.failed_files += 1;
                return None;
            }
        };
        // The file may have grown since it was listed.
        if let Some(reason) = self.files.check_size(file.size) {
            count_skip(report, &reason);
            return None;
        }

        match self.files.build_document(repo, &file).await {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(repository = %repo.identifier, path, error = %e, "cannot build document, skipping");
                report.failed_files += 1;
                None
            }
        }
    }

    async fn flush(
        &self,
        repo: &RepositoryRef,
        batch: &mut Vec<CodeDocument>,
        report: &mut IngestReport,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let BulkReport { written, failed } = self.files.index().bulk_upsert(batch).await?;
        batch.clear();

        report.indexed += written as u64;
        report.bulk_failed += failed as u64;
        if failed > 0 {
            warn!(repository = %repo.identifier, failed, "bulk write rejected documents");
        }
        self.progress.report(IngestProgressEvent::Flushed {
            repository: repo.identifier.clone(),
            written: report.indexed,
            failed: report.bulk_failed,
            files_seen: report.files_seen,
        });
        Ok(())
    }
}

fn count_skip(report: &mut IngestReport, reason: &SkipReason) {
    match reason {
        SkipReason::NotCode => report.skipped_not_code += 1,
        SkipReason::TooLarge { .. } => report.skipped_too_large += 1,
    }
}
