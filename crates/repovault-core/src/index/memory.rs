//! In-memory [`SearchIndex`] implementation for tests and small deployments.
//!
//! Documents live in a `HashMap` keyed by id behind `std::sync::RwLock`.
//! Search is a brute-force scan scored by term frequency, with matches in
//! the path and file name weighted above matches in the content.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::CodeDocument;
use crate::search::{
    build_hit, compile_path_pattern, matches_filters, paginate, term_frequency, SearchPage,
    SearchQuery,
};

use super::{folder_prefix, BulkReport, RepositoryStats, SearchIndex};

const PATH_WEIGHT: f64 = 2.0;

/// In-memory search index.
pub struct InMemoryIndex {
    docs: RwLock<HashMap<String, CodeDocument>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, CodeDocument>>> {
        self.docs
            .read()
            .map_err(|_| Error::index("in-memory index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, CodeDocument>>> {
        self.docs
            .write()
            .map_err(|_| Error::index("in-memory index lock poisoned"))
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All documents stored for `(repository_id, path)`.
    pub fn documents_at(&self, repository_id: &str, path: &str) -> Vec<CodeDocument> {
        self.read()
            .map(|docs| {
                docs.values()
                    .filter(|d| d.repository_id == repository_id && d.file_path == path)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn remove_where(&self, pred: impl Fn(&CodeDocument) -> bool) -> Result<u64> {
        let mut docs = self.write()?;
        let before = docs.len();
        docs.retain(|_, d| !pred(d));
        Ok((before - docs.len()) as u64)
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn upsert(&self, document: &CodeDocument) -> Result<()> {
        self.write()?.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn bulk_upsert(&self, documents: &[CodeDocument]) -> Result<BulkReport> {
        let mut docs = self.write()?;
        for d in documents {
            docs.insert(d.id.clone(), d.clone());
        }
        Ok(BulkReport {
            written: documents.len(),
            failed: 0,
        })
    }

    async fn replace_path(&self, document: &CodeDocument) -> Result<u64> {
        let mut docs = self.write()?;
        let before = docs.len();
        docs.retain(|_, d| {
            !(d.repository_id == document.repository_id && d.file_path == document.file_path)
        });
        let removed = (before - docs.len()) as u64;
        docs.insert(document.id.clone(), document.clone());
        Ok(removed)
    }

    async fn delete_by_path(&self, repository_id: &str, path: &str) -> Result<u64> {
        self.remove_where(|d| d.repository_id == repository_id && d.file_path == path)
    }

    async fn delete_by_path_prefix(&self, repository_id: &str, folder_path: &str) -> Result<u64> {
        let prefix = folder_prefix(folder_path);
        self.remove_where(|d| d.repository_id == repository_id && d.file_path.starts_with(&prefix))
    }

    async fn delete_by_repository(&self, repository_identifier: &str) -> Result<u64> {
        self.remove_where(|d| d.repository_identifier == repository_identifier)
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        let glob = compile_path_pattern(query.path_pattern.as_deref())?;
        let terms = query.terms();
        let docs = self.read()?;

        let mut scored: Vec<(f64, &CodeDocument)> = docs
            .values()
            .filter(|d| matches_filters(query, glob.as_ref(), d))
            .filter_map(|d| {
                if terms.is_empty() {
                    return Some((0.0, d));
                }
                let content = term_frequency(&d.content, &terms) as f64;
                let path = term_frequency(&d.file_path, &terms) as f64;
                let score = content + PATH_WEIGHT * path;
                (score > 0.0).then_some((score, d))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.file_path.cmp(&b.1.file_path))
        });

        let total = scored.len();
        let hits = paginate(scored, query.page, query.size)
            .into_iter()
            .map(|(score, d)| build_hit(d, score, query, &terms))
            .collect();

        Ok(SearchPage {
            total,
            page: query.page.max(1),
            size: query.size.max(1),
            hits,
        })
    }

    async fn stats(&self) -> Result<Vec<RepositoryStats>> {
        let docs = self.read()?;
        let mut by_repo: BTreeMap<(String, String), RepositoryStats> = BTreeMap::new();
        for d in docs.values() {
            let entry = by_repo
                .entry((d.repository_identifier.clone(), d.repository_id.clone()))
                .or_insert_with(|| RepositoryStats {
                    repository_id: d.repository_id.clone(),
                    repository_identifier: d.repository_identifier.clone(),
                    documents: 0,
                    chunks: 0,
                    embedded: 0,
                });
            entry.documents += 1;
            entry.chunks += d.chunks.len() as u64;
            if d.embedding.is_some() {
                entry.embedded += 1;
            }
        }
        Ok(by_repo.into_values().collect())
    }
}
