//! Single-file ingestion: file store → classify → chunk → embed → index.
//!
//! [`FileIngestor::index_file`] reads one file through the
//! [`VersionedFileStore`], skips it when it is not code or is too large,
//! chunks it, embeds it when a provider is configured, and writes a new
//! [`CodeDocument`] in place of whatever the index held for that path.
//! The swap is a single backend operation, so at most one document per
//! `(repository, path)` survives even when deliveries for a path overlap.
//!
//! Skips are outcomes, not errors. Read, embedding and index failures are
//! returned to the caller.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use repovault_core::chunk::chunk_code_with_metadata;
use repovault_core::embedding::{embed_one, EmbeddingProvider};
use repovault_core::index::SearchIndex;
use repovault_core::language::{extension_of, LanguageTable};
use repovault_core::models::{CodeDocument, FileContent, RepositoryRef};
use repovault_core::paths;
use repovault_core::{Error, Result};

use crate::config::Config;
use crate::file_store::VersionedFileStore;

/// Limits applied to every ingested file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestPolicy {
    pub max_file_bytes: u64,
    pub max_tokens: usize,
    /// Attach an embedding to every chunk as well as to the whole file.
    pub embed_chunks: bool,
}

impl IngestPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_file_bytes: config.ingest.max_file_bytes,
            max_tokens: config.chunking.max_tokens,
            embed_chunks: config.ingest.embed_chunks,
        }
    }
}

impl Default for IngestPolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_tokens: repovault_core::chunk::DEFAULT_MAX_TOKENS,
            embed_chunks: false,
        }
    }
}

/// Why a file was deliberately not indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No language is known for the file's extension.
    NotCode,
    TooLarge { size: u64, limit: u64 },
}

/// Result of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Indexed { document_id: String, chunks: usize },
    Skipped(SkipReason),
}

/// Per-file half of the index-consistency pipeline.
pub struct FileIngestor {
    store: Arc<VersionedFileStore>,
    index: Arc<dyn SearchIndex>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    languages: Arc<LanguageTable>,
    policy: IngestPolicy,
}

impl FileIngestor {
    pub fn new(store: Arc<VersionedFileStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self {
            store,
            index,
            embedder: None,
            languages: Arc::new(LanguageTable::builtin()),
            policy: IngestPolicy::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_languages(mut self, languages: Arc<LanguageTable>) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_policy(mut self, policy: IngestPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<VersionedFileStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    pub fn policy(&self) -> &IngestPolicy {
        &self.policy
    }

    /// Skip decision that needs only the file name.
    pub fn classify(&self, file_name: &str) -> Option<SkipReason> {
        (!self.languages.is_code_file(file_name)).then_some(SkipReason::NotCode)
    }

    /// Skip decision for a known size.
    pub fn check_size(&self, size: u64) -> Option<SkipReason> {
        (size > self.policy.max_file_bytes).then_some(SkipReason::TooLarge {
            size,
            limit: self.policy.max_file_bytes,
        })
    }

    /// (Re-)index one file.
    pub async fn index_file(&self, repo: &RepositoryRef, path: &str) -> Result<IngestOutcome> {
        if let Some(reason) = self.classify(paths::file_name(path)) {
            debug!(repository = %repo.identifier, path, "skipping non-code file");
            return Ok(IngestOutcome::Skipped(reason));
        }

        let file = self.store.read_file(repo, path)?;
        if let Some(reason) = self.check_size(file.size) {
            debug!(repository = %repo.identifier, path, size = file.size, "skipping oversized file");
            return Ok(IngestOutcome::Skipped(reason));
        }

        let doc = self.build_document(repo, &file).await?;
        let replaced = self.index.replace_path(&doc).await?;

        info!(
            repository = %repo.identifier,
            path = %doc.file_path,
            chunks = doc.chunks.len(),
            replaced,
            embedded = doc.embedding.is_some(),
            "indexed file"
        );
        Ok(IngestOutcome::Indexed {
            document_id: doc.id,
            chunks: doc.chunks.len(),
        })
    }

    /// Remove the document(s) for one path. Returns how many were removed.
    pub async fn remove_file(&self, repository_id: &str, path: &str) -> Result<u64> {
        let path = paths::normalize_str(path)?;
        let removed = self.index.delete_by_path(repository_id, &path).await?;
        debug!(repository_id, path = %path, removed, "removed file from index");
        Ok(removed)
    }

    /// Remove every document under a folder.
    pub async fn remove_folder(&self, repository_id: &str, folder_path: &str) -> Result<u64> {
        let folder = paths::normalize_str(folder_path)?;
        let removed = self.index.delete_by_path_prefix(repository_id, &folder).await?;
        debug!(repository_id, folder = %folder, removed, "removed folder from index");
        Ok(removed)
    }

    /// Turn file content into a fresh document (new id, chunks, embeddings).
    pub async fn build_document(&self, repo: &RepositoryRef, file: &FileContent) -> Result<CodeDocument> {
        let content = file.text().into_owned();
        let mut chunks = chunk_code_with_metadata(&content, self.policy.max_tokens);

        let embedding = match &self.embedder {
            Some(provider) if !content.trim().is_empty() => {
                let embedding_err = |e: anyhow::Error| Error::Embedding {
                    path: file.path.clone(),
                    message: format!("{:#}", e),
                };
                let vector = embed_one(provider.as_ref(), &content)
                    .await
                    .map_err(embedding_err)?;
                if self.policy.embed_chunks {
                    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
                    let vectors = provider.embed(&texts).await.map_err(embedding_err)?;
                    if vectors.len() != chunks.len() {
                        return Err(Error::Embedding {
                            path: file.path.clone(),
                            message: format!(
                                "provider returned {} vectors for {} chunks",
                                vectors.len(),
                                chunks.len()
                            ),
                        });
                    }
                    for (chunk, v) in chunks.iter_mut().zip(vectors) {
                        chunk.embedding = Some(v);
                    }
                }
                Some(vector)
            }
            _ => None,
        };

        let now = Utc::now();
        Ok(CodeDocument {
            id: Uuid::new_v4().to_string(),
            repository_id: repo.id.clone(),
            repository_identifier: repo.identifier.clone(),
            file_path: file.path.clone(),
            file_name: file.name.clone(),
            extension: extension_of(&file.name),
            language: self.languages.detect_language(&file.name).to_string(),
            content,
            size: file.size,
            created_at: now,
            updated_at: now,
            chunks,
            embedding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GitConfig;
    use crate::resolver::PathResolver;
    use crate::vcs::GitCli;
    use async_trait::async_trait;
    use repovault_core::index::memory::InMemoryIndex;
    use tempfile::TempDir;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("provider unavailable")
        }
    }

    /// Drops the last vector of every batch.
    struct ShortEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            let keep = texts.len().saturating_sub(1).max(1);
            Ok(texts.iter().take(keep).map(|_| vec![0.5, 0.5]).collect())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        store: Arc<VersionedFileStore>,
        index: Arc<InMemoryIndex>,
        repo: RepositoryRef,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(VersionedFileStore::new(
            PathResolver::new(tmp.path()),
            Arc::new(GitCli::new(&GitConfig::default())),
        ));
        store.init_repository("demo").unwrap();
        Fixture {
            _tmp: tmp,
            store,
            index: Arc::new(InMemoryIndex::new()),
            repo: RepositoryRef::new("r1", "demo"),
        }
    }

    fn ingestor(f: &Fixture) -> FileIngestor {
        FileIngestor::new(f.store.clone(), f.index.clone())
    }

    #[tokio::test]
    async fn test_index_file_builds_document() {
        let f = fixture();
        f.store
            .add_file(&f.repo, "src/App.java", b"public class App {}\n", "")
            .unwrap();
        let outcome = ingestor(&f)
            .with_embedder(Some(Arc::new(FixedEmbedder)))
            .index_file(&f.repo, "src/App.java")
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Indexed { chunks: 1, .. }));

        let docs = f.index.documents_at("r1", "src/App.java");
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.language, "Java");
        assert_eq!(doc.extension.as_deref(), Some("java"));
        assert_eq!(doc.file_name, "App.java");
        assert_eq!(doc.repository_identifier, "demo");
        assert_eq!(doc.embedding, Some(vec![20.0, 1.0]));
        assert!(doc.chunks[0].embedding.is_none());
    }

    #[tokio::test]
    async fn test_reindex_keeps_one_document() {
        let f = fixture();
        let ing = ingestor(&f);
        f.store.add_file(&f.repo, "a.rs", b"fn one() {}", "").unwrap();
        ing.index_file(&f.repo, "a.rs").await.unwrap();
        f.store.update_file(&f.repo, "a.rs", b"fn two() {}", "").unwrap();
        ing.index_file(&f.repo, "a.rs").await.unwrap();

        let docs = f.index.documents_at("r1", "a.rs");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "fn two() {}");
    }

    #[tokio::test]
    async fn test_skips_are_not_errors() {
        let f = fixture();
        f.store.add_file(&f.repo, "notes.xyz", b"hello", "").unwrap();
        f.store.add_file(&f.repo, "big.py", &[b'x'; 64], "").unwrap();
        let ing = ingestor(&f).with_policy(IngestPolicy {
            max_file_bytes: 32,
            ..IngestPolicy::default()
        });

        assert_eq!(
            ing.index_file(&f.repo, "notes.xyz").await.unwrap(),
            IngestOutcome::Skipped(SkipReason::NotCode)
        );
        assert_eq!(
            ing.index_file(&f.repo, "big.py").await.unwrap(),
            IngestOutcome::Skipped(SkipReason::TooLarge { size: 64, limit: 32 })
        );
        assert!(f.index.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_wrapped() {
        let f = fixture();
        f.store.add_file(&f.repo, "a.rs", b"fn a() {}", "").unwrap();
        let err = ingestor(&f)
            .with_embedder(Some(Arc::new(FailingEmbedder)))
            .index_file(&f.repo, "a.rs")
            .await
            .unwrap_err();
        match err {
            Error::Embedding { path, message } => {
                assert_eq!(path, "a.rs");
                assert!(message.contains("provider unavailable"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(f.index.is_empty());
    }

    #[tokio::test]
    async fn test_chunk_embeddings_when_enabled() {
        let f = fixture();
        let content = "fn line() {}\n".repeat(10);
        f.store.add_file(&f.repo, "a.rs", content.as_bytes(), "").unwrap();
        ingestor(&f)
            .with_embedder(Some(Arc::new(FixedEmbedder)))
            .with_policy(IngestPolicy {
                max_tokens: 8,
                embed_chunks: true,
                ..IngestPolicy::default()
            })
            .index_file(&f.repo, "a.rs")
            .await
            .unwrap();
        let doc = &f.index.documents_at("r1", "a.rs")[0];
        assert!(doc.chunks.len() > 1);
        assert!(doc.chunks.iter().all(|c| c.embedding.is_some()));
    }

    #[tokio::test]
    async fn test_chunk_vector_count_mismatch_is_an_error() {
        let f = fixture();
        let content = "fn line() {}\n".repeat(10);
        f.store.add_file(&f.repo, "a.rs", content.as_bytes(), "").unwrap();
        let err = ingestor(&f)
            .with_embedder(Some(Arc::new(ShortEmbedder)))
            .with_policy(IngestPolicy {
                max_tokens: 8,
                embed_chunks: true,
                ..IngestPolicy::default()
            })
            .index_file(&f.repo, "a.rs")
            .await
            .unwrap_err();
        match err {
            Error::Embedding { path, message } => {
                assert_eq!(path, "a.rs");
                assert!(message.contains("vectors for"), "message: {}", message);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(f.index.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_index_of_one_path_keeps_one_document() {
        let f = fixture();
        f.store.add_file(&f.repo, "a.rs", b"fn a() {}", "").unwrap();
        let ing = ingestor(&f);
        let (first, second) = tokio::join!(
            ing.index_file(&f.repo, "a.rs"),
            ing.index_file(&f.repo, "a.rs")
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(f.index.documents_at("r1", "a.rs").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let f = fixture();
        let err = ingestor(&f).index_file(&f.repo, "gone.rs").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_file_and_folder_are_idempotent() {
        let f = fixture();
        let ing = ingestor(&f);
        f.store.add_file(&f.repo, "docs/guide.md", b"# Guide", "").unwrap();
        f.store.add_file(&f.repo, "src/a.rs", b"fn a() {}", "").unwrap();
        ing.index_file(&f.repo, "docs/guide.md").await.unwrap();
        ing.index_file(&f.repo, "src/a.rs").await.unwrap();

        assert_eq!(ing.remove_file("r1", "src/a.rs").await.unwrap(), 1);
        assert_eq!(ing.remove_file("r1", "src/a.rs").await.unwrap(), 0);
        assert_eq!(ing.remove_folder("r1", "docs").await.unwrap(), 1);
        assert_eq!(ing.remove_folder("r1", "docs").await.unwrap(), 0);
        assert!(f.index.is_empty());
    }
}
