//! SQLite-backed [`SearchIndex`] implementation.
//!
//! Documents live in `code_documents`, their chunks in `code_chunks`, and an
//! FTS5 table (`code_documents_fts`) mirrors path, name and content for
//! keyword search ranked by `bm25`. Every write for one document runs in a
//! transaction; bulk writes use one savepoint per document so a failing
//! item is rolled back and counted without losing the rest of the batch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Acquire, Row, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use repovault_core::embedding::{blob_to_vec, vec_to_blob};
use repovault_core::index::memory::InMemoryIndex;
use repovault_core::index::{folder_prefix, BulkReport, RepositoryStats, SearchIndex};
use repovault_core::models::{CodeChunk, CodeDocument};
use repovault_core::search::{
    build_hit, compile_path_pattern, matches_filters, paginate, SearchPage, SearchQuery,
};
use repovault_core::{Error, Result};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of [`SearchIndex`].
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the configured database, applying the schema first.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Fresh in-memory database with the schema applied.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = db::connect_memory().await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All documents stored for `(repository_id, path)`, chunks included.
    pub async fn documents_at(&self, repository_id: &str, path: &str) -> Result<Vec<CodeDocument>> {
        let rows = sqlx::query(
            "SELECT * FROM code_documents WHERE repository_id = ? AND file_path = ? ORDER BY id",
        )
        .bind(repository_id)
        .bind(path)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::index)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut doc = row_to_document(row).map_err(Error::index)?;
            doc.chunks = self.load_chunks(&doc.id).await.map_err(Error::index)?;
            docs.push(doc);
        }
        Ok(docs)
    }

    async fn load_chunks(&self, document_id: &str) -> sqlx::Result<Vec<CodeChunk>> {
        let rows = sqlx::query(
            "SELECT chunk_index, content, start_line, end_line, embedding FROM code_chunks WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
                Ok(CodeChunk {
                    index: row.try_get::<i64, _>("chunk_index")? as usize,
                    content: row.try_get("content")?,
                    start_line: row.try_get::<i64, _>("start_line")? as usize,
                    end_line: row.try_get::<i64, _>("end_line")? as usize,
                    embedding: embedding.map(|b| blob_to_vec(&b)),
                })
            })
            .collect()
    }

    async fn delete_where(&self, where_clause: &str, binds: &[&str]) -> sqlx::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = delete_matching(&mut tx, where_clause, binds).await?;
        tx.commit().await?;
        Ok(removed)
    }
}

/// Delete every document matching `where_clause` along with its chunks
/// and FTS rows. `binds` fill the clause's placeholders in order.
async fn delete_matching(
    conn: &mut SqliteConnection,
    where_clause: &str,
    binds: &[&str],
) -> sqlx::Result<u64> {
    let ids_sql = format!("SELECT id FROM code_documents WHERE {}", where_clause);
    for table in ["code_chunks", "code_documents_fts"] {
        let sql = format!("DELETE FROM {} WHERE document_id IN ({})", table, ids_sql);
        let mut q = sqlx::query(&sql);
        for b in binds {
            q = q.bind(*b);
        }
        q.execute(&mut *conn).await?;
    }

    let sql = format!("DELETE FROM code_documents WHERE {}", where_clause);
    let mut q = sqlx::query(&sql);
    for b in binds {
        q = q.bind(*b);
    }
    Ok(q.execute(&mut *conn).await?.rows_affected())
}

/// Replace the stored rows for `doc.id` with `doc`.
async fn write_document(conn: &mut SqliteConnection, doc: &CodeDocument) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM code_chunks WHERE document_id = ?")
        .bind(&doc.id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM code_documents_fts WHERE document_id = ?")
        .bind(&doc.id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM code_documents WHERE id = ?")
        .bind(&doc.id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO code_documents (id, repository_id, repository_identifier, file_path,
                                    file_name, extension, language, content, size,
                                    created_at, updated_at, embedding)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.repository_id)
    .bind(&doc.repository_identifier)
    .bind(&doc.file_path)
    .bind(&doc.file_name)
    .bind(&doc.extension)
    .bind(&doc.language)
    .bind(&doc.content)
    .bind(doc.size as i64)
    .bind(doc.created_at.timestamp_millis())
    .bind(doc.updated_at.timestamp_millis())
    .bind(doc.embedding.as_deref().map(vec_to_blob))
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO code_documents_fts (document_id, file_path, file_name, content) VALUES (?, ?, ?, ?)",
    )
    .bind(&doc.id)
    .bind(&doc.file_path)
    .bind(&doc.file_name)
    .bind(&doc.content)
    .execute(&mut *conn)
    .await?;

    for chunk in &doc.chunks {
        sqlx::query(
            "INSERT INTO code_chunks (document_id, chunk_index, content, start_line, end_line, embedding) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(chunk.index as i64)
        .bind(&chunk.content)
        .bind(chunk.start_line as i64)
        .bind(chunk.end_line as i64)
        .bind(chunk.embedding.as_deref().map(vec_to_blob))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Map a `code_documents` row. Chunks are loaded separately.
fn row_to_document(row: &SqliteRow) -> sqlx::Result<CodeDocument> {
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    Ok(CodeDocument {
        id: row.try_get("id")?,
        repository_id: row.try_get("repository_id")?,
        repository_identifier: row.try_get("repository_identifier")?,
        file_path: row.try_get("file_path")?,
        file_name: row.try_get("file_name")?,
        extension: row.try_get("extension")?,
        language: row.try_get("language")?,
        content: row.try_get("content")?,
        size: row.try_get::<i64, _>("size")? as u64,
        created_at: millis_to_datetime(row.try_get("created_at")?),
        updated_at: millis_to_datetime(row.try_get("updated_at")?),
        chunks: Vec::new(),
        embedding: embedding.map(|b| blob_to_vec(&b)),
    })
}

/// Turn query terms into an FTS5 expression: any term may match.
fn fts_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[async_trait]
impl SearchIndex for SqliteIndex {
    async fn upsert(&self, document: &CodeDocument) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::index)?;
        write_document(&mut tx, document)
            .await
            .map_err(Error::index)?;
        tx.commit().await.map_err(Error::index)?;
        Ok(())
    }

    async fn bulk_upsert(&self, documents: &[CodeDocument]) -> Result<BulkReport> {
        let mut report = BulkReport::default();
        if documents.is_empty() {
            return Ok(report);
        }

        let mut tx = self.pool.begin().await.map_err(Error::index)?;
        for doc in documents {
            let mut savepoint = (&mut tx).begin().await.map_err(Error::index)?;
            match write_document(&mut savepoint, doc).await {
                Ok(()) => {
                    savepoint.commit().await.map_err(Error::index)?;
                    report.written += 1;
                }
                Err(e) => {
                    debug!(path = %doc.file_path, error = %e, "bulk item failed");
                    savepoint.rollback().await.map_err(Error::index)?;
                    report.failed += 1;
                }
            }
        }
        tx.commit().await.map_err(Error::index)?;

        if report.failed > 0 {
            warn!(
                written = report.written,
                failed = report.failed,
                "bulk upsert finished with failures"
            );
        }
        Ok(report)
    }

    async fn replace_path(&self, document: &CodeDocument) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::index)?;
        let removed = delete_matching(
            &mut tx,
            "repository_id = ? AND file_path = ?",
            &[document.repository_id.as_str(), document.file_path.as_str()],
        )
        .await
        .map_err(Error::index)?;
        write_document(&mut tx, document)
            .await
            .map_err(Error::index)?;
        tx.commit().await.map_err(Error::index)?;
        Ok(removed)
    }

    async fn delete_by_path(&self, repository_id: &str, path: &str) -> Result<u64> {
        self.delete_where("repository_id = ? AND file_path = ?", &[repository_id, path])
            .await
            .map_err(Error::index)
    }

    async fn delete_by_path_prefix(&self, repository_id: &str, folder_path: &str) -> Result<u64> {
        let prefix = folder_prefix(folder_path);
        self.delete_where(
            "repository_id = ? AND substr(file_path, 1, length(?)) = ?",
            &[repository_id, prefix.as_str(), prefix.as_str()],
        )
        .await
        .map_err(Error::index)
    }

    async fn delete_by_repository(&self, repository_identifier: &str) -> Result<u64> {
        self.delete_where("repository_identifier = ?", &[repository_identifier])
            .await
            .map_err(Error::index)
    }

    async fn refresh(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::index)?;
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        let glob = compile_path_pattern(query.path_pattern.as_deref())?;
        let terms = query.terms();

        let rows = if terms.is_empty() {
            sqlx::query(
                r#"
                SELECT d.*, 0.0 AS score
                FROM code_documents d
                WHERE (? IS NULL OR d.repository_id = ?)
                  AND (? IS NULL OR d.repository_identifier = ?)
                ORDER BY d.file_path
                "#,
            )
            .bind(&query.repository_id)
            .bind(&query.repository_id)
            .bind(&query.repository_identifier)
            .bind(&query.repository_identifier)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT d.*, -bm25(code_documents_fts) AS score
                FROM code_documents_fts
                JOIN code_documents d ON d.id = code_documents_fts.document_id
                WHERE code_documents_fts MATCH ?
                  AND (? IS NULL OR d.repository_id = ?)
                  AND (? IS NULL OR d.repository_identifier = ?)
                ORDER BY score DESC, d.file_path
                "#,
            )
            .bind(fts_expression(&terms))
            .bind(&query.repository_id)
            .bind(&query.repository_id)
            .bind(&query.repository_identifier)
            .bind(&query.repository_identifier)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(Error::index)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let doc = row_to_document(row).map_err(Error::index)?;
            if matches_filters(query, glob.as_ref(), &doc) {
                let score: f64 = row.try_get("score").map_err(Error::index)?;
                candidates.push((score, doc));
            }
        }

        let total = candidates.len();
        let mut hits = Vec::new();
        for (score, mut doc) in paginate(candidates, query.page, query.size) {
            doc.chunks = self.load_chunks(&doc.id).await.map_err(Error::index)?;
            hits.push(build_hit(&doc, score, query, &terms));
        }

        Ok(SearchPage {
            total,
            page: query.page.max(1),
            size: query.size.max(1),
            hits,
        })
    }

    async fn stats(&self) -> Result<Vec<RepositoryStats>> {
        let rows = sqlx::query(
            r#"
            SELECT d.repository_id, d.repository_identifier,
                   COUNT(*) AS documents,
                   SUM((SELECT COUNT(*) FROM code_chunks c WHERE c.document_id = d.id)) AS chunks,
                   SUM(CASE WHEN d.embedding IS NOT NULL THEN 1 ELSE 0 END) AS embedded
            FROM code_documents d
            GROUP BY d.repository_id, d.repository_identifier
            ORDER BY d.repository_identifier, d.repository_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::index)?;

        rows.iter()
            .map(|row| {
                Ok(RepositoryStats {
                    repository_id: row.try_get("repository_id")?,
                    repository_identifier: row.try_get("repository_identifier")?,
                    documents: row.try_get::<i64, _>("documents")? as u64,
                    chunks: row.try_get::<i64, _>("chunks")? as u64,
                    embedded: row.try_get::<i64, _>("embedded")? as u64,
                })
            })
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(Error::index)
    }
}

/// Build the index backend selected by `[index].backend`.
pub async fn open_index(config: &Config) -> anyhow::Result<Arc<dyn SearchIndex>> {
    match config.index.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryIndex::new())),
        _ => Ok(Arc::new(SqliteIndex::open(config).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repovault_core::chunk::chunk_code_with_metadata;
    use repovault_core::search::HighlightField;

    fn doc(id: &str, path: &str, content: &str) -> CodeDocument {
        CodeDocument {
            id: id.into(),
            repository_id: "r1".into(),
            repository_identifier: "demo".into(),
            file_path: path.into(),
            file_name: repovault_core::paths::file_name(path).into(),
            extension: repovault_core::language::extension_of(path),
            language: "Java".into(),
            content: content.into(),
            size: content.len() as u64,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            chunks: chunk_code_with_metadata(content, 512),
            embedding: None,
        }
    }

    async fn index() -> SqliteIndex {
        SqliteIndex::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let idx = index().await;
        idx.upsert(&doc("a", "src/App.java", "class App {}")).await.unwrap();
        idx.upsert(&doc("a", "src/App.java", "class App { int x; }"))
            .await
            .unwrap();
        let docs = idx.documents_at("r1", "src/App.java").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "class App { int x; }");
        assert_eq!(docs[0].chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_roundtrip() {
        let idx = index().await;
        let mut d = doc("a", "A.java", "x");
        d.embedding = Some(vec![0.5, -1.0]);
        idx.upsert(&d).await.unwrap();
        let stored = idx.documents_at("r1", "A.java").await.unwrap();
        assert_eq!(stored[0].embedding, Some(vec![0.5, -1.0]));
    }

    #[tokio::test]
    async fn test_bulk_upsert_counts() {
        let idx = index().await;
        let docs = vec![doc("1", "a.java", "a"), doc("2", "b.java", "b")];
        let report = idx.bulk_upsert(&docs).await.unwrap();
        assert_eq!(report, BulkReport { written: 2, failed: 0 });
        assert_eq!(idx.bulk_upsert(&[]).await.unwrap(), BulkReport::default());
    }

    #[tokio::test]
    async fn test_bulk_upsert_isolates_failing_item() {
        let idx = index().await;
        let mut bad = doc("2", "b.java", "b");
        // Duplicate chunk index violates the chunk primary key.
        bad.chunks.push(bad.chunks[0].clone());
        let docs = vec![doc("1", "a.java", "a"), bad, doc("3", "c.java", "c")];
        let report = idx.bulk_upsert(&docs).await.unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.failed, 1);
        assert!(idx.documents_at("r1", "b.java").await.unwrap().is_empty());
        assert_eq!(idx.documents_at("r1", "c.java").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_path_is_atomic() {
        let idx = index().await;
        idx.bulk_upsert(&[doc("1", "App.java", "one"), doc("2", "App.java", "two")])
            .await
            .unwrap();
        assert_eq!(idx.replace_path(&doc("3", "App.java", "three")).await.unwrap(), 2);
        let docs = idx.documents_at("r1", "App.java").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "3");

        // A write that fails leaves the previous document in place.
        let mut bad = doc("4", "App.java", "four");
        bad.chunks.push(bad.chunks[0].clone());
        assert!(idx.replace_path(&bad).await.is_err());
        let docs = idx.documents_at("r1", "App.java").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "three");
    }

    #[tokio::test]
    async fn test_delete_by_path_and_prefix() {
        let idx = index().await;
        idx.bulk_upsert(&[
            doc("1", "docs/guide.md", "guide"),
            doc("2", "docs/api/ref.md", "ref"),
            doc("3", "docs-old/x.md", "old"),
            doc("4", "src/App.java", "app"),
        ])
        .await
        .unwrap();

        assert_eq!(idx.delete_by_path("r1", "src/App.java").await.unwrap(), 1);
        assert_eq!(idx.delete_by_path("r1", "src/App.java").await.unwrap(), 0);
        assert_eq!(idx.delete_by_path_prefix("r1", "docs/").await.unwrap(), 2);

        let mut q = SearchQuery::new("");
        q.path_pattern = Some("docs/**".into());
        assert_eq!(idx.search(&q).await.unwrap().total, 0);
        assert_eq!(idx.documents_at("r1", "docs-old/x.md").await.unwrap().len(), 1);

        let orphans: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM code_chunks WHERE document_id NOT IN (SELECT id FROM code_documents)",
        )
        .fetch_one(idx.pool())
        .await
        .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn test_delete_by_repository() {
        let idx = index().await;
        idx.upsert(&doc("1", "a.java", "a")).await.unwrap();
        assert_eq!(idx.delete_by_repository("demo").await.unwrap(), 1);
        assert_eq!(idx.delete_by_repository("demo").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_ranks_and_highlights() {
        let idx = index().await;
        idx.bulk_upsert(&[
            doc("1", "src/Deploy.java", "class Deploy {\n  void deploy() { deploy(); }\n}\n"),
            doc("2", "src/Other.java", "class Other {\n  // deploy later\n}\n"),
            doc("3", "src/None.java", "class None {}\n"),
        ])
        .await
        .unwrap();
        idx.refresh().await.unwrap();

        let mut q = SearchQuery::new("deploy");
        q.highlight_fields = vec![HighlightField::Content];
        let page = idx.search(&q).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.hits[0].file_path, "src/Deploy.java");
        assert!(page.hits[0].score >= page.hits[1].score);
        assert!(page.hits[0].highlights["content"][0].contains("<em>"));
        assert_eq!(page.hits[0].matched_chunks.len(), 1);

        q.language = Some("rust".into());
        assert_eq!(idx.search(&q).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let idx = index().await;
        let mut d = doc("1", "a.java", "a");
        d.embedding = Some(vec![1.0]);
        idx.bulk_upsert(&[d, doc("2", "b.java", "b")]).await.unwrap();
        let stats = idx.stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].documents, 2);
        assert_eq!(stats[0].chunks, 2);
        assert_eq!(stats[0].embedded, 1);
    }
}
