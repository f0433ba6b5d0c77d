use std::sync::Arc;

use repovault::config::GitConfig;
use repovault::consumer::{EventStats, IndexEventHandler};
use repovault::events::{self, ChangeEvent, EventPublisher};
use repovault::file_store::VersionedFileStore;
use repovault::ingest::{FileIngestor, IngestOutcome};
use repovault::ingest_repo::RepositoryIngestor;
use repovault::repovault_core::index::SearchIndex;
use repovault::repovault_core::models::RepositoryRef;
use repovault::repovault_core::search::{HighlightField, SearchQuery};
use repovault::resolver::PathResolver;
use repovault::sqlite_index::SqliteIndex;
use repovault::vcs::GitCli;
use tempfile::TempDir;

struct Pipeline {
    _tmp: TempDir,
    store: Arc<VersionedFileStore>,
    index: Arc<SqliteIndex>,
    files: Arc<FileIngestor>,
    repositories: Arc<RepositoryIngestor>,
    repo: RepositoryRef,
}

async fn pipeline() -> Pipeline {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(VersionedFileStore::new(
        PathResolver::new(tmp.path()),
        Arc::new(GitCli::new(&GitConfig::default())),
    ));
    store.init_repository("demo").unwrap();
    let index = Arc::new(SqliteIndex::open_in_memory().await.unwrap());
    let files = Arc::new(FileIngestor::new(store.clone(), index.clone()));
    let repositories = Arc::new(RepositoryIngestor::new(files.clone()));
    Pipeline {
        _tmp: tmp,
        store,
        index,
        files,
        repositories,
        repo: RepositoryRef::new("42", "demo"),
    }
}

fn under(prefix: &str) -> SearchQuery {
    let mut query = SearchQuery::new("");
    query.repository_id = Some("42".into());
    query.path_pattern = Some(format!("{}/**", prefix));
    query
}

#[tokio::test]
async fn test_oversized_java_file_is_not_indexed() {
    let p = pipeline().await;
    let big = vec![b'a'; 15 * 1024 * 1024];
    let small = format!("class Small {{ /* {} */ }}", "x".repeat(70));
    assert!(small.len() <= 100);
    p.store.add_file(&p.repo, "Big.java", &big, "").unwrap();
    p.store.add_file(&p.repo, "Small.java", small.as_bytes(), "").unwrap();

    let report = p.repositories.ingest_repository(&p.repo).await.unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped_too_large, 1);

    assert_eq!(p.index.documents_at("42", "Small.java").await.unwrap().len(), 1);
    assert!(p.index.documents_at("42", "Big.java").await.unwrap().is_empty());

    let outcome = p.files.index_file(&p.repo, "Big.java").await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Skipped(_)));
}

#[tokio::test]
async fn test_deleting_docs_folder_clears_its_documents() {
    let p = pipeline().await;
    let (publisher, rx) = events::channel();
    let store = VersionedFileStore::new(
        PathResolver::new(p.store.resolver().base()),
        Arc::new(GitCli::new(&GitConfig::default())),
    )
    .with_publisher(Arc::new(publisher));

    store.add_file(&p.repo, "docs/guide.md", b"# Guide\n", "").unwrap();
    store.add_file(&p.repo, "docs/api/ref.md", b"# Ref\n", "").unwrap();
    store.add_file(&p.repo, "src/lib.rs", b"pub fn guide() {}\n", "").unwrap();
    store.delete_folder(&p.repo, "docs", "").unwrap();
    drop(store);

    // The two docs files are gone by the time their create events are
    // applied, so those events fail with NotFound and index nothing.
    let handler = IndexEventHandler::new(p.files.clone(), p.repositories.clone());
    let stats = handler.run(rx).await;
    assert_eq!(stats, EventStats { handled: 2, failed: 2 });

    let page = p.index.search(&under("docs")).await.unwrap();
    assert_eq!(page.total, 0);
    let page = p.index.search(&under("src")).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_reingesting_a_path_keeps_the_latest_content() {
    let p = pipeline().await;
    p.store.add_file(&p.repo, "app.py", b"print('first')\n", "").unwrap();
    p.files.index_file(&p.repo, "app.py").await.unwrap();
    p.store.update_file(&p.repo, "app.py", b"print('second')\n", "").unwrap();
    p.files.index_file(&p.repo, "app.py").await.unwrap();

    let docs = p.index.documents_at("42", "app.py").await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].content, "print('second')\n");
    assert_eq!(docs[0].language, "Python");

    let removed = p.files.remove_file("42", "app.py").await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(p.files.remove_file("42", "app.py").await.unwrap(), 0);
    assert!(p.index.documents_at("42", "app.py").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_ingest_of_one_path_keeps_one_document() {
    let p = pipeline().await;
    p.store.add_file(&p.repo, "a.rs", b"fn a() {}\n", "").unwrap();

    let (first, second) = tokio::join!(
        p.files.index_file(&p.repo, "a.rs"),
        p.files.index_file(&p.repo, "a.rs")
    );
    assert!(matches!(first.unwrap(), IngestOutcome::Indexed { .. }));
    assert!(matches!(second.unwrap(), IngestOutcome::Indexed { .. }));
    assert_eq!(p.index.documents_at("42", "a.rs").await.unwrap().len(), 1);

    let page = p.index.search(&SearchQuery::new("a")).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_clone_event_rebuilds_and_search_finds_code() {
    let p = pipeline().await;
    p.store
        .add_file(
            &p.repo,
            "src/main/java/App.java",
            b"public class App {\n    void greet() {}\n}\n",
            "",
        )
        .unwrap();
    p.store
        .add_file(&p.repo, "src/main/java/Util.java", b"class Util {}\n", "")
        .unwrap();
    p.store.add_file(&p.repo, "LICENSE", b"MIT", "").unwrap();

    let (publisher, rx) = events::channel();
    publisher.publish(ChangeEvent::RepositoryCloned {
        id: "42".into(),
        identifier: "demo".into(),
    });
    drop(publisher);
    let handler = IndexEventHandler::new(p.files.clone(), p.repositories.clone());
    assert_eq!(handler.run(rx).await.failed, 0);

    let mut query = SearchQuery::new("greet");
    query.repository_identifier = Some("demo".into());
    query.language = Some("Java".into());
    query.highlight_fields = vec![HighlightField::Content];
    let page = p.index.search(&query).await.unwrap();
    assert_eq!(page.total, 1);
    let hit = &page.hits[0];
    assert_eq!(hit.file_path, "src/main/java/App.java");
    assert!(hit.highlights["content"][0].contains("<em>greet</em>"));
    assert!(!hit.matched_chunks.is_empty());

    let stats = p.index.stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].documents, 2);
}
