//! # repovault CLI (`rv`)
//!
//! The `rv` binary drives the versioned file store and its search index.
//!
//! ## Usage
//!
//! ```bash
//! rv --config ./config/rv.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rv init` | Create the index database and apply the schema |
//! | `rv repo init <identifier>` | Create a working tree and `git init` it |
//! | `rv repo head --repo <id>` | Print the current commit id and commit count |
//! | `rv file add\|update\|delete\|cat` | File operations (one commit each) |
//! | `rv folder create\|delete` | Folder operations (one commit each) |
//! | `rv ls --repo <id> [path]` | List a directory |
//! | `rv index file\|remove-file\|remove-folder\|repo` | Drive the index directly |
//! | `rv search "<query>"` | Search the index |
//! | `rv stats` | Per-repository index statistics |
//! | `rv completions <shell>` | Print shell completions |
//!
//! Mutating commands apply their change event to the index before exiting
//! unless `--no-index` is given.
//!
//! ## Examples
//!
//! ```bash
//! rv repo init demo
//! rv file add --repo demo src/main/java/App.java --from ./App.java -m "Add app"
//! rv ls --repo demo src/main
//! rv search "App" --repo demo --highlight content
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use repovault::config::{self, Config};
use repovault::consumer::IndexEventHandler;
use repovault::embedding::create_provider;
use repovault::events::{self, EventPublisher, NullPublisher};
use repovault::file_store::VersionedFileStore;
use repovault::ingest::{FileIngestor, IngestOutcome, IngestPolicy, SkipReason};
use repovault::ingest_repo::RepositoryIngestor;
use repovault::migrate;
use repovault::progress::{IngestProgressReporter, NoProgress, ProgressMode};
use repovault::repovault_core::models::{Entry, RepositoryRef};
use repovault::search::{self, SearchArgs};
use repovault::sqlite_index::open_index;
use repovault::stats;
use repovault::vcs::CommitOutcome;

/// repovault: a git-backed file store with a code search index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "rv",
    about = "repovault: a git-backed versioned file store with a code search index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rv.toml")]
    config: PathBuf,

    /// Log filter (e.g. `info`, `repovault=debug`). Falls back to `RUST_LOG`, then `warn`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database schema. Idempotent.
    Init,

    /// Create and inspect repository working trees.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Add, update, delete or print a file.
    File {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Create or delete a folder.
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// List a directory of a repository.
    Ls {
        #[command(flatten)]
        repo: RepoArgs,

        /// Directory to list; the root when omitted.
        path: Option<String>,
    },

    /// Update the search index directly.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Search indexed code.
    Search {
        /// The search query string.
        query: String,

        /// Only documents of this repository id.
        #[arg(long)]
        repo_id: Option<String>,

        /// Only documents of this repository identifier.
        #[arg(long = "repo")]
        repository: Option<String>,

        /// Only documents in this language (e.g. `Java`).
        #[arg(long)]
        language: Option<String>,

        /// Only documents with this extension (e.g. `java`).
        #[arg(long)]
        extension: Option<String>,

        /// Glob over the repository-relative path (e.g. `src/**/*.rs`).
        #[arg(long)]
        path: Option<String>,

        /// 1-based page number.
        #[arg(long)]
        page: Option<usize>,

        /// Hits per page.
        #[arg(long)]
        size: Option<usize>,

        /// Field to highlight: `content`, `file_name` or `file_path`. Repeatable.
        #[arg(long)]
        highlight: Vec<String>,

        /// Print the result page as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics per repository.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Which repository a command works on.
#[derive(Args, Clone)]
struct RepoArgs {
    /// Repository identifier (its directory under `[repositories].root`).
    #[arg(long = "repo")]
    identifier: String,

    /// Repository id stored with indexed documents. Defaults to the identifier.
    #[arg(long)]
    repo_id: Option<String>,
}

impl RepoArgs {
    fn to_ref(&self) -> RepositoryRef {
        let id = self.repo_id.as_deref().unwrap_or(&self.identifier);
        RepositoryRef::new(id, self.identifier.as_str())
    }
}

/// Options shared by every mutating command.
#[derive(Args, Clone)]
struct MutationArgs {
    #[command(flatten)]
    repo: RepoArgs,

    /// Commit message. A default is generated when omitted.
    #[arg(short, long, default_value = "")]
    message: String,

    /// Do not update the search index.
    #[arg(long)]
    no_index: bool,
}

/// Where new file content comes from.
#[derive(Args, Clone)]
#[group(required = true, multiple = false)]
struct ContentArgs {
    /// Literal content.
    #[arg(long)]
    content: Option<String>,

    /// Read content from a local file.
    #[arg(long)]
    from: Option<PathBuf>,
}

impl ContentArgs {
    fn bytes(&self) -> Result<Vec<u8>> {
        match (&self.content, &self.from) {
            (Some(content), _) => Ok(content.clone().into_bytes()),
            (None, Some(path)) => {
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
            }
            (None, None) => bail!("one of --content or --from is required"),
        }
    }
}

#[derive(Subcommand)]
enum RepoAction {
    /// Create `<root>/<identifier>` and initialize git in it.
    Init { identifier: String },

    /// Print the current commit id and the number of commits.
    Head {
        #[command(flatten)]
        repo: RepoArgs,
    },
}

#[derive(Subcommand)]
enum FileAction {
    /// Add a new file. Fails if it already exists.
    Add {
        #[command(flatten)]
        args: MutationArgs,
        path: String,
        #[command(flatten)]
        content: ContentArgs,
    },
    /// Replace the content of an existing file.
    Update {
        #[command(flatten)]
        args: MutationArgs,
        path: String,
        #[command(flatten)]
        content: ContentArgs,
    },
    /// Delete a file.
    Delete {
        #[command(flatten)]
        args: MutationArgs,
        path: String,
    },
    /// Print a file's content to stdout.
    Cat {
        #[command(flatten)]
        repo: RepoArgs,
        path: String,
    },
}

#[derive(Subcommand)]
enum FolderAction {
    /// Create a folder (and its parents).
    Create {
        #[command(flatten)]
        args: MutationArgs,
        path: String,
    },
    /// Delete a folder and everything under it.
    Delete {
        #[command(flatten)]
        args: MutationArgs,
        path: String,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// (Re-)index one file.
    File {
        #[command(flatten)]
        repo: RepoArgs,
        path: String,
    },
    /// Remove the document of one path.
    RemoveFile {
        #[command(flatten)]
        repo: RepoArgs,
        path: String,
    },
    /// Remove every document under a folder.
    RemoveFolder {
        #[command(flatten)]
        repo: RepoArgs,
        path: String,
    },
    /// Rebuild the index for a whole repository.
    Repo {
        #[command(flatten)]
        repo: RepoArgs,

        /// Progress on stderr: `off`, `human` or `json`. Human when stderr is a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

fn init_tracing(level: Option<&str>) {
    let env_filter = match level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// File and repository ingestors over the configured index and embedder.
async fn ingestors(
    cfg: &Config,
    store: Arc<VersionedFileStore>,
    progress: Arc<dyn IngestProgressReporter>,
) -> Result<(Arc<FileIngestor>, Arc<RepositoryIngestor>)> {
    let index = open_index(cfg).await?;
    let embedder = create_provider(&cfg.embedding)?;
    let files = Arc::new(
        FileIngestor::new(store, index)
            .with_embedder(embedder)
            .with_languages(Arc::new(cfg.languages.table()))
            .with_policy(IngestPolicy::from_config(cfg)),
    );
    let repositories = Arc::new(
        RepositoryIngestor::new(files.clone())
            .with_batch_size(cfg.ingest.batch_size)
            .with_progress(progress),
    );
    Ok((files, repositories))
}

/// Run one store mutation, then apply the change events it published to
/// the index (unless `--no-index`).
async fn mutate<F>(cfg: &Config, args: &MutationArgs, op: F) -> Result<()>
where
    F: FnOnce(&VersionedFileStore, &RepositoryRef, &str) -> repovault::Result<CommitOutcome>,
{
    let repo = args.repo.to_ref();
    let (publisher, rx) = events::channel();
    let publisher: Arc<dyn EventPublisher> = if args.no_index {
        Arc::new(NullPublisher)
    } else {
        Arc::new(publisher)
    };

    let outcome = {
        let store = VersionedFileStore::from_config(cfg).with_publisher(publisher);
        op(&store, &repo, args.message.as_str())?
    };
    match outcome {
        CommitOutcome::Committed(id) => println!("committed {}", id),
        CommitOutcome::Clean => println!("nothing to commit"),
    }

    if !args.no_index {
        let store = Arc::new(VersionedFileStore::from_config(cfg));
        let (files, repositories) = ingestors(cfg, store, Arc::new(NoProgress)).await?;
        let stats = IndexEventHandler::new(files, repositories).run(rx).await;
        if stats.failed > 0 {
            warn!(failed = stats.failed, "index was not updated; run `rv index repo` to rebuild");
        }
    }
    Ok(())
}

fn print_listing(listing: &repovault::repovault_core::models::DirectoryContent) {
    for entry in &listing.entries {
        match entry {
            Entry::Directory { name, .. } => println!("{}/", name),
            Entry::File { name, size, .. } => println!("{:<40} {:>10}", name, size),
        }
    }
}

fn describe_skip(reason: &SkipReason) -> String {
    match reason {
        SkipReason::NotCode => "not a code file".to_string(),
        SkipReason::TooLarge { size, limit } => {
            format!("too large ({} bytes, limit {})", size, limit)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "rv", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Index database initialized successfully.");
        }
        Commands::Repo { action } => {
            let store = VersionedFileStore::from_config(&cfg);
            match action {
                RepoAction::Init { identifier } => {
                    let root = store.init_repository(&identifier)?;
                    println!("Initialized repository {} at {}", identifier, root.display());
                }
                RepoAction::Head { repo } => {
                    let repo = repo.to_ref();
                    let head = store.head(&repo)?;
                    let count = store.commit_count(&repo)?;
                    println!("{} ({} commits)", head.as_deref().unwrap_or("(no commits)"), count);
                }
            }
        }
        Commands::File { action } => match action {
            FileAction::Add {
                args,
                path,
                content,
            } => {
                let bytes = content.bytes()?;
                mutate(&cfg, &args, |store, repo, msg| {
                    store.add_file(repo, &path, &bytes, msg)
                })
                .await?;
            }
            FileAction::Update {
                args,
                path,
                content,
            } => {
                let bytes = content.bytes()?;
                mutate(&cfg, &args, |store, repo, msg| {
                    store.update_file(repo, &path, &bytes, msg)
                })
                .await?;
            }
            FileAction::Delete { args, path } => {
                mutate(&cfg, &args, |store, repo, msg| {
                    store.delete_file(repo, &path, msg)
                })
                .await?;
            }
            FileAction::Cat { repo, path } => {
                let store = VersionedFileStore::from_config(&cfg);
                let file = store.read_file(&repo.to_ref(), &path)?;
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&file.content)?;
                stdout.flush()?;
            }
        },
        Commands::Folder { action } => match action {
            FolderAction::Create { args, path } => {
                mutate(&cfg, &args, |store, repo, msg| {
                    store.create_folder(repo, &path, msg)
                })
                .await?;
            }
            FolderAction::Delete { args, path } => {
                mutate(&cfg, &args, |store, repo, msg| {
                    store.delete_folder(repo, &path, msg)
                })
                .await?;
            }
        },
        Commands::Ls { repo, path } => {
            let store = VersionedFileStore::from_config(&cfg);
            let listing = store.list_directory(&repo.to_ref(), path.as_deref())?;
            print_listing(&listing);
        }
        Commands::Index { action } => {
            let store = Arc::new(VersionedFileStore::from_config(&cfg));
            let progress: Arc<dyn IngestProgressReporter> = match &action {
                IndexAction::Repo { progress, .. } => progress
                    .unwrap_or_else(ProgressMode::default_for_tty)
                    .reporter(),
                _ => Arc::new(NoProgress),
            };
            let (files, repositories) = ingestors(&cfg, store, progress).await?;
            match action {
                IndexAction::File { repo, path } => {
                    match files.index_file(&repo.to_ref(), &path).await? {
                        IngestOutcome::Indexed {
                            document_id,
                            chunks,
                        } => println!("indexed {} ({} chunks, id {})", path, chunks, document_id),
                        IngestOutcome::Skipped(reason) => {
                            println!("skipped {}: {}", path, describe_skip(&reason))
                        }
                    }
                }
                IndexAction::RemoveFile { repo, path } => {
                    let removed = files.remove_file(&repo.to_ref().id, &path).await?;
                    println!("removed {} document(s)", removed);
                }
                IndexAction::RemoveFolder { repo, path } => {
                    let removed = files.remove_folder(&repo.to_ref().id, &path).await?;
                    println!("removed {} document(s)", removed);
                }
                IndexAction::Repo { repo, .. } => {
                    let report = repositories.ingest_repository(&repo.to_ref()).await?;
                    println!(
                        "indexed {} of {} files ({} not code, {} too large, {} failed)",
                        report.indexed,
                        report.files_seen,
                        report.skipped_not_code,
                        report.skipped_too_large,
                        report.failed_files + report.failed_directories + report.bulk_failed
                    );
                }
            }
        }
        Commands::Search {
            query,
            repo_id,
            repository,
            language,
            extension,
            path,
            page,
            size,
            highlight,
            json,
        } => {
            let args = SearchArgs {
                repository_id: repo_id,
                repository,
                language,
                extension,
                path,
                page,
                size,
                highlight,
            };
            search::run_search(&cfg, &query, args, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
