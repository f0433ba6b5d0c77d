//! Configuration parsing and validation.
//!
//! repovault is configured with a single TOML file (default `./config/rv.toml`).
//! Only `[db]` and `[repositories]` are required; every other section falls
//! back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/rv.sqlite"
//!
//! [repositories]
//! root = "./repos"
//!
//! [git]
//! author_name = "repovault"
//! author_email = "repovault@localhost"
//!
//! [chunking]
//! max_tokens = 512
//!
//! [ingest]
//! max_file_bytes = 10485760
//! batch_size = 100
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use repovault_core::chunk::DEFAULT_MAX_TOKENS;
use repovault_core::language::LanguageTable;

/// Root configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub repositories: RepositoriesConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub languages: LanguagesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where working trees live: `<root>/<identifier>`.
#[derive(Debug, Deserialize, Clone)]
pub struct RepositoriesConfig {
    pub root: PathBuf,
}

/// Identity and binary used for commits.
#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    #[serde(default = "default_git_binary")]
    pub binary: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
            binary: default_git_binary(),
        }
    }
}

fn default_author_name() -> String {
    "repovault".to_string()
}
fn default_author_email() -> String {
    "repovault@localhost".to_string()
}
fn default_git_binary() -> String {
    "git".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

/// Ingestion limits.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Documents per bulk write during repository ingestion.
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
    /// Also embed every chunk, not just the whole file.
    #[serde(default)]
    pub embed_chunks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            batch_size: default_ingest_batch_size(),
            embed_chunks: false,
        }
    }
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_ingest_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `sqlite` or `memory`.
    #[serde(default = "default_index_backend")]
    pub backend: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
        }
    }
}

fn default_index_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Extra extension → language mappings on top of the built-in table.
///
/// ```toml
/// [languages.extensions]
/// jsx = "JavaScript"
/// tf = "Terraform"
/// ```
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LanguagesConfig {
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

impl LanguagesConfig {
    /// The built-in table extended with the configured mappings.
    pub fn table(&self) -> LanguageTable {
        self.extensions
            .iter()
            .fold(LanguageTable::builtin(), |table, (ext, language)| {
                table.with_extension(ext, language)
            })
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Build a config rooted at `base` with every optional section defaulted.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            db: DbConfig {
                path: base.join("data").join("rv.sqlite"),
            },
            repositories: RepositoriesConfig {
                root: base.join("repos"),
            },
            git: GitConfig::default(),
            chunking: ChunkingConfig::default(),
            ingest: IngestConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            languages: LanguagesConfig::default(),
        }
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.max_file_bytes == 0 {
        anyhow::bail!("ingest.max_file_bytes must be > 0");
    }

    match config.index.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown index backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}
