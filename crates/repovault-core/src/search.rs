//! Search query shape and backend-independent result shaping.
//!
//! Index backends own candidate retrieval and scoring. This module supplies
//! what every backend shares: the [`SearchQuery`] request type, filter
//! matching (including the path glob), highlight fragments, matched chunk
//! excerpts, and pagination.
//!
//! Highlighting wraps each query-term occurrence in `<em>…</em>`. Matching
//! is ASCII case-insensitive so byte offsets in the original text stay
//! valid.

use std::collections::BTreeMap;

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{CodeChunk, CodeDocument};

/// Default page size.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Maximum number of highlighted fragments per field.
pub const MAX_FRAGMENTS: usize = 3;

/// Maximum number of matched chunk excerpts per hit.
pub const MAX_MATCHED_CHUNKS: usize = 3;

/// Fields that can be highlighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightField {
    Content,
    FilePath,
    FileName,
}

impl HighlightField {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightField::Content => "content",
            HighlightField::FilePath => "file_path",
            HighlightField::FileName => "file_name",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "content" => Some(HighlightField::Content),
            "file_path" | "path" => Some(HighlightField::FilePath),
            "file_name" | "name" => Some(HighlightField::FileName),
            _ => None,
        }
    }
}

/// A free-text query with optional filters and pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub repository_identifier: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    /// Glob over the repository-relative path, e.g. `src/**/*.java`.
    #[serde(default)]
    pub path_pattern: Option<String>,
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default)]
    pub highlight_fields: Vec<HighlightField>,
}

fn default_page() -> usize {
    1
}

fn default_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            repository_id: None,
            repository_identifier: None,
            language: None,
            extension: None,
            path_pattern: None,
            page: default_page(),
            size: default_size(),
            highlight_fields: Vec::new(),
        }
    }

    /// Lowercased, de-duplicated query terms.
    pub fn terms(&self) -> Vec<String> {
        query_terms(&self.text)
    }
}

/// Excerpt of a chunk that matched the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkExcerpt {
    pub index: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub repository_id: String,
    pub repository_identifier: String,
    pub file_path: String,
    pub file_name: String,
    pub language: String,
    pub extension: Option<String>,
    pub score: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub highlights: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_chunks: Vec<ChunkExcerpt>,
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub total: usize,
    pub page: usize,
    pub size: usize,
    pub hits: Vec<SearchHit>,
}

/// Split query text into lowercased alphanumeric terms.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if raw.is_empty() {
            continue;
        }
        let term = raw.to_ascii_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Number of case-insensitive occurrences of all `terms` in `text`.
pub fn term_frequency(text: &str, terms: &[String]) -> usize {
    let lower = text.to_ascii_lowercase();
    terms.iter().map(|t| lower.matches(t.as_str()).count()).sum()
}

/// Compile an optional path glob.
pub fn compile_path_pattern(pattern: Option<&str>) -> Result<Option<GlobMatcher>> {
    match pattern {
        None => Ok(None),
        Some(p) if p.trim().is_empty() => Ok(None),
        Some(p) => Glob::new(p)
            .map(|g| Some(g.compile_matcher()))
            .map_err(|e| Error::InvalidPath(format!("invalid path pattern {:?}: {}", p, e))),
    }
}

/// True when `doc` satisfies every filter set on `query`.
pub fn matches_filters(query: &SearchQuery, glob: Option<&GlobMatcher>, doc: &CodeDocument) -> bool {
    let eq = |filter: &Option<String>, value: &str| filter.as_deref().map_or(true, |f| f == value);
    let ext_ok = match (&query.extension, &doc.extension) {
        (None, _) => true,
        (Some(want), Some(have)) => want.trim_start_matches('.').eq_ignore_ascii_case(have),
        (Some(_), None) => false,
    };
    eq(&query.repository_id, &doc.repository_id)
        && eq(&query.repository_identifier, &doc.repository_identifier)
        && query
            .language
            .as_deref()
            .map_or(true, |l| l.eq_ignore_ascii_case(&doc.language))
        && ext_ok
        && glob.map_or(true, |g| g.is_match(&doc.file_path))
}

/// Wrap every occurrence of `terms` in `<em>` markers.
pub fn highlight_text(text: &str, terms: &[String]) -> String {
    let lower = text.to_ascii_lowercase();
    let mut marks: Vec<(usize, usize)> = Vec::new();
    for term in terms.iter().filter(|t| !t.is_empty()) {
        for (start, _) in lower.match_indices(term.as_str()) {
            marks.push((start, start + term.len()));
        }
    }
    if marks.is_empty() {
        return text.to_string();
    }
    marks.sort();

    let mut out = String::with_capacity(text.len() + marks.len() * 9);
    let mut cursor = 0;
    for (start, end) in marks {
        if start < cursor {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str("<em>");
        out.push_str(&text[start..end]);
        out.push_str("</em>");
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Highlighted lines of `text` that contain at least one term.
pub fn highlight_fragments(text: &str, terms: &[String], max_fragments: usize) -> Vec<String> {
    if terms.is_empty() {
        return Vec::new();
    }
    text.lines()
        .filter(|line| term_frequency(line, terms) > 0)
        .take(max_fragments)
        .map(|line| highlight_text(line.trim(), terms))
        .collect()
}

/// Chunks whose content contains at least one term, best first.
pub fn matched_chunks(chunks: &[CodeChunk], terms: &[String], limit: usize) -> Vec<ChunkExcerpt> {
    if terms.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(usize, &CodeChunk)> = chunks
        .iter()
        .map(|c| (term_frequency(&c.content, terms), c))
        .filter(|(tf, _)| *tf > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.index.cmp(&b.1.index)));
    scored
        .into_iter()
        .take(limit)
        .map(|(_, c)| ChunkExcerpt {
            index: c.index,
            start_line: c.start_line,
            end_line: c.end_line,
            content: c.content.clone(),
        })
        .collect()
}

/// Build a [`SearchHit`] for `doc` with the requested highlights.
pub fn build_hit(doc: &CodeDocument, score: f64, query: &SearchQuery, terms: &[String]) -> SearchHit {
    let mut highlights = BTreeMap::new();
    for field in &query.highlight_fields {
        let source = match field {
            HighlightField::Content => doc.content.as_str(),
            HighlightField::FilePath => doc.file_path.as_str(),
            HighlightField::FileName => doc.file_name.as_str(),
        };
        let fragments = highlight_fragments(source, terms, MAX_FRAGMENTS);
        if !fragments.is_empty() {
            highlights.insert(field.as_str().to_string(), fragments);
        }
    }

    SearchHit {
        document_id: doc.id.clone(),
        repository_id: doc.repository_id.clone(),
        repository_identifier: doc.repository_identifier.clone(),
        file_path: doc.file_path.clone(),
        file_name: doc.file_name.clone(),
        language: doc.language.clone(),
        extension: doc.extension.clone(),
        score,
        highlights,
        matched_chunks: matched_chunks(&doc.chunks, terms, MAX_MATCHED_CHUNKS),
    }
}

/// Slice out the requested 1-based page.
pub fn paginate<T>(items: Vec<T>, page: usize, size: usize) -> Vec<T> {
    let size = size.max(1);
    let skip = page.saturating_sub(1).saturating_mul(size);
    items.into_iter().skip(skip).take(size).collect()
}
