//! `rv search`: query the configured index and print one page of hits.
//!
//! Results are printed in rank order as
//!
//! ```text
//! 1. [3.21] demo / src/main/java/App.java (Java)
//!     id: 6f1c…
//!     file_name: "public class <em>App</em> {"
//!     lines 1-12: "public class App {"
//! ```
//!
//! or, with `--json`, as the serialized [`SearchPage`].

use anyhow::{bail, Result};

use repovault_core::search::{HighlightField, SearchPage, SearchQuery};

use crate::config::Config;
use crate::sqlite_index::open_index;

/// Filters and paging for one search invocation.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub repository_id: Option<String>,
    pub repository: Option<String>,
    pub language: Option<String>,
    pub extension: Option<String>,
    pub path: Option<String>,
    pub page: Option<usize>,
    pub size: Option<usize>,
    pub highlight: Vec<String>,
}

/// Turn CLI arguments into a [`SearchQuery`].
pub fn build_query(text: &str, args: SearchArgs) -> Result<SearchQuery> {
    let mut query = SearchQuery::new(text);
    query.repository_id = args.repository_id;
    query.repository_identifier = args.repository;
    query.language = args.language;
    query.extension = args.extension.map(|e| e.trim_start_matches('.').to_lowercase());
    query.path_pattern = args.path;
    if let Some(page) = args.page {
        if page == 0 {
            bail!("--page is 1-based");
        }
        query.page = page;
    }
    if let Some(size) = args.size {
        if size == 0 {
            bail!("--size must be > 0");
        }
        query.size = size;
    }
    for name in &args.highlight {
        match HighlightField::parse(name) {
            Some(field) => query.highlight_fields.push(field),
            None => bail!(
                "Unknown highlight field: {}. Use content, file_name or file_path.",
                name
            ),
        }
    }
    Ok(query)
}

pub async fn run_search(config: &Config, text: &str, args: SearchArgs, json: bool) -> Result<()> {
    let query = build_query(text, args)?;
    let index = open_index(config).await?;
    let page = index.search(&query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else {
        print_page(&page);
    }
    Ok(())
}

fn print_page(page: &SearchPage) {
    if page.hits.is_empty() {
        println!("No results.");
        return;
    }

    let first = (page.page - 1) * page.size;
    for (i, hit) in page.hits.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {} ({})",
            first + i + 1,
            hit.score,
            hit.repository_identifier,
            hit.file_path,
            hit.language
        );
        println!("    id: {}", hit.document_id);
        for (field, fragments) in &hit.highlights {
            for fragment in fragments {
                println!("    {}: \"{}\"", field, fragment.replace('\n', " ").trim());
            }
        }
        for chunk in &hit.matched_chunks {
            let first_line = chunk.content.lines().next().unwrap_or("").trim();
            println!(
                "    lines {}-{}: \"{}\"",
                chunk.start_line, chunk.end_line, first_line
            );
        }
        println!();
    }
    println!(
        "page {} of {} ({} matches)",
        page.page,
        page.total.div_ceil(page.size.max(1)).max(1),
        page.total
    );
}
