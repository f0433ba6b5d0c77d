//! Line-aligned code chunker.
//!
//! Splits file content into pieces that respect a `max_tokens` budget
//! without ever cutting through a line. A line that alone exceeds the
//! budget becomes its own chunk.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to a byte budget using a 4 chars/token ratio.
//! 2. Content within the budget is returned as one chunk.
//! 3. Otherwise walk `\n`-terminated lines, appending each to a buffer.
//!    When the next line would overflow a non-empty buffer, flush it.
//! 4. Flush whatever remains.
//!
//! Concatenating the chunks reproduces the input exactly, and empty input
//! yields a single empty chunk.
//!
//! # Example
//!
//! ```rust
//! use repovault_core::chunk::chunk_code_with_metadata;
//!
//! let chunks = chunk_code_with_metadata("fn main() {}\n", 512);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 1));
//! ```

use crate::models::CodeChunk;

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default token budget per chunk.
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Byte budget for one chunk.
pub fn chunk_budget(max_tokens: usize) -> usize {
    max_tokens.saturating_mul(CHARS_PER_TOKEN)
}

/// Number of lines in `content`, counting a trailing unterminated line.
/// Empty content counts as one line.
pub fn line_count(content: &str) -> usize {
    content.split_inclusive('\n').count().max(1)
}

/// Split `content` into line-aligned chunks of at most `max_tokens` each.
pub fn chunk_code(content: &str, max_tokens: usize) -> Vec<String> {
    split_lines(content, chunk_budget(max_tokens))
        .into_iter()
        .map(|(text, _)| text.to_string())
        .collect()
}

/// Like [`chunk_code`], with contiguous indices and 1-based inclusive line
/// ranges. Line numbering continues across chunks.
pub fn chunk_code_with_metadata(content: &str, max_tokens: usize) -> Vec<CodeChunk> {
    let mut next_line = 1;
    split_lines(content, chunk_budget(max_tokens))
        .into_iter()
        .enumerate()
        .map(|(index, (text, lines))| {
            let lines = lines.max(1);
            let chunk = CodeChunk {
                index,
                content: text.to_string(),
                start_line: next_line,
                end_line: next_line + lines - 1,
                embedding: None,
            };
            next_line += lines;
            chunk
        })
        .collect()
}

/// Core splitter: returns slices of `content` with the number of lines in each.
fn split_lines(content: &str, budget: usize) -> Vec<(&str, usize)> {
    if content.len() <= budget {
        return vec![(content, line_count(content))];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut end = 0;
    let mut lines = 0;

    for line in content.split_inclusive('\n') {
        let buffered = end - start;
        if buffered > 0 && buffered + line.len() > budget {
            pieces.push((&content[start..end], lines));
            start = end;
            lines = 0;
        }
        end += line.len();
        lines += 1;
    }

    if end > start {
        pieces.push((&content[start..end], lines));
    }

    pieces
}
