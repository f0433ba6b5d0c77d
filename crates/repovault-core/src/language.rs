//! Extension → language lookup used as the ingestion filter.
//!
//! The table is plain immutable data owned by a [`LanguageTable`] value and
//! passed to whoever needs it. Detection looks only at the file name's
//! final extension; file content is never inspected.

use std::collections::HashMap;

/// Label returned when no language matches.
pub const UNKNOWN: &str = "Unknown";

const BUILTIN: &[(&str, &str)] = &[
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("kts", "Kotlin"),
    ("scala", "Scala"),
    ("groovy", "Groovy"),
    ("gradle", "Groovy"),
    ("py", "Python"),
    ("pyi", "Python"),
    ("js", "JavaScript"),
    ("jsx", "JavaScript"),
    ("mjs", "JavaScript"),
    ("cjs", "JavaScript"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("rs", "Rust"),
    ("go", "Go"),
    ("c", "C"),
    ("h", "C"),
    ("cpp", "C++"),
    ("cc", "C++"),
    ("cxx", "C++"),
    ("hpp", "C++"),
    ("hh", "C++"),
    ("cs", "C#"),
    ("fs", "F#"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("swift", "Swift"),
    ("m", "Objective-C"),
    ("mm", "Objective-C"),
    ("dart", "Dart"),
    ("lua", "Lua"),
    ("pl", "Perl"),
    ("r", "R"),
    ("ex", "Elixir"),
    ("exs", "Elixir"),
    ("erl", "Erlang"),
    ("hs", "Haskell"),
    ("clj", "Clojure"),
    ("sh", "Shell"),
    ("bash", "Shell"),
    ("zsh", "Shell"),
    ("ps1", "PowerShell"),
    ("sql", "SQL"),
    ("html", "HTML"),
    ("htm", "HTML"),
    ("css", "CSS"),
    ("scss", "SCSS"),
    ("sass", "Sass"),
    ("less", "Less"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("json", "JSON"),
    ("yaml", "YAML"),
    ("yml", "YAML"),
    ("toml", "TOML"),
    ("xml", "XML"),
    ("proto", "Protocol Buffers"),
    ("tf", "HCL"),
    ("md", "Markdown"),
    ("markdown", "Markdown"),
];

/// Lowercased final extension of a file name.
///
/// Dot-files such as `.gitignore` and names ending in `.` have none.
pub fn extension_of(file_name: &str) -> Option<String> {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) if idx + 1 == name.len() => None,
        Some(idx) => Some(name[idx + 1..].to_ascii_lowercase()),
    }
}

/// An immutable extension → language table.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    by_extension: HashMap<String, String>,
}

impl LanguageTable {
    /// A table with no entries; every name is `Unknown`.
    pub fn empty() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    /// The built-in table of common source, markup, and config languages.
    pub fn builtin() -> Self {
        let by_extension = BUILTIN
            .iter()
            .map(|(ext, lang)| (ext.to_string(), lang.to_string()))
            .collect();
        Self { by_extension }
    }

    /// Return a copy of this table with one more (or a replaced) mapping.
    pub fn with_extension(mut self, extension: &str, language: &str) -> Self {
        self.by_extension.insert(
            extension.trim_start_matches('.').to_ascii_lowercase(),
            language.to_string(),
        );
        self
    }

    /// Language label for a file name, or [`UNKNOWN`].
    pub fn detect_language(&self, file_name: &str) -> &str {
        extension_of(file_name)
            .and_then(|ext| self.by_extension.get(&ext))
            .map(String::as_str)
            .unwrap_or(UNKNOWN)
    }

    /// True iff the name maps to a known language.
    pub fn is_code_file(&self, file_name: &str) -> bool {
        self.detect_language(file_name) != UNKNOWN
    }

    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self::builtin()
    }
}
