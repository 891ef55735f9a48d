//! Flattens verified-source payloads into a single text corpus.
//!
//! Three payload shapes are accepted:
//! - a plain source string (single file),
//! - a legacy multi-file map `{ "path": { "content": "..." } }`,
//! - standard-JSON compiler input, optionally wrapped in an extra pair of
//!   braces (`{{ ... }}`) the way Etherscan returns it.
//!
//! Structured payloads that fail to parse fall back to raw text with a
//! warning. Normalization never fails.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One file inside the corpus, addressed by global line numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    /// Zero-based index of the file's first line in the corpus.
    pub first_line: usize,
    pub line_count: usize,
}

/// Normalized flat text of a contract's verified source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCorpus {
    pub raw_text: String,
    pub files: Vec<SourceFile>,
    pub compiler_version: String,
    pub contract_name: String,
    pub parse_warnings: Vec<String>,
}

impl SourceCorpus {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Empty corpora cannot trigger any rule.
    pub fn is_empty(&self) -> bool {
        self.raw_text.trim().is_empty()
    }

    /// Map a zero-based corpus line to its file and one-based file-relative line.
    pub fn locate(&self, global_line: usize) -> Option<(&SourceFile, usize)> {
        self.files
            .iter()
            .find(|f| global_line >= f.first_line && global_line < f.first_line + f.line_count)
            .map(|f| (f, global_line - f.first_line + 1))
    }

    fn push_file(&mut self, path: String, content: &str) {
        let first_line = self.raw_text.matches('\n').count();
        self.raw_text.push_str(content);
        if !content.ends_with('\n') {
            self.raw_text.push('\n');
        }
        let line_count = self.raw_text.matches('\n').count() - first_line;
        self.files.push(SourceFile {
            path,
            first_line,
            line_count,
        });
    }
}

#[derive(Deserialize)]
struct StandardJsonInput {
    sources: IndexMap<String, SourceEntry>,
}

#[derive(Deserialize)]
struct SourceEntry {
    #[serde(default)]
    content: String,
}

/// Normalize a registry payload. Files are concatenated in declaration order.
pub fn normalize(raw_payload: &str, contract_name: &str, compiler_version: &str) -> SourceCorpus {
    let mut corpus = SourceCorpus {
        contract_name: contract_name.to_string(),
        compiler_version: compiler_version.to_string(),
        ..Default::default()
    };

    let trimmed = raw_payload.trim();
    if trimmed.is_empty() {
        return corpus;
    }

    if trimmed.starts_with('{') {
        match parse_sources(trimmed) {
            Ok(files) if !files.is_empty() => {
                for (path, entry) in files {
                    corpus.push_file(path, &entry.content);
                }
                return corpus;
            }
            Ok(_) => corpus
                .parse_warnings
                .push("structured payload declares no source files".to_string()),
            Err(e) => corpus
                .parse_warnings
                .push(format!("structured payload could not be parsed: {e}")),
        }
    }

    corpus.push_file(default_file_name(contract_name), raw_payload);
    corpus
}

fn parse_sources(text: &str) -> Result<IndexMap<String, SourceEntry>, serde_json::Error> {
    // Etherscan wraps standard-JSON input in a second pair of braces.
    let inner = if text.starts_with("{{") && text.ends_with("}}") {
        &text[1..text.len() - 1]
    } else {
        text
    };

    match serde_json::from_str::<StandardJsonInput>(inner) {
        Ok(input) => Ok(input.sources),
        Err(_) => serde_json::from_str::<IndexMap<String, SourceEntry>>(inner),
    }
}

fn default_file_name(contract_name: &str) -> String {
    if contract_name.is_empty() {
        "Contract.sol".to_string()
    } else {
        format!("{contract_name}.sol")
    }
}
