//! Text predicates over a [`SourceCorpus`].

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::source::SourceCorpus;

/// Evidence spans kept per rule.
const MAX_SPANS: usize = 5;
const MAX_SNIPPET_CHARS: usize = 120;

#[derive(Debug, Clone)]
pub enum Pattern {
    Substring { needle: String, case_insensitive: bool },
    Regex(Regex),
}

impl Pattern {
    pub fn literal(needle: &str) -> Self {
        Pattern::Substring {
            needle: needle.to_string(),
            case_insensitive: false,
        }
    }

    pub fn literal_ci(needle: &str) -> Self {
        Pattern::Substring {
            needle: needle.to_lowercase(),
            case_insensitive: true,
        }
    }

    pub fn regex(expr: &str) -> Result<Self, regex::Error> {
        Regex::new(expr).map(Pattern::Regex)
    }

    pub fn is_match(&self, line: &str) -> bool {
        match self {
            Pattern::Substring {
                needle,
                case_insensitive: false,
            } => line.contains(needle.as_str()),
            Pattern::Substring {
                needle,
                case_insensitive: true,
            } => line.to_lowercase().contains(needle.as_str()),
            Pattern::Regex(re) => re.is_match(line),
        }
    }
}

/// A source location with a trimmed snippet. Lines are one-based and relative
/// to `file`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextSpan {
    pub file: String,
    pub line: usize,
    pub snippet: String,
}

/// Anchor pattern plus co-occurrence constraints.
///
/// A line matching `anchor` counts when every `requires` pattern and no
/// `suppressed_by` pattern occurs within `window` lines of it in the same file.
/// `excluded_by` patterns cancel the rule anywhere in the corpus, and
/// `compiler` restricts it to matching compiler versions.
#[derive(Debug, Clone)]
pub struct TextPredicate {
    pub anchor: Pattern,
    pub requires: Vec<Pattern>,
    pub suppressed_by: Vec<Pattern>,
    pub excluded_by: Vec<Pattern>,
    pub compiler: Option<Pattern>,
    pub window: usize,
}

impl TextPredicate {
    pub fn new(anchor: Pattern) -> Self {
        Self {
            anchor,
            requires: Vec::new(),
            suppressed_by: Vec::new(),
            excluded_by: Vec::new(),
            compiler: None,
            window: 0,
        }
    }

    /// Evidence spans for every qualifying anchor line. Empty means no match.
    pub fn evaluate(&self, corpus: &SourceCorpus) -> Vec<TextSpan> {
        if corpus.is_empty() {
            return Vec::new();
        }
        if let Some(compiler) = &self.compiler {
            if !compiler.is_match(&corpus.compiler_version) {
                return Vec::new();
            }
        }

        let lines: Vec<&str> = corpus.raw_text.lines().collect();
        if self
            .excluded_by
            .iter()
            .any(|p| lines.iter().any(|line| p.is_match(line)))
        {
            return Vec::new();
        }

        let mut spans = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if !self.anchor.is_match(line) {
                continue;
            }
            let Some((file, file_line)) = corpus.locate(idx) else {
                continue;
            };
            let start = idx.saturating_sub(self.window).max(file.first_line);
            let end = (idx + self.window + 1)
                .min(file.first_line + file.line_count)
                .min(lines.len());
            let context = &lines[start..end];

            let required = self
                .requires
                .iter()
                .all(|p| context.iter().any(|l| p.is_match(l)));
            let suppressed = self
                .suppressed_by
                .iter()
                .any(|p| context.iter().any(|l| p.is_match(l)));
            if !required || suppressed {
                continue;
            }

            spans.push(TextSpan {
                file: file.path.clone(),
                line: file_line,
                snippet: snippet(line),
            });
            if spans.len() >= MAX_SPANS {
                break;
            }
        }
        spans
    }
}

fn snippet(line: &str) -> String {
    let trimmed = line.trim();
    match trimmed.char_indices().nth(MAX_SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::normalize;

    fn corpus(text: &str) -> SourceCorpus {
        normalize(text, "Vault", "v0.8.19+commit.7dd6d404")
    }

    #[test]
    fn substring_case_handling() {
        assert!(Pattern::literal("tx.origin").is_match("require(tx.origin == owner);"));
        assert!(!Pattern::literal("TX.ORIGIN").is_match("tx.origin"));
        assert!(Pattern::literal_ci("OnlyOwner").is_match("function kill() onlyOwner {"));
    }

    #[test]
    fn requires_pattern_within_window() {
        let src = "function withdraw() public {\n    uint a = 1;\n    msg.sender.transfer(a);\n}\n";
        let mut pred = TextPredicate::new(Pattern::regex(r"function\s+withdraw").unwrap());
        pred.requires.push(Pattern::literal(".transfer("));

        pred.window = 1;
        assert!(pred.evaluate(&corpus(src)).is_empty());

        pred.window = 2;
        let spans = pred.evaluate(&corpus(src));
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].line, 1);
        assert_eq!(spans[0].file, "Vault.sol");
        assert_eq!(spans[0].snippet, "function withdraw() public {");
    }

    #[test]
    fn suppression_cancels_match() {
        let src = "function kill() onlyOwner {\n    selfdestruct(owner);\n}\n";
        let mut pred = TextPredicate::new(Pattern::regex(r"selfdestruct\s*\(").unwrap());
        pred.window = 3;
        assert_eq!(pred.evaluate(&corpus(src)).len(), 1);
        pred.suppressed_by.push(Pattern::literal_ci("onlyowner"));
        assert!(pred.evaluate(&corpus(src)).is_empty());
    }

    #[test]
    fn window_does_not_cross_files() {
        let payload = r#"{"A.sol":{"content":"contract A {\n  function f() { x.transfer(1); }\n}"},"B.sol":{"content":"function withdraw() public {\n}"}}"#;
        let corpus = normalize(payload, "B", "v0.8.0");
        let mut pred = TextPredicate::new(Pattern::regex(r"function\s+withdraw").unwrap());
        pred.requires.push(Pattern::literal(".transfer("));
        pred.window = 10;
        assert!(pred.evaluate(&corpus).is_empty());
    }

    #[test]
    fn compiler_and_exclusion_filters() {
        let src = "balance += amount;\n";
        let mut pred = TextPredicate::new(Pattern::literal("+="));
        pred.compiler = Some(Pattern::regex(r"v?0\.[4-7]\.").unwrap());
        assert!(pred.evaluate(&corpus(src)).is_empty());

        let old = normalize(src, "Token", "v0.4.24+commit.e67f0147");
        assert_eq!(pred.evaluate(&old).len(), 1);

        pred.excluded_by.push(Pattern::literal_ci("safemath"));
        let guarded = normalize("using SafeMath for uint;\nbalance += amount;\n", "Token", "v0.4.24");
        assert!(pred.evaluate(&guarded).is_empty());
    }

    #[test]
    fn long_snippets_are_truncated() {
        let long = format!("selfdestruct({});", "a".repeat(300));
        let spans = TextPredicate::new(Pattern::literal("selfdestruct")).evaluate(&corpus(&long));
        assert!(spans[0].snippet.ends_with("..."));
        assert!(spans[0].snippet.chars().count() <= MAX_SNIPPET_CHARS + 3);
    }
}
