//! Chunker seam: splits file content into embedding-ready spans
//!
//! The AST-aware splitter is an external collaborator; this module defines
//! the interface the sync core consumes plus the built-in line-window
//! fallback used when no AST splitter is available for an extension.

use std::str::FromStr;
use std::sync::Arc;

/// A contiguous region of a source file, ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub content: String,
    /// 1-indexed, inclusive.
    pub start_line: u32,
    /// 1-indexed, inclusive.
    pub end_line: u32,
    pub language: String,
}

/// Produces `(content, start_line, end_line, language)` tuples for a file.
pub trait Chunker: Send + Sync {
    fn chunk(&self, content: &str, extension: &str) -> Vec<ChunkSpan>;
}

/// Requested splitter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterKind {
    Ast,
    Langchain,
}

impl Default for SplitterKind {
    fn default() -> Self {
        SplitterKind::Ast
    }
}

impl FromStr for SplitterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ast" => Ok(SplitterKind::Ast),
            "langchain" => Ok(SplitterKind::Langchain),
            other => Err(format!(
                "Unknown splitter '{}'. Supported: ast, langchain",
                other
            )),
        }
    }
}

/// Resolve a splitter kind to a chunker.
///
/// `langchain` is accepted for compatibility but falls back to the built-in
/// splitter with a warning.
pub fn chunker_for(kind: SplitterKind) -> Arc<dyn Chunker> {
    if kind == SplitterKind::Langchain {
        tracing::warn!("Splitter 'langchain' is not available; falling back to 'ast'");
    }
    Arc::new(LineChunker::default())
}

/// Map a file extension (without the dot) to a language tag.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "rs" => "rust",
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" => "javascript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "sh" | "bash" => "bash",
        "sql" => "sql",
        "md" | "markdown" => "markdown",
        _ => return None,
    };
    Some(lang)
}

/// Extensions the built-in splitter produces chunks for.
pub fn supported_extensions() -> Vec<&'static str> {
    vec![
        "rs", "py", "ts", "tsx", "js", "jsx", "mjs", "go", "java", "c", "h", "cpp", "cc",
        "hpp", "cs", "rb", "php", "swift", "kt", "kts", "scala", "sh", "bash", "sql", "md",
        "markdown",
    ]
}

/// Fallback splitter: fixed-size line windows with a small overlap.
pub struct LineChunker {
    max_lines: usize,
    overlap: usize,
}

impl Default for LineChunker {
    fn default() -> Self {
        Self {
            max_lines: 80,
            overlap: 8,
        }
    }
}

impl LineChunker {
    pub fn new(max_lines: usize, overlap: usize) -> Self {
        debug_assert!(overlap < max_lines);
        Self { max_lines, overlap }
    }
}

impl Chunker for LineChunker {
    fn chunk(&self, content: &str, extension: &str) -> Vec<ChunkSpan> {
        let language = match language_for_extension(extension) {
            Some(lang) => lang.to_string(),
            None => return Vec::new(),
        };

        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let mut spans = Vec::new();
        let step = self.max_lines - self.overlap;
        let mut start = 0usize;
        while start < lines.len() {
            let end = (start + self.max_lines).min(lines.len());
            let text = lines[start..end].join("\n");
            if !text.trim().is_empty() {
                spans.push(ChunkSpan {
                    content: text,
                    start_line: (start + 1) as u32,
                    end_line: end as u32,
                    language: language.clone(),
                });
            }
            if end == lines.len() {
                break;
            }
            start += step;
        }
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_file_single_chunk() {
        let chunker = LineChunker::default();
        let spans = chunker.chunk("print(1)\n", "py");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start_line, 1);
        assert_eq!(spans[0].end_line, 1);
        assert_eq!(spans[0].content, "print(1)");
        assert_eq!(spans[0].language, "python");
    }

    #[test]
    fn test_windows_cover_all_lines() {
        let chunker = LineChunker::new(10, 2);
        let content = (1..=25).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let spans = chunker.chunk(&content, "rs");

        assert_eq!(spans[0].start_line, 1);
        assert_eq!(spans[0].end_line, 10);
        assert_eq!(spans[1].start_line, 9);
        assert_eq!(spans.last().unwrap().end_line, 25);
    }

    #[test]
    fn test_unsupported_extension_yields_nothing() {
        let chunker = LineChunker::default();
        assert!(chunker.chunk("data", "bin").is_empty());
    }

    #[test]
    fn test_empty_content() {
        let chunker = LineChunker::default();
        assert!(chunker.chunk("", "py").is_empty());
    }

    #[test]
    fn test_splitter_kind_parse() {
        assert_eq!("ast".parse::<SplitterKind>().unwrap(), SplitterKind::Ast);
        assert_eq!(
            "langchain".parse::<SplitterKind>().unwrap(),
            SplitterKind::Langchain
        );
        assert!("treesitter".parse::<SplitterKind>().is_err());
    }
}
