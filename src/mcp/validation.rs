//! Input validation for the tool surface
//!
//! Input errors are surfaced to the caller verbatim and never retried.

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::chunker::SplitterKind;

/// Maximum query length to bound embedding work.
pub const MAX_QUERY_LENGTH: usize = 8192;

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\.[A-Za-z0-9]+$").expect("static regex"));

pub fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Query cannot be empty");
    }
    if query.len() > MAX_QUERY_LENGTH {
        bail!(
            "Query too long: {} bytes (max {})",
            query.len(),
            MAX_QUERY_LENGTH
        );
    }
    Ok(())
}

/// Each entry must look like `.py`, `.rs`, `.tsx`, …
pub fn validate_extension_filter(extensions: &[String]) -> Result<()> {
    for ext in extensions {
        if !EXTENSION_RE.is_match(ext) {
            bail!(
                "Invalid extension filter entry '{}'. Expected a dot followed by alphanumerics, e.g. '.py'",
                ext
            );
        }
    }
    Ok(())
}

/// Clamp a requested result limit into `[1, max]`, defaulting when absent.
pub fn clamp_limit(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max)
}

pub fn parse_splitter(raw: Option<&str>) -> Result<SplitterKind> {
    match raw {
        None => Ok(SplitterKind::Ast),
        Some(s) => s.parse::<SplitterKind>().map_err(|e| anyhow::anyhow!(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter_accepts_dotted() {
        validate_extension_filter(&[".py".into(), ".tsx".into(), ".c".into()]).unwrap();
    }

    #[test]
    fn test_extension_filter_rejects_bad_entries() {
        assert!(validate_extension_filter(&["py".into()]).is_err());
        assert!(validate_extension_filter(&[".".into()]).is_err());
        assert!(validate_extension_filter(&[".py ".into()]).is_err());
        assert!(validate_extension_filter(&[".c++".into()]).is_err());
        assert!(validate_extension_filter(&["".into()]).is_err());
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 10, 50), 10);
        assert_eq!(clamp_limit(Some(0), 10, 50), 1);
        assert_eq!(clamp_limit(Some(200), 10, 50), 50);
        assert_eq!(clamp_limit(Some(25), 10, 50), 25);
    }

    #[test]
    fn test_parse_splitter_default_and_values() {
        assert_eq!(parse_splitter(None).unwrap(), SplitterKind::Ast);
        assert_eq!(parse_splitter(Some("ast")).unwrap(), SplitterKind::Ast);
        assert_eq!(
            parse_splitter(Some("langchain")).unwrap(),
            SplitterKind::Langchain
        );
        assert!(parse_splitter(Some("regex")).is_err());
    }

    #[test]
    fn test_validate_query() {
        validate_query("find retry logic").unwrap();
        assert!(validate_query("   ").is_err());
        assert!(validate_query(&"x".repeat(MAX_QUERY_LENGTH + 1)).is_err());
    }
}
