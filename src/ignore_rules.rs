//! Ignore pattern matching for indexed trees
//!
//! Combines built-in defaults with codebase-local patterns (gitignore-style)
//! and explicit per-request additions. Hidden paths are always excluded.

use std::path::Path;

use regex::Regex;

/// Patterns applied to every codebase before any local configuration.
const DEFAULT_PATTERNS: &[&str] = &[
    "node_modules/",
    "__pycache__/",
    "venv/",
    "*.pyc",
    "*.class",
    "*.o",
    "*.so",
    "*.dylib",
    "*.exe",
    "*.dll",
    "*.min.js",
];

/// Name of the codebase-local ignore file, resolved lazily at index start.
pub const IGNORE_FILE: &str = ".codesyncignore";

#[derive(Debug, Clone)]
enum Rule {
    /// Filename glob (`*.log`), matched against the final path component.
    Name(Regex),
    /// Path glob containing `/` (`build/*.map`), matched against the full
    /// relative path, `*` spanning arbitrary characters.
    Path(Regex),
    /// Directory pattern (`build/`): matches the directory and any path
    /// under it.
    Directory(Regex),
}

/// Decides whether a path participates in indexing.
///
/// Matching is a pure function of the path and the pattern list; relative
/// and absolute forms of the same path under the configured root give the
/// same answer.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    root: Option<std::path::PathBuf>,
    rules: Vec<Rule>,
}

impl IgnoreMatcher {
    /// Build a matcher from raw pattern strings, without the defaults.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .filter_map(|p| compile_rule(p.as_ref()))
            .collect();
        Self { root: None, rules }
    }

    /// Build a matcher from the built-in defaults, the codebase-local ignore
    /// file (if present), and explicit extra patterns, in that order. Order
    /// does not affect the outcome; any match ignores.
    pub fn for_codebase<S: AsRef<str>>(root: &Path, extra: &[S]) -> Self {
        let mut patterns: Vec<String> =
            DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect();
        patterns.extend(load_ignore_file(root));
        patterns.extend(extra.iter().map(|p| p.as_ref().to_string()));

        let mut matcher = Self::new(patterns);
        matcher.root = Some(root.to_path_buf());
        matcher
    }

    /// True if `path` must not be indexed.
    ///
    /// Accepts OS-native or POSIX separators, and absolute paths under the
    /// configured root.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let rel = self.normalize(path);
        if rel.is_empty() {
            return false;
        }
        if has_hidden_component(&rel) {
            return true;
        }
        let file_name = rel.rsplit('/').next().unwrap_or(&rel);
        self.rules.iter().any(|rule| match rule {
            Rule::Name(re) => re.is_match(file_name),
            Rule::Path(re) => re.is_match(&rel),
            Rule::Directory(re) => re.is_match(&rel),
        })
    }

    /// Number of compiled rules, for diagnostics.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn normalize(&self, path: &Path) -> String {
        let stripped = match &self.root {
            Some(root) if path.is_absolute() => path.strip_prefix(root).unwrap_or(path),
            _ => path,
        };
        stripped
            .to_string_lossy()
            .replace('\\', "/")
            .trim_start_matches('/')
            .to_string()
    }
}

/// Any component starting with `.` makes the whole path hidden, regardless
/// of the pattern list.
fn has_hidden_component(rel: &str) -> bool {
    rel.split('/').any(|c| c.starts_with('.') && !c.is_empty())
}

fn compile_rule(pattern: &str) -> Option<Rule> {
    let pattern = pattern.trim();
    if pattern.is_empty() || pattern.starts_with('#') {
        return None;
    }
    // Negations are not supported by this matcher; skip rather than
    // mis-apply them as positive patterns.
    if let Some(rest) = pattern.strip_prefix('!') {
        tracing::debug!(pattern = rest, "Skipping unsupported negation pattern");
        return None;
    }

    if let Some(dir) = pattern.strip_suffix('/') {
        let re = glob_to_regex(dir.trim_start_matches('/'), "(/.*)?");
        return build(re).map(Rule::Directory);
    }
    if pattern.contains('/') {
        let re = glob_to_regex(pattern.trim_start_matches('/'), "");
        return build(re).map(Rule::Path);
    }
    build(glob_to_regex(pattern, "")).map(Rule::Name)
}

fn build(source: String) -> Option<Regex> {
    match Regex::new(&source) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(regex = %source, error = %e, "Failed to compile ignore pattern");
            None
        }
    }
}

/// Translate a simple glob to an anchored regex: metacharacters are escaped
/// and `*` becomes `.*`. No `**` semantics.
fn glob_to_regex(glob: &str, suffix: &str) -> String {
    let mut out = String::with_capacity(glob.len() + suffix.len() + 2);
    out.push('^');
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            c if "\\.+?^$()[]{}|".contains(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push_str(suffix);
    out.push('$');
    out
}

fn load_ignore_file(root: &Path) -> Vec<String> {
    let path = root.join(IGNORE_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => content.lines().map(|l| l.to_string()).collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read ignore file");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn matcher(patterns: &[&str]) -> IgnoreMatcher {
        IgnoreMatcher::new(patterns.iter().copied())
    }

    #[test]
    fn test_hidden_components_always_ignored() {
        let m = matcher(&[]);
        assert!(m.is_ignored(Path::new(".git/config")));
        assert!(m.is_ignored(Path::new("src/.hidden/file.rs")));
        assert!(m.is_ignored(Path::new(".env")));
        assert!(!m.is_ignored(Path::new("src/main.rs")));
    }

    #[test]
    fn test_filename_glob() {
        let m = matcher(&["*.log"]);
        assert!(m.is_ignored(Path::new("app.log")));
        assert!(m.is_ignored(Path::new("logs/app.log")));
        assert!(!m.is_ignored(Path::new("app.log.rs")));
    }

    #[test]
    fn test_path_glob() {
        let m = matcher(&["build/*.map"]);
        assert!(m.is_ignored(Path::new("build/out.map")));
        assert!(m.is_ignored(Path::new("build/sub/out.map")));
        assert!(!m.is_ignored(Path::new("dist/out.map")));
    }

    #[test]
    fn test_directory_pattern_matches_subtree() {
        let m = matcher(&["build/"]);
        assert!(m.is_ignored(Path::new("build")));
        assert!(m.is_ignored(Path::new("build/out.map")));
        assert!(m.is_ignored(Path::new("build/deep/nested/file.js")));
        assert!(!m.is_ignored(Path::new("builder/file.js")));
    }

    #[test]
    fn test_directory_pattern_with_glob() {
        let m = matcher(&["*cache/"]);
        assert!(m.is_ignored(Path::new("mycache/entry.bin")));
        assert!(!m.is_ignored(Path::new("cached/entry.bin")));
    }

    #[test]
    fn test_relative_and_absolute_agree() {
        let root = PathBuf::from("/work/project");
        let mut m = IgnoreMatcher::new(["build/"]);
        m.root = Some(root.clone());

        let rel = Path::new("build/out.map");
        let abs = root.join(rel);
        assert_eq!(m.is_ignored(rel), m.is_ignored(&abs));

        let rel = Path::new("src/lib.rs");
        let abs = root.join(rel);
        assert_eq!(m.is_ignored(rel), m.is_ignored(&abs));
    }

    #[test]
    fn test_idempotent_pure_function() {
        let m = matcher(&["*.log", "build/"]);
        for _ in 0..3 {
            assert!(m.is_ignored(Path::new("a.log")));
            assert!(!m.is_ignored(Path::new("a.rs")));
        }
    }

    #[test]
    fn test_defaults_loaded_for_codebase() {
        let dir = tempfile::tempdir().unwrap();
        let m = IgnoreMatcher::for_codebase(dir.path(), &[] as &[&str]);
        assert!(m.is_ignored(Path::new("node_modules/react/index.js")));
        assert!(m.is_ignored(Path::new("lib.pyc")));
        assert!(!m.is_ignored(Path::new("build/out.map")));
    }

    #[test]
    fn test_ignore_file_patterns_loaded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IGNORE_FILE), "# comment\n*.gen.ts\nvendor/\n")
            .unwrap();
        let m = IgnoreMatcher::for_codebase(dir.path(), &[] as &[&str]);
        assert!(m.is_ignored(Path::new("api.gen.ts")));
        assert!(m.is_ignored(Path::new("vendor/lib/mod.go")));
        assert!(!m.is_ignored(Path::new("api.ts")));
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let m = matcher(&["", "# note", "*.tmp"]);
        assert_eq!(m.rule_count(), 1);
    }
}
