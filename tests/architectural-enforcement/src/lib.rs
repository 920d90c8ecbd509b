//! Architectural Enforcement Integration Tests
//!
//! Source-scanning checks that keep the relay honest:
//! - No blocking I/O inside async code
//! - No sleeping in production code except retry backoff
//! - Tests that sleep run on a paused clock
//!
//! The scanners are line based. They understand just enough Rust to find the
//! function enclosing a line and the attributes on that function.

use std::fs;
use std::path::{Path, PathBuf};

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Production source trees of the relay
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/daemon/src"];

/// Integration test trees of the relay
pub const TEST_DIRS: &[&str] = &["relay/core/tests"];

/// One Rust source file, split into lines
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    content: String,
}

impl SourceFile {
    /// Build from in-memory text
    #[must_use]
    pub fn from_text(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// All lines
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        self.content.lines().collect()
    }

    /// `path:line - text` for reports
    #[must_use]
    pub fn describe(&self, idx: usize, line: &str) -> String {
        format!("{}:{} - {}", self.path.display(), idx + 1, line.trim())
    }
}

/// Every `.rs` file under `dir` (relative to the workspace root)
///
/// # Panics
///
/// Panics if `dir` does not exist, so a moved crate cannot silently pass.
#[must_use]
pub fn rust_files(dir: &str) -> Vec<SourceFile> {
    let root = workspace_root();
    let base = root.join(dir);
    assert!(base.exists(), "scanned directory is missing: {}", base.display());

    walkdir::WalkDir::new(&base)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|e| {
            let content = fs::read_to_string(e.path()).ok()?;
            let path = e.path().strip_prefix(&root).unwrap_or(e.path()).to_path_buf();
            Some(SourceFile { path, content })
        })
        .collect()
}

/// Code part of a line, without trailing `//` comments
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether a trimmed line opens a function
#[must_use]
pub fn is_fn_signature(line: &str) -> bool {
    let mut rest = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub ", "const ", "async ", "unsafe "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    // Twice, for `pub async` and friends
    for prefix in ["const ", "async ", "unsafe "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    rest.starts_with("fn ")
}

/// Index of the signature of the function enclosing `idx`
#[must_use]
pub fn enclosing_fn(lines: &[&str], idx: usize) -> Option<usize> {
    (0..=idx).rev().find(|&i| is_fn_signature(lines[i]))
}

/// Whether the function at `fn_idx` is async
#[must_use]
pub fn is_async_fn(lines: &[&str], fn_idx: usize) -> bool {
    lines[fn_idx].contains("async fn ")
}

/// Test attribute (`#[test]` or `#[tokio::test...]`) on the function at `fn_idx`
#[must_use]
pub fn test_attribute<'a>(lines: &[&'a str], fn_idx: usize) -> Option<&'a str> {
    for i in (0..fn_idx).rev() {
        let line = lines[i].trim();
        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return Some(line);
        }
        if !(line.starts_with("#[") || line.starts_with("///")) {
            return None;
        }
    }
    None
}

/// Whether `idx` is at or after a `#[cfg(test)]` module
///
/// Test modules sit at the bottom of each file, so everything after the
/// marker is test code.
#[must_use]
pub fn is_in_test_module(lines: &[&str], idx: usize) -> bool {
    lines[..=idx]
        .iter()
        .any(|line| line.trim().starts_with("#[cfg(test)]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_signature_forms() {
        assert!(is_fn_signature("fn plain() {"));
        assert!(is_fn_signature("    pub fn load(path: &Path) -> Result<Self> {"));
        assert!(is_fn_signature("pub(crate) async fn run(&self) {"));
        assert!(is_fn_signature("pub async fn tick(&mut self) -> RetryDecision {"));
        assert!(!is_fn_signature("let f = |x| x;"));
        assert!(!is_fn_signature("// fn commented"));
    }

    #[test]
    fn test_enclosing_fn_and_attribute() {
        let lines = vec![
            "#[tokio::test(start_paused = true)]",
            "async fn waits() {",
            "    tokio::spawn(async move {",
            "        tokio::time::sleep(d).await;",
            "    });",
            "}",
        ];
        let fn_idx = enclosing_fn(&lines, 3).unwrap();
        assert_eq!(fn_idx, 1);
        assert!(is_async_fn(&lines, fn_idx));
        assert_eq!(
            test_attribute(&lines, fn_idx),
            Some("#[tokio::test(start_paused = true)]")
        );
    }

    #[test]
    fn test_helper_has_no_test_attribute() {
        let lines = vec!["impl Upstream for Fake {", "    async fn send(&self) {", "    }"];
        assert_eq!(test_attribute(&lines, 1), None);
    }

    #[test]
    fn test_test_module_detection() {
        let lines = vec!["fn a() {}", "#[cfg(test)]", "mod tests {", "    fn b() {}"];
        assert!(!is_in_test_module(&lines, 0));
        assert!(is_in_test_module(&lines, 3));
    }
}
