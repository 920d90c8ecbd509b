//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the relay MUST NOT block a runtime worker. A
//! blocked worker stalls every race scheduled on it.
//! **Required**: `tokio::fs`, `tokio::net`, async `reqwest`.
//! **Allowed**: blocking calls in synchronous functions (pool and config
//! loading, which run before the server starts) and in test code.

use architectural_enforcement::{
    code_part, enclosing_fn, is_async_fn, is_in_test_module, rust_files, SourceFile,
    PRODUCTION_DIRS,
};

/// Patterns that block the calling thread
const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("use std::fs", "Blocking file I/O"),
    ("std::net::TcpStream", "Blocking network I/O"),
    ("std::net::TcpListener", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::thread::sleep", "Thread sleep"),
    ("std::io::stdin()", "Blocking stdin"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations: Vec<String> = PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| rust_files(dir))
        .flat_map(|file| blocking_violations(&file))
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking I/O found in async relay code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Move the call into a synchronous loader, or use the tokio equivalent.");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.",
            violations.len()
        );
    }
}

fn blocking_violations(file: &SourceFile) -> Vec<String> {
    let lines = file.lines();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if is_in_test_module(&lines, idx) {
            break;
        }

        let code = code_part(line);
        let Some((_, what)) = BLOCKING_PATTERNS.iter().find(|(p, _)| code.contains(p)) else {
            continue;
        };

        // File-level imports put blocking calls within reach of async code
        let in_async = match enclosing_fn(&lines, idx) {
            Some(fn_idx) => is_async_fn(&lines, fn_idx),
            None => code.trim_start().starts_with("use "),
        };
        if in_async {
            violations.push(format!("{what}: {}", file.describe(idx, line)));
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(code: &str) -> Vec<String> {
        blocking_violations(&SourceFile::from_text("src/sample.rs", code))
    }

    #[test]
    fn test_blocking_read_in_async_fn_is_flagged() {
        let violations = scan(
            "pub async fn handler() {\n    let s = std::fs::read_to_string(\"x\");\n}\n",
        );
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("sample.rs:2"));
    }

    #[test]
    fn test_blocking_read_in_sync_loader_is_allowed() {
        let violations = scan(
            "pub fn load(path: &Path) -> Result<Self> {\n    let s = std::fs::read_to_string(path)?;\n}\n",
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn test_module_import_is_flagged() {
        assert_eq!(scan("use std::fs;\n").len(), 1);
    }

    #[test]
    fn test_test_module_is_skipped() {
        let violations = scan(
            "#[cfg(test)]\nmod tests {\n    async fn t() { std::fs::write(\"x\", \"y\"); }\n}\n",
        );
        assert!(violations.is_empty());
    }
}
