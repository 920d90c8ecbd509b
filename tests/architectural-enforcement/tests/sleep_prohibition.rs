//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep to wait for events. Races wait
//! on their `JoinSet`, retry rounds on a `tokio::time::Interval`.
//! **Exception**: per-attempt retry backoff.
//!
//! **Policy**: Tests that sleep MUST run on a paused clock
//! (`#[tokio::test(start_paused = true)]`) so they neither stall CI nor flake.

use architectural_enforcement::{
    code_part, enclosing_fn, is_in_test_module, rust_files, test_attribute, SourceFile,
    PRODUCTION_DIRS, TEST_DIRS,
};

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains(" sleep(")
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<String> = PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| rust_files(dir))
        .flat_map(|file| production_sleep_violations(&file))
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE: retry backoff computed by RetryPolicy::backoff_for");
        eprintln!("✅ ACCEPTABLE: periodic work driven by tokio::time::interval");
        eprintln!("❌ FORBIDDEN: sleeping to wait for another task");

        panic!("\nFound {} sleep violation(s) in production code.", violations.len());
    }
}

#[test]
fn test_sleeping_tests_use_paused_clock() {
    let mut files: Vec<SourceFile> = TEST_DIRS.iter().flat_map(|dir| rust_files(dir)).collect();
    files.extend(PRODUCTION_DIRS.iter().flat_map(|dir| rust_files(dir)));

    let violations: Vec<String> = files.iter().flat_map(unpaused_test_sleeps).collect();

    if !violations.is_empty() {
        eprintln!("\n❌ Tests sleep on the real clock!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use #[tokio::test(start_paused = true)] and let time auto-advance.");

        panic!("\nFound {} real-clock sleep(s) in tests.", violations.len());
    }
}

fn production_sleep_violations(file: &SourceFile) -> Vec<String> {
    let lines = file.lines();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if is_in_test_module(&lines, idx) {
            break;
        }
        if !is_sleep_call(code_part(line)) {
            continue;
        }
        if is_backoff_context(&lines, idx) {
            continue;
        }
        violations.push(file.describe(idx, line));
    }

    violations
}

/// A test function that sleeps without a paused clock
///
/// Helpers (fake upstreams and the like) may sleep; they only run under the
/// tests that call them.
fn unpaused_test_sleeps(file: &SourceFile) -> Vec<String> {
    let lines = file.lines();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if !is_sleep_call(code_part(line)) {
            continue;
        }
        let Some(fn_idx) = enclosing_fn(&lines, idx) else {
            continue;
        };
        match test_attribute(&lines, fn_idx) {
            Some(attr) if attr.contains("start_paused = true") => {}
            Some(_) => violations.push(file.describe(idx, line)),
            None => {}
        }
    }

    violations
}

/// Whether a sleep waits out a retry backoff
fn is_backoff_context(lines: &[&str], idx: usize) -> bool {
    let window = &lines[idx.saturating_sub(15)..(idx + 5).min(lines.len())];

    let has_backoff_calc = window.iter().any(|line| {
        line.contains("backoff_for(") || line.contains("<<") || line.contains(".pow(")
    });
    let has_retry_context = window.iter().any(|line| {
        let line = line.to_lowercase();
        line.contains("retry") || line.contains("backoff")
    });

    has_backoff_calc && has_retry_context
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(code: &str) -> SourceFile {
        SourceFile::from_text("sample.rs", code)
    }

    #[test]
    fn test_backoff_sleep_is_allowed() {
        let code = "\
async fn run() {
    let backoff = self.policy.backoff_for(retry_count);
    tokio::time::sleep(backoff).await;
}
";
        assert!(production_sleep_violations(&file(code)).is_empty());
    }

    #[test]
    fn test_polling_sleep_is_flagged() {
        let code = "\
async fn wait_for_winner() {
    loop {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
";
        assert_eq!(production_sleep_violations(&file(code)).len(), 1);
    }

    #[test]
    fn test_unpaused_test_sleep_is_flagged() {
        let code = "\
#[tokio::test]
async fn waits() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}
";
        assert_eq!(unpaused_test_sleeps(&file(code)).len(), 1);
    }

    #[test]
    fn test_paused_test_and_helper_sleeps_are_allowed() {
        let code = "\
impl Upstream for Fake {
    async fn send(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

#[tokio::test(start_paused = true)]
async fn waits() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}
";
        assert!(unpaused_test_sleeps(&file(code)).is_empty());
    }
}
