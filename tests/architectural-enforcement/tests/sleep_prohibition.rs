//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the arena crates MUST NOT call sleep methods.
//! Waiting happens on I/O, on channels with `tokio::time::timeout`, or on
//! `tokio::time::interval` ticks.
//! **Exceptions**: test code and the scripted test backend

use architectural_enforcement::production_sources;

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }

        eprintln!("\nAcceptable waiting:");
        eprintln!("  - tokio::time::timeout around a channel receive");
        eprintln!("  - tokio::time::interval ticks for periodic probes");
        eprintln!("  - Test code (#[test] / #[tokio::test] or #[cfg(test)] modules)");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line_number, code) in file.code_lines() {
            if !(code.contains("::sleep(") || code.contains(".sleep(")) {
                continue;
            }
            if file.is_test_code(idx) {
                continue;
            }
            violations.push(format!(
                "{}:{} - {}",
                file.path.display(),
                line_number,
                file.lines[idx].trim()
            ));
        }
    }

    violations
}
