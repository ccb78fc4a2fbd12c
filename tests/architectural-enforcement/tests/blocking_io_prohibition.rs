//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in the arena crates MUST NOT block the runtime.
//! **Required**: `tokio::net`, `tokio::fs` and async `reqwest` inside async code.
//! **Acceptable**: blocking calls in plain functions (configuration loading
//! before the server starts) and test code.

use architectural_enforcement::{is_in_async_function, production_sources};

/// Patterns that block the calling thread
const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::TcpStream", "Blocking network I/O"),
    ("std::net::TcpListener", "Blocking network I/O"),
    ("std::thread::sleep", "Thread sleep"),
    ("std::process::Command", "Blocking process spawn"),
    ("reqwest::blocking", "Blocking HTTP client"),
    (".block_on(", "Nested runtime"),
];

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\nBlocking calls found in async production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }

        eprintln!("\nUse instead:");
        eprintln!("  - tokio::fs::read_to_string().await");
        eprintln!("  - tokio::net::TcpListener::bind().await");
        eprintln!("  - reqwest::Client (async)");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.",
            violations.len()
        );
    }
}

/// `std::thread::sleep` is never acceptable, async or not
#[test]
fn test_no_thread_sleep_anywhere() {
    let offenders: Vec<String> = production_sources()
        .into_iter()
        .flat_map(|file| {
            file.code_lines()
                .filter(|(idx, _, code)| {
                    code.contains("std::thread::sleep") && !file.is_test_code(*idx)
                })
                .map(|(_, line_number, _)| format!("{}:{line_number}", file.path.display()))
                .collect::<Vec<_>>()
        })
        .collect();

    assert!(offenders.is_empty(), "thread sleeps found: {offenders:?}");
}

fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        let lines: Vec<&str> = file.lines.iter().map(String::as_str).collect();

        for (idx, line_number, code) in file.code_lines() {
            if file.is_test_code(idx) || !is_in_async_function(&lines, idx) {
                continue;
            }

            for (pattern, kind) in BLOCKING_PATTERNS {
                if code.contains(pattern) {
                    violations.push(format!(
                        "{}:{} - {}: {}",
                        file.path.display(),
                        line_number,
                        kind,
                        file.lines[idx].trim()
                    ));
                }
            }
        }
    }

    violations
}
