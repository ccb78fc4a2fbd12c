//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No sleep() calls in production code (wait on I/O or use intervals)
//! - No blocking I/O inside async functions
//!
//! The helpers here locate the workspace's production sources and classify
//! lines so each test only has to express its own policy.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["arena/core/src", "arena/daemon/src"];

/// Files that exist to support tests and may do what production code may not
pub const TEST_SUPPORT_FILES: &[&str] = &["arena/core/src/testing.rs"];

/// A loaded source file
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// File contents split into lines
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Index of the first line belonging to a `#[cfg(test)]` module, if any
    #[must_use]
    pub fn test_module_start(&self) -> Option<usize> {
        self.lines.iter().enumerate().find_map(|(idx, line)| {
            let next = self.lines.get(idx + 1).map(|l| l.trim());
            (line.trim() == "#[cfg(test)]" && next.is_some_and(|l| l.starts_with("mod ")))
                .then_some(idx)
        })
    }

    /// Whether `idx` falls inside the test module or a test function
    #[must_use]
    pub fn is_test_code(&self, idx: usize) -> bool {
        if self.test_module_start().is_some_and(|start| idx >= start) {
            return true;
        }
        let lines: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        is_in_test_function(&lines, idx)
    }

    /// Iterate `(index, line_number, code)` with comments stripped
    pub fn code_lines(&self) -> impl Iterator<Item = (usize, usize, &str)> {
        self.lines
            .iter()
            .enumerate()
            .map(|(idx, line)| (idx, idx + 1, code_part(line)))
    }
}

/// Workspace root, found from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Load every production `.rs` file, skipping test-support files
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut sources = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            if TEST_SUPPORT_FILES
                .iter()
                .any(|support| relative == Path::new(support))
            {
                continue;
            }

            if let Ok(content) = fs::read_to_string(entry.path()) {
                sources.push(SourceFile {
                    path: relative,
                    lines: content.lines().map(str::to_string).collect(),
                });
            }
        }
    }

    sources
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Check if line is inside a test function
#[must_use]
pub fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..=current_idx).rev() {
        let line = lines[i].trim();

        if is_fn_signature(line) {
            // The attributes directly above the nearest enclosing fn decide
            return lines[..i]
                .iter()
                .rev()
                .map(|l| l.trim())
                .take_while(|l| l.starts_with("#[") || l.starts_with("///"))
                .any(|l| l.starts_with("#[test]") || l.starts_with("#[tokio::test"));
        }

        // Stop at module boundaries
        if line.starts_with("mod ") || line.starts_with("impl ") {
            return false;
        }
    }
    false
}

/// Whether the nearest enclosing function is `async`
#[must_use]
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..=current_idx).rev() {
        let line = lines[i].trim();
        if is_fn_signature(line) {
            return line.contains("async fn ");
        }
        if line.contains("async move {") || line.contains("async {") {
            return true;
        }
    }
    false
}

fn is_fn_signature(line: &str) -> bool {
    let line = line
        .trim_start_matches("pub(crate) ")
        .trim_start_matches("pub(super) ")
        .trim_start_matches("pub ");
    line.starts_with("fn ") || line.starts_with("async fn ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_contains_arena() {
        assert!(workspace_root().join("arena").is_dir());
    }

    #[test]
    fn test_production_sources_found() {
        let sources = production_sources();
        assert!(sources
            .iter()
            .any(|s| s.path.ends_with("arena/core/src/merge.rs")));
        assert!(!sources
            .iter()
            .any(|s| s.path.ends_with("arena/core/src/testing.rs")));
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
    }

    #[test]
    fn test_test_module_detection() {
        let file = SourceFile {
            path: PathBuf::from("x.rs"),
            lines: ["fn real() {}", "", "#[cfg(test)]", "mod tests {", "    fn helper() {}", "}"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        };
        assert_eq!(file.test_module_start(), Some(2));
        assert!(!file.is_test_code(0));
        assert!(file.is_test_code(4));
    }

    #[test]
    fn test_async_function_detection() {
        let lines = [
            "fn load() {",
            "    let s = std::fs::read_to_string(p);",
            "}",
            "pub async fn serve() {",
            "    let s = std::fs::read_to_string(p);",
            "}",
        ];
        assert!(!is_in_async_function(&lines, 1));
        assert!(is_in_async_function(&lines, 4));
    }

    #[test]
    fn test_test_function_detection() {
        let lines = [
            "#[tokio::test]",
            "async fn test_thing() {",
            "    tokio::time::sleep(d).await;",
            "}",
        ];
        assert!(is_in_test_function(&lines, 2));

        let lines = ["fn bad_function() {", "    tokio::time::sleep(d).await;", "}"];
        assert!(!is_in_test_function(&lines, 1));
    }
}
