//! Integration Test: Blocking Call Prohibition
//!
//! The gateway is a request-directed async system; every wait must be a wait
//! on I/O or a timer owned by the runtime.
//!
//! **Policy**: production code MUST NOT call `std::thread::sleep`, and
//! blocking filesystem I/O is confined to startup (config loading) and
//! platform probing (sysfs power state).
//!
//! Test code is exempt: everything after a `#[cfg(test)]` marker in a file
//! is treated as test-only, which matches the colocated-test layout used
//! throughout the workspace.

use std::fs;
use std::path::{Path, PathBuf};

/// Directories holding production code, relative to the workspace root
const PRODUCTION_DIRS: &[&str] = &["modelgate/core/src", "modelgate/daemon/src"];

/// Files allowed to use blocking filesystem I/O
const BLOCKING_FS_ALLOWED: &[&str] = &[
    // Config loading happens before the runtime serves traffic
    "modelgate/core/src/config.rs",
    // Sysfs power-state probes are tiny sub-microsecond reads
    "modelgate/core/src/routing/policy.rs",
    // Daemon startup runs before the accept loop
    "modelgate/daemon/src/main.rs",
];

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// A source file split into its production prefix (test suffix dropped)
fn production_lines(path: &Path) -> Option<Vec<String>> {
    let content = fs::read_to_string(path).ok()?;
    let mut lines = Vec::new();
    for line in content.lines() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }
        // Strip line comments so commented-out code cannot trip the check
        let code = line.split("//").next().unwrap_or(line);
        lines.push(code.to_string());
    }
    Some(lines)
}

fn for_each_production_file(mut visit: impl FnMut(&Path, &[String])) {
    let root = workspace_root();
    for dir in PRODUCTION_DIRS {
        let dir_path = root.join(dir);
        assert!(
            dir_path.exists(),
            "production dir missing: {} (was the workspace restructured?)",
            dir_path.display()
        );

        for entry in walkdir::WalkDir::new(&dir_path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Some(lines) = production_lines(entry.path()) {
                visit(entry.path(), &lines);
            }
        }
    }
}

#[test]
fn test_no_thread_sleep_in_production_code() {
    let mut violations = Vec::new();

    for_each_production_file(|path, lines| {
        for (idx, line) in lines.iter().enumerate() {
            if line.contains("std::thread::sleep") || line.contains("thread::sleep(") {
                violations.push(format!("{}:{}: {}", path.display(), idx + 1, line.trim()));
            }
        }
    });

    assert!(
        violations.is_empty(),
        "std::thread::sleep found in production code (block the runtime never):\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_blocking_fs_confined_to_allowed_files() {
    let root = workspace_root();
    let allowed: Vec<PathBuf> = BLOCKING_FS_ALLOWED
        .iter()
        .map(|p| root.join(p).canonicalize().expect("allowed file must exist"))
        .collect();

    let mut violations = Vec::new();

    for_each_production_file(|path, lines| {
        let canonical = path.canonicalize().expect("walked file must exist");
        if allowed.contains(&canonical) {
            return;
        }
        for (idx, line) in lines.iter().enumerate() {
            if line.contains("std::fs::") || line.contains("use std::fs") {
                violations.push(format!("{}:{}: {}", path.display(), idx + 1, line.trim()));
            }
        }
    });

    assert!(
        violations.is_empty(),
        "blocking filesystem I/O outside the allowed startup/probing files:\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_no_unwrap_or_expect_in_core_production_code() {
    let root = workspace_root();
    let core = root.join("modelgate/core/src");
    let mut violations = Vec::new();

    for entry in walkdir::WalkDir::new(&core)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        // test_utils is compiled only under cfg(test)
        if entry.path().ends_with("routing/test_utils.rs") {
            continue;
        }
        let Some(lines) = production_lines(entry.path()) else {
            continue;
        };
        for (idx, line) in lines.iter().enumerate() {
            if line.contains(".unwrap()") || line.contains(".expect(") {
                violations.push(format!(
                    "{}:{}: {}",
                    entry.path().display(),
                    idx + 1,
                    line.trim()
                ));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "unwrap/expect on fallible paths in core production code (propagate with ?):\n{}",
        violations.join("\n")
    );
}
