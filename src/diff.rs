//! Unified diff generation.
//!
//! Wraps Myers-based text diffing for the CLI: one [`DiffItem`] per file,
//! git-style headers, binary detection, and a guard against pathological
//! inputs. Output is always assembled per path and callers sort paths, so
//! a diff renders byte-identically no matter what order contents arrived.

use similar::{Algorithm, TextDiff};

/// Lines past this total are not diffed, only summarized.
const MAX_DIFF_LINES: usize = 10_000;
/// Bytes scanned for NUL when deciding whether a file is binary.
const BINARY_SNIFF_LEN: usize = 8_000;

/// A rendered diff for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffItem {
    pub path: String,
    /// Unified diff text; empty when both sides are identical.
    pub data: String,
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

fn side_label(prefix: &str, path: &str, present: bool) -> String {
    if present {
        format!("{prefix}/{path}")
    } else {
        "/dev/null".to_string()
    }
}

/// Render the unified diff between two versions of one file.
///
/// `None` stands for an absent side (added or deleted file). The header
/// mirrors the usual VCS shape: a `diff` line, `---`/`+++` labels with
/// `/dev/null` for absent sides, then the hunks.
pub fn unified(path: &str, old: Option<&[u8]>, new: Option<&[u8]>) -> DiffItem {
    let old_bytes = old.unwrap_or(b"");
    let new_bytes = new.unwrap_or(b"");

    let mut data = String::new();
    if old_bytes == new_bytes && old.is_some() == new.is_some() {
        return DiffItem {
            path: path.to_string(),
            data,
        };
    }

    data.push_str(&format!("diff --pgit a/{path} b/{path}\n"));

    if is_binary(old_bytes) || is_binary(new_bytes) {
        data.push_str(&format!("Binary files a/{path} and b/{path} differ\n"));
        return DiffItem {
            path: path.to_string(),
            data,
        };
    }

    let old_text = String::from_utf8_lossy(old_bytes);
    let new_text = String::from_utf8_lossy(new_bytes);
    let total_lines = old_text.lines().count() + new_text.lines().count();
    if total_lines > MAX_DIFF_LINES {
        data.push_str(&format!(
            "File too large to diff: {total_lines} lines in a/{path} + b/{path}\n"
        ));
        return DiffItem {
            path: path.to_string(),
            data,
        };
    }

    data.push_str(&format!("--- {}\n", side_label("a", path, old.is_some())));
    data.push_str(&format!("+++ {}\n", side_label("b", path, new.is_some())));

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(old_text.as_ref(), new_text.as_ref());
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        data.push_str(&hunk.header().to_string());
        data.push('\n');
        for change in hunk.iter_changes() {
            data.push_str(change.tag().to_string().as_str());
            data.push_str(change.value());
            if !change.value().ends_with('\n') {
                data.push_str("\n\\ No newline at end of file\n");
            }
        }
    }

    DiffItem {
        path: path.to_string(),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_sides_render_empty() {
        let item = unified("a.txt", Some(b"same\n"), Some(b"same\n"));
        assert!(item.data.is_empty());
    }

    #[test]
    fn test_modification_hunk() {
        let item = unified("a.txt", Some(b"one\ntwo\n"), Some(b"one\nTWO\n"));
        assert!(item.data.contains("diff --pgit a/a.txt b/a.txt"));
        assert!(item.data.contains("--- a/a.txt"));
        assert!(item.data.contains("+++ b/a.txt"));
        assert!(item.data.contains("-two\n"));
        assert!(item.data.contains("+TWO\n"));
        assert!(item.data.contains(" one\n"));
    }

    #[test]
    fn test_added_file_uses_dev_null() {
        let item = unified("new.txt", None, Some(b"fresh\n"));
        assert!(item.data.contains("--- /dev/null"));
        assert!(item.data.contains("+++ b/new.txt"));
        assert!(item.data.contains("+fresh\n"));
    }

    #[test]
    fn test_deleted_file_uses_dev_null() {
        let item = unified("old.txt", Some(b"bye\n"), None);
        assert!(item.data.contains("--- a/old.txt"));
        assert!(item.data.contains("+++ /dev/null"));
        assert!(item.data.contains("-bye\n"));
    }

    #[test]
    fn test_binary_detection() {
        let item = unified("blob.bin", Some(b"\x00\x01\x02"), Some(b"\x00\x09\x08"));
        assert!(item.data.contains("Binary files"));
        assert!(!item.data.contains("@@"));
    }

    /// Byte-identical output across runs for the same inputs.
    #[test]
    fn test_deterministic_output() {
        let a = unified("a.txt", Some(b"1\n2\n3\n"), Some(b"1\nX\n3\n"));
        let b = unified("a.txt", Some(b"1\n2\n3\n"), Some(b"1\nX\n3\n"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_trailing_newline_is_flagged() {
        let item = unified("a.txt", Some(b"line\n"), Some(b"line"));
        assert!(item.data.contains("\\ No newline at end of file"));
    }
}
