//! Extended unified-diff parser.
//!
//! Features:
//! - Works even if file headers (---/+++) are missing (hunks-only input).
//! - Ignores `\ No newline at end of file` marker lines.
//! - Binary patches heuristics (`GIT binary patch`, `Binary files ... differ`).
//! - Splits a multi-file patch set into per-file patches.
//!
//! A line starting with `@@` that is not a well-formed hunk header is an
//! error, never skipped.
//!
//! It produces host-agnostic hunks/lines; [`crate::diff::DiffFile`] turns
//! them into the diff model used by the locator.

use crate::errors::ParseError;

/// One line of a unified diff hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Added {
        new_line: u32,
        content: String,
    },
    Removed {
        old_line: u32,
        content: String,
    },
    Context {
        old_line: u32,
        new_line: u32,
        content: String,
    },
}

/// A diff hunk (continuous block of changes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub lines: Vec<DiffLine>,
}

/// Patch text of a single file inside a patch set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// New path (old path for deletions), without `a/`/`b/` prefixes.
    pub path: String,
    pub patch: String,
}

/// Parses unified diff string into hunks/lines.
/// Robust to missing file headers; only `@@` headers are required.
///
/// # Errors
/// [`ParseError::InvalidHunkHeader`] for a malformed `@@` line.
pub fn parse_unified_diff_advanced(s: &str) -> Result<Vec<DiffHunk>, ParseError> {
    let mut hunks = Vec::new();
    let mut cur_old_start = 0u32;
    let mut cur_old_lines = 0u32;
    let mut cur_new_start = 0u32;
    let mut cur_new_lines = 0u32;
    let mut lines_buf: Vec<DiffLine> = Vec::new();
    let mut old_line = 0u32;
    let mut new_line = 0u32;
    let mut in_hunk = false;

    for line in s.lines() {
        if line.starts_with("@@") {
            if in_hunk && !lines_buf.is_empty() {
                hunks.push(DiffHunk {
                    old_start: cur_old_start,
                    old_lines: cur_old_lines,
                    new_start: cur_new_start,
                    new_lines: cur_new_lines,
                    lines: std::mem::take(&mut lines_buf),
                });
            }
            let Some((o, n)) = parse_hunk_header(line) else {
                return Err(ParseError::InvalidHunkHeader(line.to_string()));
            };
            (cur_old_start, cur_old_lines) = o;
            (cur_new_start, cur_new_lines) = n;
            old_line = cur_old_start;
            new_line = cur_new_start;
            in_hunk = true;
            continue;
        }

        // Marker lines are not part of the content.
        if line.starts_with("\\ ") {
            continue;
        }

        // A new file header ends the current hunk (multi-file input).
        if line.starts_with("diff --git ") {
            if in_hunk && !lines_buf.is_empty() {
                hunks.push(DiffHunk {
                    old_start: cur_old_start,
                    old_lines: cur_old_lines,
                    new_start: cur_new_start,
                    new_lines: cur_new_lines,
                    lines: std::mem::take(&mut lines_buf),
                });
            }
            in_hunk = false;
            continue;
        }

        if !in_hunk {
            continue;
        }

        if let Some(rest) = line.strip_prefix('+') {
            lines_buf.push(DiffLine::Added {
                new_line,
                content: rest.to_string(),
            });
            new_line += 1;
        } else if let Some(rest) = line.strip_prefix('-') {
            lines_buf.push(DiffLine::Removed {
                old_line,
                content: rest.to_string(),
            });
            old_line += 1;
        } else {
            let content = line.strip_prefix(' ').unwrap_or(line);
            lines_buf.push(DiffLine::Context {
                old_line,
                new_line,
                content: content.to_string(),
            });
            old_line += 1;
            new_line += 1;
        }

        // Header counts satisfied: trailing lines belong to the next file.
        if old_line >= cur_old_start + cur_old_lines && new_line >= cur_new_start + cur_new_lines {
            hunks.push(DiffHunk {
                old_start: cur_old_start,
                old_lines: cur_old_lines,
                new_start: cur_new_start,
                new_lines: cur_new_lines,
                lines: std::mem::take(&mut lines_buf),
            });
            in_hunk = false;
        }
    }

    if in_hunk && !lines_buf.is_empty() {
        hunks.push(DiffHunk {
            old_start: cur_old_start,
            old_lines: cur_old_lines,
            new_start: cur_new_start,
            new_lines: cur_new_lines,
            lines: lines_buf,
        });
    }
    Ok(hunks)
}

/// `@@ -a,b +c,d @@ ...` → `((a, b), (c, d))`.
fn parse_hunk_header(line: &str) -> Option<((u32, u32), (u32, u32))> {
    let body = line.strip_prefix("@@")?;
    let end = body.find("@@")?;
    let (left, right) = body[..end].trim().split_once('+')?;
    let left = left.trim().strip_prefix('-')?;
    Some((split_nums(left)?, split_nums(right)?))
}

/// Splits "12,7" or "12" into (start, len). A missing length means one line.
fn split_nums(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    match s.split_once(',') {
        Some((a, b)) => Some((a.parse().ok()?, b.parse().ok()?)),
        None => Some((s.parse().ok()?, 1)),
    }
}

/// Simple heuristic to detect binary patches or messages in unified diff.
pub fn looks_like_binary_patch(s: &str) -> bool {
    s.contains("GIT binary patch")
        || s.starts_with("Binary files ")
        || s.lines().any(|l| l.starts_with("Binary files ") && l.ends_with(" differ"))
        || (s.starts_with("Files ") && s.contains(" differ"))
}

/// Splits a patch set into per-file patches, in patch order.
///
/// Files are delimited by `diff --git` headers; plain `---`/`+++` pairs are
/// accepted too. Hunks-only input yields one entry with an empty path.
pub fn split_patch_set(patch: &str) -> Vec<FilePatch> {
    let lines: Vec<&str> = patch.lines().collect();
    let mut out: Vec<FilePatch> = Vec::new();
    let mut cur: Option<(Option<String>, Vec<&str>)> = None;
    let mut seen_hunk = false;

    for (i, &line) in lines.iter().enumerate() {
        let starts_plain_header = line.starts_with("--- ")
            && lines.get(i + 1).is_some_and(|n| n.starts_with("+++ "))
            && (cur.is_none() || seen_hunk);

        if line.starts_with("diff --git ") || starts_plain_header {
            flush_file(&mut cur, &mut out);
            seen_hunk = false;
            let path = line
                .strip_prefix("diff --git ")
                .and_then(|rest| rest.rsplit_once(" b/"))
                .map(|(_, b)| b.to_string());
            cur = Some((path, vec![line]));
            continue;
        }

        let entry = cur.get_or_insert_with(|| (None, Vec::new()));
        if line.starts_with("@@") {
            seen_hunk = true;
        } else if !seen_hunk {
            if let Some(p) = line.strip_prefix("+++ ").and_then(header_path) {
                entry.0 = Some(p);
            } else if let Some(p) = line.strip_prefix("--- ") {
                if entry.0.is_none() {
                    entry.0 = header_path(p);
                }
            }
        }
        entry.1.push(line);
    }
    flush_file(&mut cur, &mut out);
    out
}

fn flush_file(cur: &mut Option<(Option<String>, Vec<&str>)>, out: &mut Vec<FilePatch>) {
    if let Some((path, body)) = cur.take() {
        if !body.is_empty() {
            out.push(FilePatch {
                path: path.unwrap_or_default(),
                patch: body.join("\n"),
            });
        }
    }
}

/// Paths of all files in a patch set.
pub fn patch_files(patch: &str) -> Vec<String> {
    split_patch_set(patch)
        .into_iter()
        .map(|f| f.path)
        .filter(|p| !p.is_empty())
        .collect()
}

/// `b/src/x.rs\t2024-...` → `src/x.rs`; `/dev/null` → `None`.
fn header_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" || raw.is_empty() {
        return None;
    }
    let p = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(p.to_string())
}
