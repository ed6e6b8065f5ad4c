//! Code locator: maps a model reply to a concrete range of the new file.
//!
//! Policy, in order:
//! 1. a range hint is sliced from the new content (lines clamped, characters
//!    clipped with a whole-line fallback);
//! 2. a bare line hint selects that line (clamped to the file);
//! 3. otherwise (no hint, or only hints at line 0 or below) the snippet is searched in the changed regions by token
//!    similarity, seeded at the file midpoint.
//!
//! The commit-message pseudo file and snippet-less replies are never anchored.

pub mod similarity;

use ai_llm_service::protocol::ReplyRange;
use serde::Serialize;
use tracing::{debug, warn};

use crate::diff::DiffFile;
use similarity::similarity;

/// Pseudo file holding the commit message.
pub const COMMIT_MSG: &str = "/COMMIT_MSG";

/// Default acceptance threshold of the similarity search.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.5;

/// 1-based lines, 0-based character offsets (end exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRange {
    pub start_line: u32,
    pub end_line: u32,
    pub start_character: u32,
    pub end_character: u32,
}

/// Locator result: where, and what text is there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub range: CodeRange,
    pub content: String,
}

#[derive(Debug, Clone, Copy)]
pub struct CodeLocator {
    similarity_threshold: f64,
}

impl Default for CodeLocator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl CodeLocator {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold: similarity_threshold.clamp(0.0, 1.0),
        }
    }

    /// Resolves the best defensible position for one reply.
    ///
    /// Returns `None` for the commit message, a missing snippet, an empty
    /// file, or a similarity search without an acceptable match.
    pub fn locate(
        &self,
        diff: &DiffFile,
        line_hint: Option<i64>,
        range_hint: Option<&ReplyRange>,
        snippet: Option<&str>,
    ) -> Option<Located> {
        if diff.path == COMMIT_MSG {
            return None;
        }
        let snippet = snippet.filter(|s| !s.trim().is_empty())?;
        if diff.is_empty() {
            return None;
        }

        // Models send 0 (or negative) lines to mean "no line".
        let positive = |l: Option<i64>| l.is_some_and(|l| l >= 1);
        if let Some(range) = range_hint.filter(|r| positive(r.start_line) || positive(r.end_line)) {
            return Some(self.slice_range(diff, range));
        }
        if let Some(line) = line_hint.filter(|&l| l >= 1) {
            return Some(self.exact_line(diff, line, snippet));
        }
        self.search(diff, snippet)
    }

    fn slice_range(&self, diff: &DiffFile, hint: &ReplyRange) -> Located {
        let n = diff.line_count();
        let raw_start = hint.start_line.or(hint.end_line).unwrap_or(1);
        let raw_end = hint.end_line.unwrap_or(raw_start);
        let mut start = clamp_line(raw_start, n);
        let mut end = clamp_line(raw_end, n);
        let mut start_char = hint.start_character;
        let mut end_char = hint.end_character;
        if start > end {
            std::mem::swap(&mut start, &mut end);
            std::mem::swap(&mut start_char, &mut end_char);
        }
        if start == end {
            if let (Some(a), Some(b)) = (start_char, end_char) {
                if a > b {
                    std::mem::swap(&mut start_char, &mut end_char);
                }
            }
        }
        if (start as i64, end as i64) != (raw_start.min(raw_end), raw_start.max(raw_end)) {
            debug!(path = %diff.path, raw_start, raw_end, start, end, "range hint clamped");
        }

        let first = diff.line(start).unwrap_or_default();
        let last = diff.line(end).unwrap_or_default();
        let first_len = char_len(first);
        let last_len = char_len(last);

        // Out-of-bounds offsets fall back to the whole line.
        let sc = start_char
            .filter(|&c| c >= 0 && c as u32 <= first_len)
            .map_or(0, |c| c as u32);
        let ec = end_char
            .filter(|&c| c >= 0 && c as u32 <= last_len)
            .map_or(last_len, |c| c as u32);
        let (sc, ec) = if start == end && sc > ec { (0, last_len) } else { (sc, ec) };

        let content = if start == end {
            char_slice(first, sc, ec).to_string()
        } else {
            let mut parts: Vec<&str> = Vec::with_capacity((end - start + 1) as usize);
            parts.push(char_slice(first, sc, first_len));
            for n in start + 1..end {
                parts.push(diff.line(n).unwrap_or_default());
            }
            parts.push(char_slice(last, 0, ec));
            parts.join("\n")
        };

        Located {
            range: CodeRange {
                start_line: start,
                end_line: end,
                start_character: sc,
                end_character: ec,
            },
            content,
        }
    }

    fn exact_line(&self, diff: &DiffFile, hint: i64, snippet: &str) -> Located {
        let n = diff.line_count();
        let line = clamp_line(hint, n);
        if line as i64 != hint {
            warn!(
                path = %diff.path,
                requested = hint,
                resolved = line,
                line_count = n,
                "line hint out of range, clamped"
            );
        }

        let text = diff.line(line).unwrap_or_default();
        let len = char_len(text);
        let first = snippet.lines().map(str::trim).find(|l| !l.is_empty());
        let (sc, ec) = first
            .and_then(|needle| {
                let byte = text.find(needle)?;
                let start = char_len(&text[..byte]);
                Some((start, start + char_len(needle)))
            })
            .unwrap_or((0, len));

        Located {
            range: CodeRange {
                start_line: line,
                end_line: line,
                start_character: sc,
                end_character: ec,
            },
            content: text.to_string(),
        }
    }

    fn search(&self, diff: &DiffFile, snippet: &str) -> Option<Located> {
        let n = diff.line_count();
        let seed = n.div_ceil(2);
        let window = snippet
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count()
            .max(1) as u32;

        let spans = diff.changed_spans();
        let starts: Vec<u32> = if spans.is_empty() {
            (1..=n).collect()
        } else {
            spans
                .iter()
                .flat_map(|s| s.start..s.start + s.len)
                .filter(|&l| l >= 1 && l <= n)
                .collect()
        };

        let mut best: Option<(f64, u32, u32)> = None; // (score, start, end)
        for s in starts {
            let e = (s + window - 1).min(n);
            let text = (s..=e)
                .filter_map(|l| diff.line(l))
                .collect::<Vec<_>>()
                .join("\n");
            let score = similarity(&text, snippet);
            let better = match best {
                None => true,
                Some((bs, bstart, _)) => {
                    score > bs || (score == bs && s.abs_diff(seed) < bstart.abs_diff(seed))
                }
            };
            if better {
                best = Some((score, s, e));
            }
        }

        let (score, start, end) = best?;
        if score < self.similarity_threshold {
            debug!(path = %diff.path, score, threshold = self.similarity_threshold, "no snippet match");
            return None;
        }
        debug!(path = %diff.path, score, start, end, "snippet matched");

        let lines: Vec<&str> = (start..=end).filter_map(|l| diff.line(l)).collect();
        Some(Located {
            range: CodeRange {
                start_line: start,
                end_line: end,
                start_character: 0,
                end_character: lines.last().map_or(0, |l| char_len(l)),
            },
            content: lines.join("\n"),
        })
    }
}

/// Clamps a model-provided line into `[1, n]` (`n >= 1`).
fn clamp_line(raw: i64, n: u32) -> u32 {
    raw.clamp(1, n.max(1) as i64) as u32
}

fn char_len(s: &str) -> u32 {
    s.chars().count() as u32
}

/// Substring by character offsets; offsets must be within `0..=char_len(s)`.
fn char_slice(s: &str, from: u32, to: u32) -> &str {
    let byte_at = |c: u32| {
        s.char_indices()
            .nth(c as usize)
            .map_or(s.len(), |(b, _)| b)
    };
    &s[byte_at(from)..byte_at(to)]
}
