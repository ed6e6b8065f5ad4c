//! Diff model of one file: new content plus the hunks that produced it.
//!
//! A [`DiffFile`] is immutable once built. Line numbers are 1-based and
//! refer to the new (post-change) file unless stated otherwise.

use crate::errors::ParseError;
use crate::parser::{DiffLine, looks_like_binary_patch, parse_unified_diff_advanced};

/// Processed diff section as delivered by a review host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSection {
    /// Lines identical on both sides.
    Unchanged(Vec<String>),
    /// Lines removed from the old file and lines added to the new one.
    Changed {
        removed: Vec<String>,
        added: Vec<String>,
    },
}

/// Inclusive-start line span; `len == 0` marks an insertion/deletion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    pub start: u32,
    pub len: u32,
}

impl LineSpan {
    /// Last line of the span, `None` when empty.
    pub fn last(&self) -> Option<u32> {
        (self.len > 0).then(|| self.start + self.len - 1)
    }

    pub fn contains(&self, line: u32) -> bool {
        self.last().is_some_and(|last| line >= self.start && line <= last)
    }
}

/// Hunk payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkBody {
    /// Placeholder: the text lives in [`DiffFile::new_content_lines`].
    Unchanged,
    Changed { removed: Vec<String>, added: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old: LineSpan,
    pub new: LineSpan,
    pub body: HunkBody,
}

impl Hunk {
    pub fn is_changed(&self) -> bool {
        matches!(self.body, HunkBody::Changed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFile {
    pub path: String,
    new_content_lines: Vec<String>,
    hunks: Vec<Hunk>,
}

impl DiffFile {
    /// Builds the model from host-processed sections, in file order.
    pub fn from_sections(path: impl Into<String>, sections: Vec<DiffSection>) -> Self {
        let mut new_content_lines = Vec::new();
        let mut hunks = Vec::new();
        let mut old_cursor = 1u32;
        let mut new_cursor = 1u32;

        for section in sections {
            match section {
                DiffSection::Unchanged(lines) => {
                    if lines.is_empty() {
                        continue;
                    }
                    let len = lines.len() as u32;
                    hunks.push(Hunk {
                        old: LineSpan { start: old_cursor, len },
                        new: LineSpan { start: new_cursor, len },
                        body: HunkBody::Unchanged,
                    });
                    new_content_lines.extend(lines);
                    old_cursor += len;
                    new_cursor += len;
                }
                DiffSection::Changed { removed, added } => {
                    if removed.is_empty() && added.is_empty() {
                        continue;
                    }
                    let old_len = removed.len() as u32;
                    let new_len = added.len() as u32;
                    hunks.push(Hunk {
                        old: LineSpan { start: old_cursor, len: old_len },
                        new: LineSpan { start: new_cursor, len: new_len },
                        body: HunkBody::Changed { removed, added: new_len },
                    });
                    new_content_lines.extend(added);
                    old_cursor += old_len;
                    new_cursor += new_len;
                }
            }
        }

        Self {
            path: path.into(),
            new_content_lines,
            hunks,
        }
    }

    /// Builds the model from a single-file unified diff and the full new content.
    ///
    /// Regions between hunks are taken from `new_content`; hunk context and
    /// added lines come from the patch.
    pub fn from_unified(
        path: impl Into<String>,
        new_content: &str,
        patch: &str,
    ) -> Result<Self, ParseError> {
        let path = path.into();
        if looks_like_binary_patch(patch) {
            return Err(ParseError::Binary(path));
        }
        let parsed = parse_unified_diff_advanced(patch)?;
        if parsed.is_empty() {
            return Err(ParseError::NoHunks(path));
        }

        let content: Vec<&str> = new_content.lines().collect();
        let gap = |from: u32, to: u32| -> Vec<String> {
            // new-file lines [from, to)
            (from..to)
                .filter_map(|n| content.get(n as usize - 1).map(|s| s.to_string()))
                .collect()
        };

        let mut sections = Vec::new();
        let mut next_new = 1u32;
        for hunk in &parsed {
            let hunk_start = hunk.new_start.max(1);
            if hunk_start > next_new {
                sections.push(DiffSection::Unchanged(gap(next_new, hunk_start)));
            }

            let mut removed: Vec<String> = Vec::new();
            let mut added: Vec<String> = Vec::new();
            for line in &hunk.lines {
                match line {
                    DiffLine::Removed { content, .. } => removed.push(content.clone()),
                    DiffLine::Added { content, .. } => added.push(content.clone()),
                    DiffLine::Context { content, .. } => {
                        if !removed.is_empty() || !added.is_empty() {
                            sections.push(DiffSection::Changed {
                                removed: std::mem::take(&mut removed),
                                added: std::mem::take(&mut added),
                            });
                        }
                        sections.push(DiffSection::Unchanged(vec![content.clone()]));
                    }
                }
            }
            if !removed.is_empty() || !added.is_empty() {
                sections.push(DiffSection::Changed { removed, added });
            }
            next_new = hunk_start.max(next_new) + new_lines_in(hunk);
        }
        let total = content.len() as u32;
        if next_new <= total {
            sections.push(DiffSection::Unchanged(gap(next_new, total + 1)));
        }

        Ok(Self::from_sections(path, merge_unchanged(sections)))
    }

    pub fn new_content_lines(&self) -> &[String] {
        &self.new_content_lines
    }

    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    pub fn line_count(&self) -> u32 {
        self.new_content_lines.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.new_content_lines.is_empty()
    }

    /// Content of a 1-based new-file line.
    pub fn line(&self, n: u32) -> Option<&str> {
        let idx = (n as usize).checked_sub(1)?;
        self.new_content_lines.get(idx).map(String::as_str)
    }

    /// New-file line spans touched by changes (added lines only), in order.
    pub fn changed_spans(&self) -> Vec<LineSpan> {
        self.hunks
            .iter()
            .filter(|h| h.is_changed() && h.new.len > 0)
            .map(|h| h.new)
            .collect()
    }

    /// Diff-relative position of a new-file line.
    ///
    /// Positions count rendered diff rows from 1: unchanged lines once,
    /// changed hunks as their removed rows followed by their added rows.
    pub fn position_of(&self, new_line: u32) -> Option<u32> {
        let mut pos = 0u32;
        for h in &self.hunks {
            match &h.body {
                HunkBody::Unchanged => {
                    if h.new.contains(new_line) {
                        return Some(pos + new_line - h.new.start + 1);
                    }
                    pos += h.new.len;
                }
                HunkBody::Changed { removed, added } => {
                    pos += removed.len() as u32;
                    if h.new.contains(new_line) {
                        return Some(pos + new_line - h.new.start + 1);
                    }
                    pos += added;
                }
            }
        }
        None
    }
}

fn new_lines_in(hunk: &crate::parser::DiffHunk) -> u32 {
    hunk.lines
        .iter()
        .filter(|l| !matches!(l, DiffLine::Removed { .. }))
        .count() as u32
}

/// Joins adjacent unchanged sections.
fn merge_unchanged(sections: Vec<DiffSection>) -> Vec<DiffSection> {
    let mut out: Vec<DiffSection> = Vec::with_capacity(sections.len());
    for s in sections {
        match (out.last_mut(), s) {
            (Some(DiffSection::Unchanged(prev)), DiffSection::Unchanged(more)) => prev.extend(more),
            (_, s) => out.push(s),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> DiffFile {
        DiffFile::from_sections(
            "src/a.rs",
            vec![
                DiffSection::Unchanged(lines(&["fn a() {}", ""])),
                DiffSection::Changed {
                    removed: lines(&["fn b() {}"]),
                    added: lines(&["fn b() -> u8 {", "    1", "}"]),
                },
                DiffSection::Unchanged(lines(&["fn c() {}"])),
            ],
        )
    }

    #[test]
    fn sections_build_content_and_spans() {
        let f = sample();
        assert_eq!(f.line_count(), 6);
        assert_eq!(f.line(3), Some("fn b() -> u8 {"));
        assert_eq!(f.line(0), None);
        assert_eq!(f.line(7), None);

        let h = &f.hunks()[1];
        assert_eq!(h.old, LineSpan { start: 3, len: 1 });
        assert_eq!(h.new, LineSpan { start: 3, len: 3 });
        assert_eq!(f.changed_spans(), vec![LineSpan { start: 3, len: 3 }]);
    }

    #[test]
    fn positions_count_removed_rows() {
        let f = sample();
        assert_eq!(f.position_of(1), Some(1));
        assert_eq!(f.position_of(2), Some(2));
        // row 3 is the removed `fn b() {}`
        assert_eq!(f.position_of(3), Some(4));
        assert_eq!(f.position_of(6), Some(7));
        assert_eq!(f.position_of(42), None);
    }

    #[test]
    fn unified_patch_with_full_content() {
        let new_content = "a\nb\nc\nd\nE\nf\ng\nh\n";
        let patch = "@@ -4,3 +4,3 @@\n d\n-e\n+E\n f\n";
        let f = DiffFile::from_unified("x.txt", new_content, patch).unwrap();

        assert_eq!(f.line_count(), 8);
        assert_eq!(f.line(5), Some("E"));
        assert_eq!(f.changed_spans(), vec![LineSpan { start: 5, len: 1 }]);
        assert_eq!(f.hunks().len(), 3);
        assert!(matches!(
            &f.hunks()[1].body,
            HunkBody::Changed { removed, added: 1 } if removed == &vec!["e".to_string()]
        ));
    }

    #[test]
    fn binary_and_empty_patches_are_rejected() {
        assert!(matches!(
            DiffFile::from_unified("i.png", "", "Binary files a/i.png and b/i.png differ"),
            Err(ParseError::Binary(_))
        ));
        assert!(matches!(
            DiffFile::from_unified("x", "a", "no hunks here"),
            Err(ParseError::NoHunks(_))
        ));
        assert!(matches!(
            DiffFile::from_unified("x", "a", "@@ -1 +one @@\n-a\n+b\n"),
            Err(ParseError::InvalidHunkHeader(_))
        ));
    }
}
