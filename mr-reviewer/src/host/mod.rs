//! Review host facade: where patches come from and where batches go.
//!
//! Plain `impl Future + Send` trait methods and generic dispatch; no
//! async-trait and no boxed futures.

use std::collections::BTreeMap;
use std::future::Future;

use serde::Serialize;

use crate::chunk::ChunkRecord;
use crate::diff::DiffFile;
use crate::errors::MrResult;
use crate::locate::CodeRange;

/// Filename of review-level (positionless) batches.
pub const PATCHSET_LEVEL: &str = "/PATCHSET_LEVEL";

/// What triggered the review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A new patch set was uploaded.
    PatchSet,
    /// A user addressed the reviewer in a comment.
    Comment,
}

/// The change under review, as seen by the assembler.
#[derive(Debug, Clone)]
pub struct Change {
    pub id: String,
    pub event: EventKind,
    /// Message already attached by the host (e.g. merge or rebase notice).
    pub system_message: Option<String>,
    /// Review disabled for this change.
    pub hide_review: bool,
    /// Review explicitly requested despite `hide_review`.
    pub force_review: bool,
}

impl Change {
    pub fn patch_set(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event: EventKind::PatchSet,
            system_message: None,
            hide_review: false,
            force_review: false,
        }
    }

    pub fn comment(id: impl Into<String>) -> Self {
        Self {
            event: EventKind::Comment,
            ..Self::patch_set(id)
        }
    }

    pub fn is_comment_event(&self) -> bool {
        self.event == EventKind::Comment
    }
}

/// Existing comment, in the host's order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingComment {
    pub id: String,
    pub filename: Option<String>,
    pub line: Option<u32>,
    pub range: Option<CodeRange>,
    pub author: Option<String>,
    pub message: String,
}

impl ExistingComment {
    /// Has a file/line anchor a reply can be attached to.
    pub fn is_inline(&self) -> bool {
        self.filename
            .as_deref()
            .is_some_and(|f| !f.is_empty() && f != PATCHSET_LEVEL)
            && (self.line.is_some() || self.range.is_some())
    }
}

/// One finalized comment handed to [`ReviewHost::submit_review`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewBatch {
    /// Existing comment this batch replies to.
    pub id: Option<String>,
    pub content: String,
    pub filename: String,
    pub line: Option<u32>,
    pub range: Option<CodeRange>,
}

impl ReviewBatch {
    /// Positionless batch.
    pub fn review_level(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            filename: PATCHSET_LEVEL.to_string(),
            line: None,
            range: None,
        }
    }

    pub fn is_review_level(&self) -> bool {
        self.filename == PATCHSET_LEVEL
    }
}

pub trait ReviewHost {
    /// Full patch text of the current patch set.
    fn get_patch_set(&self, change: &Change) -> impl Future<Output = MrResult<String>> + Send;

    /// Per-file diff models keyed by path.
    fn get_file_diffs_processed(
        &self,
        change: &Change,
    ) -> impl Future<Output = MrResult<BTreeMap<String, DiffFile>>> + Send;

    /// Existing comments, index-addressable in this order.
    fn get_comment_properties(
        &self,
        change: &Change,
    ) -> impl Future<Output = MrResult<Vec<ExistingComment>>> + Send;

    fn submit_review(
        &self,
        change: &Change,
        batches: &[ReviewBatch],
        score: Option<i64>,
    ) -> impl Future<Output = MrResult<()>> + Send;

    /// Repository sources available for code context.
    fn repository_files(
        &self,
        _change: &Change,
    ) -> impl Future<Output = MrResult<Vec<ChunkRecord>>> + Send {
        async { Ok(Vec::new()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_comments_need_file_and_position() {
        let mut c = ExistingComment {
            id: "c1".into(),
            filename: Some("src/a.rs".into()),
            line: Some(3),
            ..Default::default()
        };
        assert!(c.is_inline());

        c.line = None;
        assert!(!c.is_inline());

        c.line = Some(1);
        c.filename = Some(PATCHSET_LEVEL.into());
        assert!(!c.is_inline());
    }

    #[test]
    fn review_level_batch_uses_sentinel() {
        let b = ReviewBatch::review_level("hello");
        assert!(b.is_review_level());
        assert_eq!(b.line, None);
    }
}
