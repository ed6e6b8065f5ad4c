//! Request builder: turns a change and its comments into a [`ReviewContext`].

use ai_llm_service::protocol::{HistoryEntry, ReviewContext};

use crate::config::ReviewConfig;
use crate::host::{Change, ExistingComment, PATCHSET_LEVEL};

/// Builds the context of one `ask`.
///
/// Comment history is only sent for comment events, where the model answers
/// threads by their index.
pub fn build_context(
    change: &Change,
    patch: &str,
    comments: &[ExistingComment],
    cfg: &ReviewConfig,
    code_context: Option<String>,
) -> ReviewContext {
    let history = if change.is_comment_event() {
        history_of(comments)
    } else {
        Vec::new()
    };

    ReviewContext {
        change_id: change.id.clone(),
        system: system_prompt(cfg, change.is_comment_event()),
        patch: patch.to_string(),
        history,
        directives: cfg.directives.clone(),
        code_context,
    }
}

fn system_prompt(cfg: &ReviewConfig, comment_event: bool) -> String {
    let mut s = cfg.system_prompt.clone();
    if comment_event {
        s.push_str(
            "\nThe `history` field lists the existing comments. Answer the latest request; \
             set `id` to the history entry your reply belongs to.",
        );
    }
    if cfg.voting {
        s.push_str("\nScore each reply from -5 (must fix) to +5 (good change).");
    }
    s
}

fn history_of(comments: &[ExistingComment]) -> Vec<HistoryEntry> {
    comments
        .iter()
        .enumerate()
        .map(|(id, c)| HistoryEntry {
            id,
            filename: c.filename.clone().filter(|f| f != PATCHSET_LEVEL),
            line_number: c.line,
            author: c.author.clone(),
            message: c.message.clone(),
        })
        .collect()
}
