//! Review batch assembly: model reply → positioned, filtered batches.
//!
//! Flow:
//!   1) Comment metadata and patch from the host;
//!   2) Suppression and size gates (no model call);
//!   3) One `ask` through the model client;
//!   4) Per-reply policy (visibility, score accumulation);
//!   5) Anchoring: thread index for comment events, locator otherwise;
//!   6) Dedup, vote, submit.
//!
//! The reviewer always gets an outcome: AI comments, a size notice or a
//! connection-failure notice. Only host errors and caller cancellation
//! surface as errors.
//!
//! Logs:
//! - `INFO`: final summary (#replies, #batches, #hidden, score, timing)
//! - `DEBUG`: per-stage decisions.

pub mod filename;
pub mod policy;
pub mod prompt;

use std::collections::BTreeMap;
use std::time::Instant;

use ai_llm_service::error_handler::SessionError;
use ai_llm_service::protocol::{ReplyItem, ResponseContent};
use ai_llm_service::session::ModelClient;
use tracing::{debug, info, warn};

use crate::chunk::{ChunkSink, upload_in_chunks};
use crate::config::ReviewConfig;
use crate::context::collect_callee_context;
use crate::diff::DiffFile;
use crate::errors::{Error, MrResult};
use crate::host::{Change, ExistingComment, ReviewBatch, ReviewHost};
use crate::locate::CodeLocator;
use policy::{classify, dedup_in_place, final_score};

/// What was submitted for one change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub batches: Vec<ReviewBatch>,
    pub score: Option<i64>,
}

/// Per-invocation accumulators.
#[derive(Debug, Default)]
struct Assembly {
    batches: Vec<ReviewBatch>,
    scores: Vec<i64>,
    hidden: usize,
}

pub struct Reviewer<H, M> {
    host: H,
    model: M,
    cfg: ReviewConfig,
    locator: CodeLocator,
}

impl<H, M> Reviewer<H, M>
where
    H: ReviewHost + Sync,
    M: ModelClient + Sync,
{
    pub fn new(host: H, model: M, cfg: ReviewConfig) -> Self {
        let locator = CodeLocator::new(cfg.similarity_threshold);
        Self {
            host,
            model,
            cfg,
            locator,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.cfg
    }

    /// Runs one review and submits its outcome.
    ///
    /// # Errors
    /// Host failures, and [`Error::Cancelled`] when the model client was
    /// cancelled (nothing is submitted then).
    pub async fn review(&self, change: &Change) -> MrResult<ReviewOutcome> {
        let t0 = Instant::now();

        let comments = self.host.get_comment_properties(change).await?;
        let patch = self.host.get_patch_set(change).await?;
        debug!(change = %change.id, comments = comments.len(), patch_bytes = patch.len(), "review: inputs fetched");

        if is_suppressed(change) {
            info!(change = %change.id, "review: suppressed by policy, submitting nothing");
            return self.submit(change, ReviewOutcome::default()).await;
        }

        let patch_lines = patch.lines().count();
        if patch_lines > self.cfg.max_review_lines {
            info!(
                change = %change.id,
                patch_lines,
                max_review_lines = self.cfg.max_review_lines,
                "review: patch too large"
            );
            let outcome = ReviewOutcome {
                batches: vec![ReviewBatch::review_level(&self.cfg.too_large_message)],
                score: None,
            };
            return self.submit(change, outcome).await;
        }

        let diff_files = self.host.get_file_diffs_processed(change).await?;
        let code_context = if self.cfg.code_context {
            let repo = self.host.repository_files(change).await?;
            collect_callee_context(&diff_files, &repo, self.cfg.code_context_max_chars)
        } else {
            None
        };

        let ctx = prompt::build_context(change, &patch, &comments, &self.cfg, code_context);
        let response = match self.model.ask(&ctx).await {
            Ok(r) => r,
            Err(SessionError::Cancelled) => {
                info!(change = %change.id, "review: cancelled by caller");
                return Err(Error::Cancelled);
            }
            Err(e) => {
                warn!(change = %change.id, error = %e, "review: model unavailable, posting notice");
                let outcome = ReviewOutcome {
                    batches: vec![ReviewBatch::review_level(
                        &self.cfg.connection_failed_message,
                    )],
                    score: None,
                };
                return self.submit(change, outcome).await;
            }
        };

        let replies = response.replies.as_ref().map_or(0, Vec::len);
        let mut asm = self.assemble(change, response, &comments, &diff_files);
        let duplicates = dedup_in_place(&mut asm.batches);
        let score = final_score(&asm.scores, self.cfg.voting, change.is_comment_event());

        info!(
            change = %change.id,
            replies,
            batches = asm.batches.len(),
            hidden = asm.hidden,
            duplicates,
            score = ?score,
            took_ms = t0.elapsed().as_millis() as u64,
            "review: assembled"
        );

        self.submit(
            change,
            ReviewOutcome {
                batches: asm.batches,
                score,
            },
        )
        .await
    }

    /// Uploads the change's repository sources to `sink`, packed into
    /// chunks of at most `chunk_max_bytes`; returns the chunk count.
    ///
    /// # Errors
    /// Host failures and sink failures.
    pub async fn upload_repository<S>(&self, change: &Change, sink: &S) -> MrResult<usize>
    where
        S: ChunkSink + Sync,
    {
        let records = self.host.repository_files(change).await?;
        debug!(change = %change.id, files = records.len(), max_bytes = self.cfg.chunk_max_bytes, "upload: packing repository");
        upload_in_chunks(sink, records, self.cfg.chunk_max_bytes).await
    }

    async fn submit(&self, change: &Change, outcome: ReviewOutcome) -> MrResult<ReviewOutcome> {
        self.host
            .submit_review(change, &outcome.batches, outcome.score)
            .await?;
        debug!(change = %change.id, batches = outcome.batches.len(), "review: submitted");
        Ok(outcome)
    }

    fn assemble(
        &self,
        change: &Change,
        response: ResponseContent,
        comments: &[ExistingComment],
        diff_files: &BTreeMap<String, DiffFile>,
    ) -> Assembly {
        let mut asm = Assembly::default();
        let replies = response.replies.unwrap_or_default();

        if replies.is_empty() {
            if let Some(msg) = response.message_content.filter(|m| !m.trim().is_empty()) {
                asm.batches.push(ReviewBatch::review_level(msg));
            }
            return asm;
        }

        let comment_event = change.is_comment_event();
        for item in replies {
            let verdict = classify(&item, &self.cfg);
            if verdict.counts_for_score {
                if let Some(s) = item.score {
                    asm.scores.push(s);
                }
            }
            if verdict.hidden && !comment_event {
                asm.hidden += 1;
                debug!(score = ?item.score, relevance = ?item.relevance, "review: reply hidden");
                continue;
            }
            let Some(text) = item.reply.clone() else {
                continue;
            };

            let batch = if comment_event {
                anchor_to_thread(&item, text, comments)
            } else {
                self.anchor_to_code(&item, text, diff_files)
            };
            asm.batches.push(batch);
        }
        asm
    }

    fn anchor_to_code(
        &self,
        item: &ReplyItem,
        text: String,
        diff_files: &BTreeMap<String, DiffFile>,
    ) -> ReviewBatch {
        let mut batch = ReviewBatch::review_level(text);
        let Some(name) = item.filename.as_deref() else {
            return batch;
        };
        let Some(path) = filename::sanitize(name, diff_files.keys().map(String::as_str)) else {
            debug!(filename = name, "review: filename not in patch set");
            return batch;
        };
        let Some(diff) = diff_files.get(&path) else {
            return batch;
        };

        match self.locator.locate(
            diff,
            item.line_number,
            item.range.as_ref(),
            item.code_snippet.as_deref(),
        ) {
            Some(found) => {
                batch.filename = path;
                batch.line = Some(found.range.end_line);
                batch.range = Some(found.range);
            }
            None => debug!(filename = %path, "review: no code range, review-level batch"),
        }
        batch
    }
}

/// Host already spoke, or review disabled without being forced.
pub fn is_suppressed(change: &Change) -> bool {
    change.system_message.is_some() || (change.hide_review && !change.force_review)
}

/// Attaches a reply to the existing comment its `id` indexes.
fn anchor_to_thread(item: &ReplyItem, text: String, comments: &[ExistingComment]) -> ReviewBatch {
    let mut batch = ReviewBatch::review_level(text);
    let existing = item
        .id
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| comments.get(i));
    let Some(existing) = existing else {
        debug!(id = ?item.id, comments = comments.len(), "review: thread index out of range");
        return batch;
    };

    batch.id = Some(existing.id.clone());
    if existing.is_inline() {
        if let Some(f) = &existing.filename {
            batch.filename = f.clone();
        }
        batch.line = existing.line.or(existing.range.map(|r| r.end_line));
        batch.range = existing.range;
    }
    batch
}
