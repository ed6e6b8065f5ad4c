//! Policy utilities: reply visibility, score aggregation, batch dedup.

use std::collections::HashSet;

use ai_llm_service::protocol::ReplyItem;

use crate::config::ReviewConfig;
use crate::host::ReviewBatch;

/// Policy decision for one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Dropped unless the review was requested in a comment.
    pub hidden: bool,
    /// Score participates in the vote (visible or not).
    pub counts_for_score: bool,
}

/// Below the relevance threshold; a missing relevance counts as relevant.
pub fn is_irrelevant(item: &ReplyItem, cfg: &ReviewConfig) -> bool {
    cfg.filter_relevance
        && item
            .relevance
            .is_some_and(|r| r < cfg.relevance_threshold)
}

/// At or above the negative threshold; a missing score is not negative.
pub fn is_non_negative(item: &ReplyItem, cfg: &ReviewConfig) -> bool {
    cfg.filter_negative
        && item
            .score
            .is_none_or(|s| s >= cfg.negative_threshold)
}

pub fn classify(item: &ReplyItem, cfg: &ReviewConfig) -> Verdict {
    let repeated = item.repeated.unwrap_or(false);
    let conflicting = item.conflicting.unwrap_or(false);
    let irrelevant = is_irrelevant(item, cfg);

    Verdict {
        hidden: repeated || conflicting || irrelevant || is_non_negative(item, cfg),
        counts_for_score: !conflicting && !irrelevant && item.score.is_some(),
    }
}

/// Minimum accumulated score when voting applies, `0` for none.
pub fn final_score(scores: &[i64], voting: bool, comment_event: bool) -> Option<i64> {
    if !voting || comment_event {
        return None;
    }
    Some(scores.iter().copied().min().unwrap_or(0))
}

/// In-place dedup keyed by position and content; first occurrence wins.
pub fn dedup_in_place(batches: &mut Vec<ReviewBatch>) -> usize {
    let before = batches.len();
    let mut seen = HashSet::new();
    batches.retain(|b| {
        let key = format!("{}::{:?}::{:?}::{}", b.filename, b.line, b.range, b.content);
        seen.insert(key)
    });
    before - batches.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(score: Option<i64>, relevance: Option<f64>) -> ReplyItem {
        ReplyItem {
            reply: Some("r".into()),
            score,
            relevance,
            ..ReplyItem::default()
        }
    }

    #[test]
    fn minimum_score_vetoes() {
        assert_eq!(final_score(&[3, 7, 2], true, false), Some(2));
        assert_eq!(final_score(&[], true, false), Some(0));
        assert_eq!(final_score(&[3, -5], false, false), None);
        assert_eq!(final_score(&[3, -5], true, true), None);
    }

    #[test]
    fn irrelevant_and_conflicting_replies_do_not_vote() {
        let cfg = ReviewConfig::default();

        let low = classify(&item(Some(-2), Some(0.05)), &cfg);
        assert!(low.hidden);
        assert!(!low.counts_for_score);

        let mut conflicting = item(Some(-2), Some(0.9));
        conflicting.conflicting = Some(true);
        assert!(!classify(&conflicting, &cfg).counts_for_score);

        let mut repeated = item(Some(-2), Some(0.9));
        repeated.repeated = Some(true);
        let v = classify(&repeated, &cfg);
        assert!(v.hidden);
        assert!(v.counts_for_score);

        let unknown = classify(&item(Some(1), None), &cfg);
        assert!(!unknown.hidden);
    }

    #[test]
    fn negative_filter_hides_neutral_and_positive_scores() {
        let cfg = ReviewConfig {
            filter_negative: true,
            ..ReviewConfig::default()
        };
        assert!(!classify(&item(Some(-1), None), &cfg).hidden);
        assert!(classify(&item(Some(0), None), &cfg).hidden);
        assert!(classify(&item(None, None), &cfg).hidden);
    }

    #[test]
    fn identical_batches_collapse() {
        let mut v = vec![
            ReviewBatch::review_level("a"),
            ReviewBatch::review_level("b"),
            ReviewBatch::review_level("a"),
        ];
        assert_eq!(dedup_in_place(&mut v), 1);
        let contents: Vec<_> = v.iter().map(|b| b.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
    }
}
