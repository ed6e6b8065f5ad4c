//! Token similarity used when the model gives no usable line numbers.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENT_RE: Regex =
        Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:(?:\.|::)[A-Za-z_][A-Za-z0-9_]*)*|\d+|[^\sA-Za-z0-9_]")
            .expect("identifier regex");
}

/// Identifiers (with `.`/`::` chains), numbers and single punctuation marks.
pub fn extract_tokens(s: &str) -> Vec<&str> {
    IDENT_RE.find_iter(s).map(|m| m.as_str()).collect()
}

/// Collapses every whitespace run into one space.
pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity in `0.0..=1.0` between a code window and a snippet.
///
/// 1.0 when the whitespace-normalized snippet occurs verbatim in the window;
/// otherwise the Dice coefficient of the two token multisets.
pub fn similarity(window: &str, snippet: &str) -> f64 {
    let w = normalize_ws(window);
    let s = normalize_ws(snippet);
    if s.is_empty() || w.is_empty() {
        return 0.0;
    }
    if w.contains(&s) {
        return 1.0;
    }

    let wt = extract_tokens(&w);
    let st = extract_tokens(&s);
    if wt.is_empty() || st.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in &wt {
        *counts.entry(*t).or_default() += 1;
    }
    let mut shared = 0usize;
    for t in &st {
        if let Some(c) = counts.get_mut(t) {
            if *c > 0 {
                *c -= 1;
                shared += 1;
            }
        }
    }
    (2 * shared) as f64 / (wt.len() + st.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbatim_occurrence_scores_one() {
        assert_eq!(similarity("    let x =   compute(a, b);", "let x = compute(a, b);"), 1.0);
    }

    #[test]
    fn reworded_snippet_scores_partially() {
        let s = similarity("let total = items.iter().sum();", "let total = items.iter().count()");
        assert!(s > 0.6 && s < 1.0, "{s}");
        assert!(similarity("fn unrelated() {}", "let total = items.len();") < 0.4);
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(similarity("", "x"), 0.0);
        assert_eq!(similarity("x", "   "), 0.0);
    }

    #[test]
    fn tokens_keep_path_chains() {
        assert_eq!(
            extract_tokens("std::mem::take(&mut v)"),
            vec!["std::mem::take", "(", "&", "mut", "v", ")"]
        );
    }
}
