//! Review policy knobs loaded from environment variables.
//!
//! Unparsable numbers fall back to their defaults; values that parse but make
//! no sense (zero budgets, thresholds outside `0..=1`) are rejected by
//! [`ReviewConfig::validate`].

use ai_llm_service::error_handler::{env_bool, env_opt, env_or};

use crate::chunk::DEFAULT_MAX_CHUNK_BYTES;
use crate::errors::{ConfigError, MrResult};
use crate::locate::DEFAULT_SIMILARITY_THRESHOLD;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a code reviewer. Review the patch in the `patch` field \
and answer only by calling the `format_replies` tool. Echo `changeId` unchanged.";
const DEFAULT_TOO_LARGE_MESSAGE: &str =
    "The change is too large for an AI review. Please split it into smaller changes.";
const DEFAULT_CONNECTION_FAILED_MESSAGE: &str =
    "The AI review could not be completed: the model backend did not return a valid response.";

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewConfig {
    /// Patches with more lines are not sent to the model.
    pub max_review_lines: usize,

    /// Hide replies whose score is at or above `negative_threshold`.
    pub filter_negative: bool,
    pub negative_threshold: i64,

    /// Hide replies whose relevance is below `relevance_threshold`.
    pub filter_relevance: bool,
    pub relevance_threshold: f64,

    /// Submit the minimum reply score as the review vote.
    pub voting: bool,

    /// Attach callee definitions found in repository files.
    pub code_context: bool,
    pub code_context_max_chars: usize,

    pub directives: Vec<String>,
    pub system_prompt: String,
    pub too_large_message: String,
    pub connection_failed_message: String,

    pub similarity_threshold: f64,
    pub chunk_max_bytes: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_review_lines: 1000,
            filter_negative: false,
            negative_threshold: 0,
            filter_relevance: true,
            relevance_threshold: 0.1,
            voting: false,
            code_context: false,
            code_context_max_chars: 8000,
            directives: Vec::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            too_large_message: DEFAULT_TOO_LARGE_MESSAGE.to_string(),
            connection_failed_message: DEFAULT_CONNECTION_FAILED_MESSAGE.to_string(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            chunk_max_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

impl ReviewConfig {
    /// Build from environment variables with defaults from [`ReviewConfig::default`].
    ///
    /// - `REVIEW_MAX_LINES`, `REVIEW_FILTER_NEGATIVE`, `REVIEW_NEGATIVE_THRESHOLD`
    /// - `REVIEW_FILTER_RELEVANCE`, `REVIEW_RELEVANCE_THRESHOLD`, `REVIEW_VOTING`
    /// - `REVIEW_CODE_CONTEXT`, `REVIEW_CODE_CONTEXT_MAX_CHARS`
    /// - `REVIEW_DIRECTIVES` (`||`-separated), `REVIEW_SYSTEM_PROMPT`
    /// - `REVIEW_TOO_LARGE_MESSAGE`, `REVIEW_CONNECTION_FAILED_MESSAGE`
    /// - `LOCATOR_SIMILARITY_THRESHOLD`, `CHUNK_MAX_BYTES`
    pub fn from_env() -> MrResult<Self> {
        let d = Self::default();
        let cfg = Self {
            max_review_lines: parse("REVIEW_MAX_LINES", d.max_review_lines),
            filter_negative: env_bool("REVIEW_FILTER_NEGATIVE", d.filter_negative),
            negative_threshold: parse("REVIEW_NEGATIVE_THRESHOLD", d.negative_threshold),
            filter_relevance: env_bool("REVIEW_FILTER_RELEVANCE", d.filter_relevance),
            relevance_threshold: parse("REVIEW_RELEVANCE_THRESHOLD", d.relevance_threshold),
            voting: env_bool("REVIEW_VOTING", d.voting),
            code_context: env_bool("REVIEW_CODE_CONTEXT", d.code_context),
            code_context_max_chars: parse("REVIEW_CODE_CONTEXT_MAX_CHARS", d.code_context_max_chars),
            directives: env_opt("REVIEW_DIRECTIVES")
                .map(|v| split_directives(&v))
                .unwrap_or_default(),
            system_prompt: env_or("REVIEW_SYSTEM_PROMPT", &d.system_prompt),
            too_large_message: env_or("REVIEW_TOO_LARGE_MESSAGE", &d.too_large_message),
            connection_failed_message: env_or(
                "REVIEW_CONNECTION_FAILED_MESSAGE",
                &d.connection_failed_message,
            ),
            similarity_threshold: parse("LOCATOR_SIMILARITY_THRESHOLD", d.similarity_threshold),
            chunk_max_bytes: parse("CHUNK_MAX_BYTES", d.chunk_max_bytes),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// [`ConfigError::InvalidValue`] for zero budgets or thresholds outside `0..=1`.
    pub fn validate(&self) -> MrResult<()> {
        let check = |ok: bool, var: &'static str, reason: &'static str| {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue { var, reason })
            }
        };
        check(self.max_review_lines > 0, "REVIEW_MAX_LINES", "must be positive")?;
        check(
            (0.0..=1.0).contains(&self.relevance_threshold),
            "REVIEW_RELEVANCE_THRESHOLD",
            "expected 0..=1",
        )?;
        check(
            (0.0..=1.0).contains(&self.similarity_threshold),
            "LOCATOR_SIMILARITY_THRESHOLD",
            "expected 0..=1",
        )?;
        check(self.chunk_max_bytes > 0, "CHUNK_MAX_BYTES", "must be positive")?;
        Ok(())
    }
}

fn split_directives(raw: &str) -> Vec<String> {
    raw.split("||")
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse<T: std::str::FromStr>(k: &str, dflt: T) -> T {
    std::env::var(k)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(dflt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_are_split_and_trimmed() {
        assert_eq!(
            split_directives(" no unwrap || || prefer iterators||"),
            vec!["no unwrap", "prefer iterators"]
        );
    }

    #[test]
    fn defaults_are_valid() {
        let d = ReviewConfig::default();
        assert!(d.validate().is_ok());
        assert!(d.filter_relevance);
        assert!(!d.voting);
        assert_eq!(d.max_review_lines, 1000);
    }

    #[test]
    fn nonsense_values_are_rejected() {
        let bad = ReviewConfig {
            relevance_threshold: 1.5,
            ..ReviewConfig::default()
        };
        assert!(bad.validate().is_err());

        let zero = ReviewConfig {
            chunk_max_bytes: 0,
            ..ReviewConfig::default()
        };
        assert!(zero.validate().is_err());
    }
}
