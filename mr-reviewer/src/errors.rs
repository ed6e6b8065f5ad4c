//! Crate-wide error hierarchy for mr-reviewer.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - Expected outcomes (locator miss, suppressed review, backend outage) are
//!   not errors; only host failures, bad input and caller cancellation are.
//! - No dynamic dispatch, no async-trait, ergonomic `?` via `From` impls.

use ai_llm_service::error_handler::AiLlmError;
use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type MrResult<T> = Result<T, Error>;

/// Root error type for the mr-reviewer crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Review host (patch source / submission sink) failure.
    #[error("host error: {0}")]
    Host(String),

    /// LLM layer setup failure (bad config, client build).
    #[error(transparent)]
    Llm(#[from] AiLlmError),

    /// Unified diff parsing failure.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Configuration problems (unparsable env values).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Input validation errors (bad budgets, inconsistent diff data).
    #[error("validation error: {0}")]
    Validation(String),

    /// The caller cancelled the review; nothing was submitted.
    #[error("review cancelled")]
    Cancelled,
}

/// Unified diff parser errors.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid hunk header: {0}")]
    InvalidHunkHeader(String),

    #[error("no hunks found in patch for {0}")]
    NoHunks(String),

    #[error("binary patch for {0}")]
    Binary(String),
}

/// Review configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value in {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        reason: &'static str,
    },
}
