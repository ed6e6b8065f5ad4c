//! Review batch assembly for AI code review.
//!
//! Turns one model reply into deterministic, line-accurate review batches:
//!
//! 1) **Diff model** (`parser`, `diff`)
//!    - Parse unified diffs, split multi-file patches
//!    - Build per-file `DiffFile`s with new content and hunk spans
//!
//! 2) **Code locator** (`locate`)
//!    - Range hint → sliced content; line hint → that line (clamped)
//!    - No hint → token-similarity search over changed regions
//!
//! 3) **Review batch assembler** (`review`)
//!    - Suppression / size gates, one `ask` per review
//!    - Visibility policy, score vote, thread or code anchoring, dedup
//!
//! 4) **Content chunker** (`chunk`)
//!    - Greedy, directory-aware packing of files into size-bounded chunks
//!
//! Hosts and model clients plug in through the `ReviewHost` and
//! `ai_llm_service::session::ModelClient` traits: plain `impl Future` methods,
//! generic dispatch, no `async-trait` and no `Box<dyn ...>`.

pub mod chunk;
pub mod config;
pub mod context;
pub mod diff;
pub mod errors;
pub mod host;
pub mod locate;
pub mod parser;
pub mod review;

use ai_llm_service::session::ChatSession;

pub use config::ReviewConfig;
pub use errors::{Error, MrResult};
pub use host::{Change, EventKind, ExistingComment, PATCHSET_LEVEL, ReviewBatch, ReviewHost};
pub use review::{ReviewOutcome, Reviewer};

/// Reviewer wired to a [`ChatSession`] configured from the environment.
///
/// # Errors
/// Invalid LLM or review configuration.
pub fn reviewer_from_env<H>(host: H) -> MrResult<Reviewer<H, ChatSession>>
where
    H: ReviewHost + Sync,
{
    let session = ChatSession::from_env()?;
    let cfg = ReviewConfig::from_env()?;
    Ok(Reviewer::new(host, session, cfg))
}
