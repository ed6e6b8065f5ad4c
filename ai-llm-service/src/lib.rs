//! Protocol session for AI code review.
//!
//! Sends a [`protocol::ReviewContext`] to an LLM backend (OpenAI-compatible or
//! Ollama), forces a single `format_replies` tool call, assembles the
//! argument text from a plain or streamed reply and returns the parsed
//! [`protocol::ResponseContent`].
//!
//! ```no_run
//! use ai_llm_service::{protocol::ReviewContext, session::{ChatSession, ModelClient}};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = ChatSession::from_env()?;
//! let ctx = ReviewContext {
//!     change_id: "I8f3c".into(),
//!     system: "You are a code reviewer.".into(),
//!     patch: "diff --git a/src/lib.rs b/src/lib.rs".into(),
//!     ..ReviewContext::default()
//! };
//! let content = session.ask(&ctx).await?;
//! println!("{:?}", content.replies);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error_handler;
pub mod protocol;
pub mod services;
pub mod session;
pub mod telemetry;
pub mod transport;
