//! Backend variants behind one interface.
//!
//! A backend knows only its wire format: where to POST, how the JSON body
//! looks, which headers it needs and where the tool-call argument text sits
//! in a reply (whole body or one streamed line). Transport, retries and
//! correlation live in [`crate::transport`] and [`crate::session`] and are
//! shared by all variants.
//!
//! Dispatch is enum-based ([`Backend`]), selected once from
//! [`LlmProvider`] at construction time.

pub mod ollama_service;
pub mod open_ai_service;

use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{AiLlmError, Provider, ProviderError},
    protocol::{ChatRequest, stream::StreamPiece},
};

pub use ollama_service::OllamaBackend;
pub use open_ai_service::OpenAiBackend;

/// Wire format of one LLM backend.
pub trait ChatBackend {
    /// Backend tag used in errors/logs.
    fn provider(&self) -> Provider;

    /// Full chat URL for a base endpoint.
    fn chat_url(&self, endpoint: &str) -> String;

    /// Default headers (auth, content type).
    fn headers(&self) -> Result<HeaderMap, ProviderError>;

    /// JSON body for `req`.
    fn build_request(&self, cfg: &LlmModelConfig, req: &ChatRequest) -> Value;

    /// Argument texts of all tool calls in a non-streamed body, in order.
    fn parse_response(&self, body: &str) -> Result<Vec<String>, ProviderError>;

    /// Tool-call argument pieces carried by one streamed line.
    fn parse_stream_line(&self, line: &str) -> Vec<StreamPiece>;
}

/// Statically known backend implementations.
#[derive(Debug, Clone)]
pub enum Backend {
    OpenAi(OpenAiBackend),
    Ollama(OllamaBackend),
}

impl Backend {
    /// Picks and validates the backend named by `cfg.provider`.
    ///
    /// # Errors
    /// Propagates the variant's validation errors (endpoint, API key).
    pub fn from_config(cfg: &LlmModelConfig) -> Result<Self, AiLlmError> {
        Ok(match cfg.provider {
            LlmProvider::OpenAI => Backend::OpenAi(OpenAiBackend::new(cfg)?),
            LlmProvider::Ollama => Backend::Ollama(OllamaBackend::new(cfg)?),
        })
    }
}

impl ChatBackend for Backend {
    fn provider(&self) -> Provider {
        match self {
            Backend::OpenAi(b) => b.provider(),
            Backend::Ollama(b) => b.provider(),
        }
    }

    fn chat_url(&self, endpoint: &str) -> String {
        match self {
            Backend::OpenAi(b) => b.chat_url(endpoint),
            Backend::Ollama(b) => b.chat_url(endpoint),
        }
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        match self {
            Backend::OpenAi(b) => b.headers(),
            Backend::Ollama(b) => b.headers(),
        }
    }

    fn build_request(&self, cfg: &LlmModelConfig, req: &ChatRequest) -> Value {
        match self {
            Backend::OpenAi(b) => b.build_request(cfg, req),
            Backend::Ollama(b) => b.build_request(cfg, req),
        }
    }

    fn parse_response(&self, body: &str) -> Result<Vec<String>, ProviderError> {
        match self {
            Backend::OpenAi(b) => b.parse_response(body),
            Backend::Ollama(b) => b.parse_response(body),
        }
    }

    fn parse_stream_line(&self, line: &str) -> Vec<StreamPiece> {
        match self {
            Backend::OpenAi(b) => b.parse_stream_line(line),
            Backend::Ollama(b) => b.parse_stream_line(line),
        }
    }
}

/// Shared endpoint check: non-empty and http(s).
pub(crate) fn checked_base(provider: Provider, endpoint: &str) -> Result<String, ProviderError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() || !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
    {
        return Err(ProviderError::new(
            provider,
            crate::error_handler::ProviderErrorKind::InvalidEndpoint(endpoint.to_string()),
        ));
    }
    Ok(endpoint.trim_end_matches('/').to_string())
}
