//! OpenAI-compatible chat completions backend.
//!
//! - POST {endpoint}/v1/chat/completions
//! - Non-streamed reply: `choices[].message.tool_calls[].function.arguments` (JSON strings)
//! - Streamed reply: SSE lines `data: {...}` with `choices[0].delta.tool_calls`
//!
//! Constructor validation:
//! - `cfg.provider` must be `LlmProvider::OpenAI`
//! - `cfg.api_key` must be present
//! - `cfg.endpoint` must start with http:// or https://

use reqwest::header;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{AiLlmError, Provider, ProviderError, ProviderErrorKind},
    protocol::{ChatRequest, REPLY_TOOL_NAME, reply_tool_definition, stream::{StreamPiece, sse_tool_arguments}},
    services::{ChatBackend, checked_base},
};

/// OpenAI wire format.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    api_key: String,
}

impl OpenAiBackend {
    /// Validates `cfg` for OpenAI.
    ///
    /// # Errors
    /// - [`AiLlmError::Provider`] with `InvalidProvider` if `cfg.provider` is not OpenAI
    /// - [`AiLlmError::Provider`] with `MissingApiKey` if `cfg.api_key` is `None`
    /// - [`AiLlmError::Provider`] with `InvalidEndpoint` if `cfg.endpoint` is invalid
    pub fn new(cfg: &LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::OpenAI {
            return Err(
                ProviderError::new(Provider::OpenAI, ProviderErrorKind::InvalidProvider).into(),
            );
        }

        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::new(Provider::OpenAI, ProviderErrorKind::MissingApiKey))?;

        checked_base(Provider::OpenAI, &cfg.endpoint)?;

        info!(
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            stream = cfg.stream,
            "OpenAI backend initialized"
        );

        Ok(Self { api_key })
    }
}

impl ChatBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn chat_url(&self, endpoint: &str) -> String {
        format!("{}/v1/chat/completions", endpoint.trim().trim_end_matches('/'))
    }

    fn headers(&self) -> Result<header::HeaderMap, ProviderError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|e| {
                ProviderError::new(
                    Provider::OpenAI,
                    ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
                )
            })?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        Ok(headers)
    }

    fn build_request(&self, cfg: &LlmModelConfig, req: &ChatRequest) -> Value {
        let mut body = json!({
            "model": cfg.model,
            "messages": [
                { "role": "system", "content": req.system },
                { "role": "user", "content": req.user },
            ],
            "seed": req.seed,
            "stream": req.stream,
            "tools": [reply_tool_definition()],
            "tool_choice": {
                "type": "function",
                "function": { "name": REPLY_TOOL_NAME }
            },
        });
        if let Some(t) = cfg.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = cfg.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(m) = cfg.max_tokens {
            body["max_tokens"] = json!(m);
        }
        body
    }

    fn parse_response(&self, body: &str) -> Result<Vec<String>, ProviderError> {
        let out: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
            ProviderError::new(
                Provider::OpenAI,
                ProviderErrorKind::Decode(format!(
                    "serde error: {e}; expected `choices[].message.tool_calls`"
                )),
            )
        })?;

        let args: Vec<String> = out
            .choices
            .into_iter()
            .flat_map(|c| c.message.tool_calls.unwrap_or_default())
            .map(|t| t.function.arguments)
            .collect();

        if args.is_empty() {
            return Err(ProviderError::new(
                Provider::OpenAI,
                ProviderErrorKind::EmptyChoices,
            ));
        }
        Ok(args)
    }

    fn parse_stream_line(&self, line: &str) -> Vec<StreamPiece> {
        sse_tool_arguments(line)
    }
}

/* ===========================================================================
HTTP payloads
======================================================================== */

/// Minimal response for `/v1/chat/completions`.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageOut,
}

#[derive(Debug, Deserialize)]
struct ChatMessageOut {
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: ToolFunction,
}

#[derive(Debug, Deserialize)]
struct ToolFunction {
    arguments: String,
}
