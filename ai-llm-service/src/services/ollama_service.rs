//! Ollama chat backend.
//!
//! - POST {endpoint}/api/chat
//! - Non-streamed reply: `message.tool_calls[].function.arguments` (JSON objects)
//! - Streamed reply: NDJSON, one `{"message":{...},"done":bool}` object per line
//!
//! Sampling options (`temperature`, `seed`, `top_p`, `num_predict`) go into
//! the `options` object, as Ollama expects. Tool-call arguments arrive as
//! objects and are re-serialized so the session parses one shape for every
//! backend.

use reqwest::header;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, trace};

use crate::{
    config::{llm_model_config::LlmModelConfig, llm_provider::LlmProvider},
    error_handler::{AiLlmError, Provider, ProviderError, ProviderErrorKind},
    protocol::{ChatRequest, reply_tool_definition, stream::StreamPiece},
    services::{ChatBackend, checked_base},
};

/// Ollama wire format.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    api_key: Option<String>,
}

impl OllamaBackend {
    /// Validates `cfg` for Ollama.
    ///
    /// # Errors
    /// - [`AiLlmError::Provider`] with `InvalidProvider` if `cfg.provider` is not Ollama
    /// - [`AiLlmError::Provider`] with `InvalidEndpoint` if `cfg.endpoint` is invalid
    pub fn new(cfg: &LlmModelConfig) -> Result<Self, AiLlmError> {
        if cfg.provider != LlmProvider::Ollama {
            return Err(
                ProviderError::new(Provider::Ollama, ProviderErrorKind::InvalidProvider).into(),
            );
        }
        checked_base(Provider::Ollama, &cfg.endpoint)?;

        info!(
            model = %cfg.model,
            endpoint = %cfg.endpoint,
            stream = cfg.stream,
            "Ollama backend initialized"
        );

        Ok(Self {
            api_key: cfg.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }
}

impl ChatBackend for OllamaBackend {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn chat_url(&self, endpoint: &str) -> String {
        format!("{}/api/chat", endpoint.trim().trim_end_matches('/'))
    }

    fn headers(&self) -> Result<header::HeaderMap, ProviderError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        // Reverse proxies in front of Ollama often require a bearer token.
        if let Some(key) = &self.api_key {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                    ProviderError::new(
                        Provider::Ollama,
                        ProviderErrorKind::Decode(format!("invalid API key header: {e}")),
                    )
                })?,
            );
        }
        Ok(headers)
    }

    fn build_request(&self, cfg: &LlmModelConfig, req: &ChatRequest) -> Value {
        let mut options = json!({ "seed": req.seed });
        if let Some(t) = cfg.temperature {
            options["temperature"] = json!(t);
        }
        if let Some(p) = cfg.top_p {
            options["top_p"] = json!(p);
        }
        if let Some(m) = cfg.max_tokens {
            options["num_predict"] = json!(m);
        }

        json!({
            "model": cfg.model,
            "messages": [
                { "role": "system", "content": req.system },
                { "role": "user", "content": req.user },
            ],
            "stream": req.stream,
            "tools": [reply_tool_definition()],
            "options": options,
        })
    }

    fn parse_response(&self, body: &str) -> Result<Vec<String>, ProviderError> {
        let out: ChatResponse = serde_json::from_str(body).map_err(|e| {
            ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::Decode(format!(
                    "serde error: {e}; expected `message.tool_calls`"
                )),
            )
        })?;

        let args = tool_arguments(out);
        if args.is_empty() {
            return Err(ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::EmptyChoices,
            ));
        }
        Ok(args)
    }

    /// Every tool call in an NDJSON frame carries complete arguments.
    fn parse_stream_line(&self, line: &str) -> Vec<StreamPiece> {
        if !line.trim_start().starts_with('{') {
            return Vec::new();
        }
        match serde_json::from_str::<ChatResponse>(line) {
            Ok(frame) => tool_arguments(frame)
                .into_iter()
                .filter(|a| !a.is_empty())
                .map(StreamPiece::Whole)
                .collect(),
            Err(e) => {
                trace!(error = %e, "skipping undecodable NDJSON frame");
                Vec::new()
            }
        }
    }
}

fn tool_arguments(resp: ChatResponse) -> Vec<String> {
    resp.message
        .and_then(|m| m.tool_calls)
        .unwrap_or_default()
        .into_iter()
        .map(|t| match t.function.arguments {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect()
}

/* ===========================================================================
HTTP payloads
======================================================================== */

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessageOut>,
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
    #[serde(default)]
    arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseContent;

    fn cfg() -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::Ollama,
            model: "qwen3:32b".into(),
            endpoint: "http://localhost:11434".into(),
            api_key: None,
            max_tokens: None,
            temperature: Some(0.1),
            top_p: Some(0.9),
            timeout_secs: None,
            stream: true,
        }
    }

    #[test]
    fn sampling_options_are_nested() {
        let b = OllamaBackend::new(&cfg()).unwrap();
        let req = ChatRequest {
            system: "s".into(),
            user: "u".into(),
            seed: 99,
            stream: true,
        };
        let body = b.build_request(&cfg(), &req);
        assert_eq!(body["options"]["seed"], 99);
        assert_eq!(body["options"]["top_p"].as_f64().map(|v| (v * 10.0).round()), Some(9.0));
        assert!(body.get("seed").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(b.chat_url("http://localhost:11434/"), "http://localhost:11434/api/chat");
    }

    #[test]
    fn object_arguments_are_reserialized() {
        let b = OllamaBackend::new(&cfg()).unwrap();
        let body = r#"{"message":{"role":"assistant","content":"","tool_calls":[
            {"function":{"name":"format_replies","arguments":{"replies":[{"reply":"fix it","score":-2}],"changeId":"c1"}}}
        ]},"done":true}"#;
        let args = b.parse_response(body).unwrap();
        let parsed = ResponseContent::parse(&args[0]).unwrap();
        assert_eq!(parsed.change_id.as_deref(), Some("c1"));
        assert_eq!(parsed.replies.unwrap()[0].score, Some(-2));
    }

    #[test]
    fn ndjson_lines_without_tool_calls_are_ignored() {
        let b = OllamaBackend::new(&cfg()).unwrap();
        assert!(
            b.parse_stream_line(r#"{"message":{"role":"assistant","content":"thinking"},"done":false}"#)
                .is_empty()
        );
        assert!(b.parse_stream_line(r#"{"done":true}"#).is_empty());
        assert!(b.parse_stream_line("data: [DONE]").is_empty());
        assert_eq!(
            b.parse_stream_line(
                r#"{"message":{"tool_calls":[{"function":{"arguments":{"replies":[]}}}]},"done":false}"#
            ),
            [StreamPiece::Whole(r#"{"replies":[]}"#.into())]
        );
    }

    #[test]
    fn ndjson_frame_with_two_tool_calls_yields_two_parts() {
        let b = OllamaBackend::new(&cfg()).unwrap();
        let pieces = b.parse_stream_line(
            r#"{"message":{"tool_calls":[
                {"function":{"arguments":{"replies":[{"reply":"a"}]}}},
                {"function":{"arguments":{"replies":[{"reply":"b"}]}}}
            ]},"done":false}"#,
        );
        assert_eq!(
            pieces,
            [
                StreamPiece::Whole(r#"{"replies":[{"reply":"a"}]}"#.into()),
                StreamPiece::Whole(r#"{"replies":[{"reply":"b"}]}"#.into()),
            ]
        );
    }
}
