//! Protocol session: one correlated request/response round trip per `ask`.
//!
//! Two nested retry loops:
//! - the **transport loop** ([`HttpTransport`]) repeats one HTTP exchange on
//!   transport faults with a fixed delay;
//! - the **correlation loop** (here) repeats the whole round trip, with a
//!   fresh seed, when the payload is malformed or the echoed `changeId`
//!   does not match the one sent.
//!
//! Exhausting the correlation loop yields [`SessionError::ConnectionFailed`].
//! A fired [`CancelSignal`] yields [`SessionError::Cancelled`].

use std::future::Future;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    config::{
        default_config::{config_from_env, session_config_from_env},
        llm_model_config::LlmModelConfig,
        session_config::SessionConfig,
    },
    error_handler::{AiLlmError, SessionError},
    protocol::{ChatRequest, ResponseContent, ReviewContext, stream::StreamAssembler},
    services::{Backend, ChatBackend},
    transport::HttpTransport,
};

/// Anything that can answer a [`ReviewContext`] with a [`ResponseContent`].
pub trait ModelClient {
    fn ask(
        &self,
        ctx: &ReviewContext,
    ) -> impl Future<Output = Result<ResponseContent, SessionError>> + Send;
}

/// Caller-owned trigger for [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Fires the signal. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation observed by the session and transport.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Connected handle/signal pair.
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelSignal { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires; pends forever if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Why a single correlation attempt failed.
enum AttemptFailure {
    Cancelled,
    Failed(String),
}

impl From<AiLlmError> for AttemptFailure {
    fn from(e: AiLlmError) -> Self {
        match e {
            AiLlmError::Session(SessionError::Cancelled) => AttemptFailure::Cancelled,
            other => AttemptFailure::Failed(other.to_string()),
        }
    }
}

/// Session bound to one backend.
#[derive(Debug, Clone)]
pub struct ChatSession {
    cfg: LlmModelConfig,
    session: SessionConfig,
    backend: Backend,
    transport: HttpTransport,
    cancel: CancelSignal,
}

impl ChatSession {
    /// Validates the config, selects the backend and builds the HTTP client.
    ///
    /// # Errors
    /// Backend validation errors and client build errors.
    pub fn new(cfg: LlmModelConfig, session: SessionConfig) -> Result<Self, AiLlmError> {
        let backend = Backend::from_config(&cfg)?;
        let transport = HttpTransport::new(&backend, &cfg, &session)?;
        info!(
            provider = %backend.provider(),
            model = %cfg.model,
            max_attempts = session.max_attempts,
            transport_retries = session.transport_retries,
            "chat session ready"
        );
        Ok(Self {
            cfg,
            session,
            backend,
            transport,
            cancel: CancelSignal::never(),
        })
    }

    /// [`ChatSession::new`] with both configs read from the environment.
    pub fn from_env() -> Result<Self, AiLlmError> {
        Self::new(config_from_env()?, session_config_from_env()?)
    }

    /// Attaches a caller-owned cancel signal.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &LlmModelConfig {
        &self.cfg
    }

    async fn attempt(&self, url: &str, body: &Value) -> Result<ResponseContent, AttemptFailure> {
        if self.cfg.stream {
            let backend = &self.backend;
            let mut asm = StreamAssembler::new(|line: &str| backend.parse_stream_line(line));
            self.transport
                .fetch_lines(url, body, &mut asm, &self.cancel)
                .await?;
            debug!(parts = asm.parts().len(), pieces = asm.pieces(), "stream assembled");
            return merge_arguments(asm.parts());
        }

        let text = self.transport.fetch_text(url, body, &self.cancel).await?;
        let args = self
            .backend
            .parse_response(&text)
            .map_err(|e| AttemptFailure::Failed(e.to_string()))?;
        merge_arguments(&args)
    }
}

/// Parses every tool call's arguments and merges them into one response.
fn merge_arguments(args: &[String]) -> Result<ResponseContent, AttemptFailure> {
    let parts = args
        .iter()
        .map(|a| ResponseContent::parse(a))
        .collect::<Result<Vec<_>, _>>()
        .map_err(AttemptFailure::Failed)?;
    ResponseContent::merge(parts)
        .ok_or_else(|| AttemptFailure::Failed("response carried no tool calls".into()))
}

impl ModelClient for ChatSession {
    async fn ask(&self, ctx: &ReviewContext) -> Result<ResponseContent, SessionError> {
        let url = self.backend.chat_url(&self.cfg.endpoint);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.session.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            let req = ChatRequest::from_context(ctx, self.cfg.stream);
            let body = self.backend.build_request(&self.cfg, &req);
            debug!(
                attempt,
                seed = req.seed,
                change_id = %ctx.change_id,
                stream = req.stream,
                "sending review request"
            );

            match self.attempt(&url, &body).await {
                Ok(content) if content.correlates_with(&ctx.change_id) => {
                    info!(
                        attempt,
                        change_id = %ctx.change_id,
                        replies = content.replies.as_ref().map_or(0, Vec::len),
                        has_message = content.message_content.is_some(),
                        "review response accepted"
                    );
                    return Ok(content);
                }
                Ok(content) => {
                    let got = content.change_id.unwrap_or_default();
                    warn!(
                        attempt,
                        expected = %ctx.change_id,
                        got = %got,
                        "changeId mismatch, discarding response"
                    );
                    last_error = format!("changeId mismatch: expected {}, got {got}", ctx.change_id);
                }
                Err(AttemptFailure::Cancelled) => return Err(SessionError::Cancelled),
                Err(AttemptFailure::Failed(reason)) => {
                    warn!(attempt, error = %reason, "review attempt failed");
                    last_error = reason;
                }
            }
        }

        Err(SessionError::ConnectionFailed {
            attempts: self.session.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use mockito::Matcher;

    use super::*;
    use crate::config::llm_provider::LlmProvider;

    fn openai(endpoint: String, stream: bool) -> LlmModelConfig {
        LlmModelConfig {
            provider: LlmProvider::OpenAI,
            model: "gpt-test".into(),
            endpoint,
            api_key: Some("sk-test".into()),
            max_tokens: None,
            temperature: Some(0.2),
            top_p: None,
            timeout_secs: Some(5),
            stream,
        }
    }

    fn fast() -> SessionConfig {
        SessionConfig {
            max_attempts: 3,
            transport_retries: 1,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn ctx() -> ReviewContext {
        ReviewContext {
            change_id: "c-1".into(),
            system: "review".into(),
            patch: "diff --git a/x b/x".into(),
            ..ReviewContext::default()
        }
    }

    fn completion(arguments: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "tool_calls": [
                { "function": { "name": "format_replies", "arguments": arguments } }
            ]}}]
        })
        .to_string()
    }

    #[tokio::test]
    async fn non_streamed_reply_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::Regex(r#""tool_choice""#.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(
                r#"{"replies":[{"reply":"use ?","score":-1,"filename":"src/a.rs","lineNumber":3}],"changeId":"c-1"}"#,
            ))
            .expect(1)
            .create_async()
            .await;

        let s = ChatSession::new(openai(server.url(), false), fast()).unwrap();
        let out = s.ask(&ctx()).await.unwrap();

        let replies = out.replies.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].reply.as_deref(), Some("use ?"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn streamed_reply_is_assembled() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"function\":{\"arguments\":\"{\\\"repl\"}}]}}]}\n",
            "\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"function\":{\"arguments\":\"ies\\\":[]}\"}}]}}]}\n",
            "data: [DONE]\n",
        );
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::Regex(r#""stream":true"#.into()))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse)
            .expect(1)
            .create_async()
            .await;

        let s = ChatSession::new(openai(server.url(), true), fast()).unwrap();
        let out = s.ask(&ctx()).await.unwrap();

        assert_eq!(out.replies.map(|r| r.len()), Some(0));
        assert_eq!(out.change_id, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn streamed_ollama_tool_calls_are_merged() {
        let ndjson = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":false}\n",
            "{\"message\":{\"tool_calls\":[",
            "{\"function\":{\"name\":\"format_replies\",\"arguments\":{\"replies\":[{\"reply\":\"a\"}]}}},",
            "{\"function\":{\"name\":\"format_replies\",\"arguments\":{\"replies\":[{\"reply\":\"b\"}],\"changeId\":\"c-1\"}}}",
            "]},\"done\":false}\n",
            "{\"done\":true}\n",
        );
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::Regex(r#""stream":true"#.into()))
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body(ndjson)
            .expect(1)
            .create_async()
            .await;

        let cfg = LlmModelConfig {
            provider: LlmProvider::Ollama,
            model: "qwen3:32b".into(),
            api_key: None,
            ..openai(server.url(), true)
        };
        let s = ChatSession::new(cfg, fast()).unwrap();
        let out = s.ask(&ctx()).await.unwrap();

        let texts: Vec<_> = out
            .replies
            .unwrap()
            .into_iter()
            .filter_map(|r| r.reply)
            .collect();
        assert_eq!(texts, ["a", "b"]);
        assert_eq!(out.change_id.as_deref(), Some("c-1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn mismatched_change_id_triggers_a_new_round_trip() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body_from_request(move |_| {
                let id = if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    "other-change"
                } else {
                    "c-1"
                };
                completion(&format!(r#"{{"messageContent":"hi","changeId":"{id}"}}"#)).into_bytes()
            })
            .expect(2)
            .create_async()
            .await;

        let s = ChatSession::new(openai(server.url(), false), fast()).unwrap();
        let out = s.ask(&ctx()).await.unwrap();

        assert_eq!(out.change_id.as_deref(), Some("c-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn exhausted_attempts_report_connection_failed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(completion(r#"{"changeId":"c-1"}"#))
            .expect(3)
            .create_async()
            .await;

        let s = ChatSession::new(openai(server.url(), false), fast()).unwrap();
        let err = s.ask(&ctx()).await.unwrap_err();

        match err {
            SessionError::ConnectionFailed { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("messageContent"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn transport_faults_nest_inside_attempts() {
        let mut server = mockito::Server::new_async().await;
        // 3 attempts x (1 + 1 transport retry)
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("boom")
            .expect(6)
            .create_async()
            .await;

        let s = ChatSession::new(openai(server.url(), false), fast()).unwrap();
        let err = s.ask(&ctx()).await.unwrap_err();

        assert!(matches!(err, SessionError::ConnectionFailed { attempts: 3, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cancel_interrupts_retry_sleep() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(502)
            .create_async()
            .await;

        let slow = SessionConfig {
            max_attempts: 3,
            transport_retries: 3,
            retry_delay: Duration::from_secs(30),
        };
        let (handle, signal) = CancelSignal::pair();
        let s = ChatSession::new(openai(server.url(), false), slow)
            .unwrap()
            .with_cancel(signal);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let res = tokio::time::timeout(Duration::from_secs(5), s.ask(&ctx()))
            .await
            .expect("cancel should end the sleep early");
        assert!(matches!(res, Err(SessionError::Cancelled)));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn already_cancelled_session_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .expect(0)
            .create_async()
            .await;

        let (handle, signal) = CancelSignal::pair();
        handle.cancel();
        let s = ChatSession::new(openai(server.url(), false), fast())
            .unwrap()
            .with_cancel(signal);

        assert!(matches!(s.ask(&ctx()).await, Err(SessionError::Cancelled)));
        mock.assert_async().await;
    }
}
