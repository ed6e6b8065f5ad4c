//! HTTP exchange with fixed-delay retries.
//!
//! One [`HttpTransport`] POSTs a JSON body and feeds the response, line by
//! line, into a [`LineSink`]. Transport faults (send errors, timeouts,
//! non-2xx statuses, empty bodies) are retried `retries` more times with a
//! fixed pause; everything else is returned to the caller immediately.
//! The pause and the in-flight request both abort when the [`CancelSignal`]
//! fires.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::{
    config::{llm_model_config::LlmModelConfig, session_config::SessionConfig},
    error_handler::{
        AiLlmError, HttpError, Provider, ProviderError, ProviderErrorKind, SessionError,
        make_snippet,
    },
    protocol::stream::LineSink,
    services::ChatBackend,
    session::CancelSignal,
};

/// Reusable HTTP client bound to one backend.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    provider: Provider,
    retries: u32,
    retry_delay: Duration,
    timeout: Duration,
}

impl HttpTransport {
    /// Builds the client with the backend's default headers and the configured timeout.
    ///
    /// # Errors
    /// - [`AiLlmError::Provider`] if the backend cannot produce its headers
    /// - [`AiLlmError::HttpTransport`] if the client cannot be built
    pub fn new(
        backend: &impl ChatBackend,
        cfg: &LlmModelConfig,
        session: &SessionConfig,
    ) -> Result<Self, AiLlmError> {
        let timeout = Duration::from_secs(cfg.timeout_secs.unwrap_or(120));
        let client = Client::builder()
            .default_headers(backend.headers()?)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            provider: backend.provider(),
            retries: session.transport_retries,
            retry_delay: session.retry_delay,
            timeout,
        })
    }

    /// POSTs `body` and returns the whole response text.
    pub async fn fetch_text(
        &self,
        url: &str,
        body: &Value,
        cancel: &CancelSignal,
    ) -> Result<String, AiLlmError> {
        let mut text = BodyText::default();
        self.fetch_lines(url, body, &mut text, cancel).await?;
        Ok(text.into_string())
    }

    /// POSTs `body` and feeds every response line into `sink`.
    ///
    /// `sink` is reset before each try, so it only ever holds the lines of
    /// the last (successful) exchange.
    pub async fn fetch_lines<S>(
        &self,
        url: &str,
        body: &Value,
        sink: &mut S,
        cancel: &CancelSignal,
    ) -> Result<(), AiLlmError>
    where
        S: LineSink + Send,
    {
        let mut try_no: u32 = 0;
        loop {
            try_no += 1;
            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled.into());
            }
            sink.reset();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SessionError::Cancelled.into()),
                r = self.exchange_once(url, body, sink) => r,
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transport_fault() && try_no <= self.retries => {
                    warn!(
                        provider = %self.provider,
                        try_no,
                        retries = self.retries,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        error = %e,
                        "transport fault, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(SessionError::Cancelled.into()),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn exchange_once<S>(&self, url: &str, body: &Value, sink: &mut S) -> Result<(), AiLlmError>
    where
        S: LineSink + Send,
    {
        let started = Instant::now();
        let mut resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet = make_snippet(&text);
            error!(
                provider = %self.provider,
                %status,
                url,
                snippet = %snippet,
                "backend returned non-success status"
            );
            return Err(ProviderError::new(
                self.provider,
                ProviderErrorKind::HttpStatus(HttpError {
                    status,
                    url: url.to_string(),
                    snippet,
                }),
            )
            .into());
        }

        let mut pending: Vec<u8> = Vec::new();
        let mut saw_content = false;
        while let Some(chunk) = resp.chunk().await.map_err(|e| self.map_reqwest(e))? {
            saw_content |= chunk.iter().any(|b| !b.is_ascii_whitespace());
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                sink.push_line(&String::from_utf8_lossy(&line[..line.len() - 1]));
            }
        }
        if !pending.is_empty() {
            sink.push_line(&String::from_utf8_lossy(&pending));
        }

        if !saw_content {
            return Err(ProviderError::new(self.provider, ProviderErrorKind::EmptyBody).into());
        }

        debug!(
            provider = %self.provider,
            %status,
            lines = sink.lines_seen(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "exchange complete"
        );
        Ok(())
    }

    fn map_reqwest(&self, e: reqwest::Error) -> AiLlmError {
        if e.is_timeout() {
            AiLlmError::Timeout(self.timeout)
        } else {
            AiLlmError::HttpTransport(e)
        }
    }
}

/// Sink that keeps the whole body.
#[derive(Debug, Default)]
struct BodyText {
    text: String,
    lines: usize,
}

impl BodyText {
    fn into_string(self) -> String {
        self.text
    }
}

impl LineSink for BodyText {
    fn reset(&mut self) {
        self.text.clear();
        self.lines = 0;
    }

    fn push_line(&mut self, line: &str) {
        if self.lines > 0 {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.lines += 1;
    }

    fn lines_seen(&self) -> usize {
        self.lines
    }
}
