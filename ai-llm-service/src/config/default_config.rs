//! Default LLM configs loaded strictly from environment variables.
//!
//! # Environment variables
//!
//! Backend:
//! - `LLM_KIND`        = provider kind (`openai` | `ollama`, default `openai`)
//! - `LLM_URL`         = backend base URL (mandatory)
//! - `LLM_MODEL`       = model identifier (mandatory)
//! - `LLM_API_KEY`     = API key (mandatory for `openai`)
//! - `LLM_STREAM`      = consume streamed replies (default `false`)
//! - `LLM_TEMPERATURE` = sampling temperature (default `0.2`)
//! - `LLM_MAX_TOKENS`  = optional max tokens (u32)
//! - `LLM_TIMEOUT_SECS`= request timeout (default `120`)
//!
//! Session:
//! - `LLM_MAX_ATTEMPTS`             = correlation attempts (default `3`)
//! - `LLM_TRANSPORT_RETRIES`        = transport retries (default `3`)
//! - `LLM_TRANSPORT_RETRY_DELAY_MS` = fixed delay between transport tries (default `1000`)

use std::time::Duration;

use crate::{
    config::{
        llm_model_config::LlmModelConfig, llm_provider::LlmProvider,
        session_config::SessionConfig,
    },
    error_handler::{
        AiLlmError, ConfigError, env_bool, env_opt, env_opt_f32, env_opt_u32, env_opt_u64,
        must_env, validate_http_endpoint, validate_range_f32,
    },
};

/// Builds the backend config from environment.
///
/// # Errors
///
/// - [`ConfigError::MissingVar`] when `LLM_URL`/`LLM_MODEL` (or the key for OpenAI) are absent
/// - [`ConfigError::UnsupportedProvider`] for an unknown `LLM_KIND`
/// - [`ConfigError::InvalidFormat`] when `LLM_URL` has no http(s) scheme
/// - [`ConfigError::OutOfRange`] when `LLM_TEMPERATURE` is outside `0.0..=2.0`
pub fn config_from_env() -> Result<LlmModelConfig, AiLlmError> {
    let provider = match env_opt("LLM_KIND") {
        Some(kind) => kind.parse::<LlmProvider>()?,
        None => LlmProvider::OpenAI,
    };

    let endpoint = must_env("LLM_URL")?;
    validate_http_endpoint("LLM_URL", &endpoint)?;

    let model = must_env("LLM_MODEL")?;
    let api_key = match provider {
        LlmProvider::OpenAI => Some(must_env("LLM_API_KEY")?),
        LlmProvider::Ollama => env_opt("LLM_API_KEY"),
    };

    let temperature = env_opt_f32("LLM_TEMPERATURE")?.unwrap_or(0.2);
    validate_range_f32("temperature", temperature, 0.0, 2.0)?;

    Ok(LlmModelConfig {
        provider,
        model,
        endpoint,
        api_key,
        max_tokens: env_opt_u32("LLM_MAX_TOKENS")?,
        temperature: Some(temperature),
        top_p: None,
        timeout_secs: Some(env_opt_u64("LLM_TIMEOUT_SECS")?.unwrap_or(120)),
        stream: env_bool("LLM_STREAM", false),
    })
}

/// Builds the retry knobs from environment, falling back to [`SessionConfig::default`].
///
/// # Errors
///
/// - [`ConfigError::InvalidNumber`] for unparsable values
/// - [`ConfigError::OutOfRange`] when `LLM_MAX_ATTEMPTS` is `0`
pub fn session_config_from_env() -> Result<SessionConfig, AiLlmError> {
    let defaults = SessionConfig::default();

    let max_attempts = env_opt_u32("LLM_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts);
    if max_attempts == 0 {
        return Err(ConfigError::OutOfRange {
            field: "LLM_MAX_ATTEMPTS",
            detail: "expected at least 1",
        }
        .into());
    }

    Ok(SessionConfig {
        max_attempts,
        transport_retries: env_opt_u32("LLM_TRANSPORT_RETRIES")?
            .unwrap_or(defaults.transport_retries),
        retry_delay: env_opt_u64("LLM_TRANSPORT_RETRY_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay),
    })
}
