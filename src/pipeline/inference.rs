//! Inference capability: "given a page image, return the model's raw text".
//!
//! The aggregator only sees the [`InferenceCapability`] trait, so tests and
//! alternative backends plug in without touching retry or merge logic. The
//! production implementation, [`VisionLlmInference`], sends the page as a
//! PNG attachment through any `edgequake_llm` provider.
//!
//! ## Message Layout
//!
//! 1. **System message** — the extraction instruction (or caller override)
//! 2. **User message** — a one-line page note plus the page PNG
//!
//! Each call is bounded by `api_timeout_secs`; dropping the returned future
//! cancels the request.

use crate::config::ExtractionConfig;
use crate::error::VoterListError;
use crate::pipeline::encode;
use crate::pipeline::rasterize::PageImage;
use crate::prompts::{page_instruction, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Default model when a provider is picked from an API key alone.
const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Failure of a single inference call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Network, rate-limit or server-side failure; worth retrying.
    #[error("{0}")]
    Transient(String),

    /// Authentication or invalid request; retrying cannot help.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl InferenceError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, InferenceError::Rejected(_))
    }
}

/// Converts one page image into the model's raw textual answer.
#[async_trait]
pub trait InferenceCapability: Send + Sync {
    async fn infer(&self, page: &PageImage) -> Result<String, InferenceError>;
}

/// Vision-LLM backed inference.
pub struct VisionLlmInference {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
    grayscale: bool,
}

impl VisionLlmInference {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.api_timeout_secs,
            grayscale: config.grayscale,
        }
    }

    /// Resolve a provider from `config` / the environment and wrap it.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, VoterListError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl InferenceCapability for VisionLlmInference {
    async fn infer(&self, page: &PageImage) -> Result<String, InferenceError> {
        let start = Instant::now();
        let image = encode::encode_page(page.image(), self.grayscale)
            .map_err(|e| InferenceError::Rejected(format!("image encoding failed: {e}")))?;

        let instruction = page_instruction(page.page());
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(&instruction, vec![image]),
        ];
        let options = self.options();

        let call = self.provider.chat(&messages, Some(&options));
        let response = tokio::time::timeout(Duration::from_secs(self.timeout_secs), call)
            .await
            .map_err(|_| InferenceError::Timeout {
                secs: self.timeout_secs,
            })?
            .map_err(|e| classify_provider_error(&e.to_string()))?;

        debug!(
            "Page {}: {} input tokens, {} output tokens, {:?}",
            page.page(),
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Sort a provider error message into retryable or not.
///
/// Provider errors arrive as text; auth and request-shape failures are
/// recognised by their status codes and wording.
pub fn classify_provider_error(message: &str) -> InferenceError {
    const PERMANENT_MARKERS: &[&str] = &[
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "invalid_api_key",
        "authentication",
        "invalid_request",
        "content_filter",
        "model_not_found",
    ];
    let lower = message.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        InferenceError::Rejected(message.to_string())
    } else {
        InferenceError::Transient(message.to_string())
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, VoterListError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        VoterListError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. pre-built `config.provider`
/// 2. `config.provider_name` (+ `config.model`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` both set
/// 4. `OPENAI_API_KEY`, then `GEMINI_API_KEY`
/// 5. `ProviderFactory::from_env` auto-detection
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, VoterListError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let default_model = if name == "gemini" {
            DEFAULT_GEMINI_MODEL
        } else {
            DEFAULT_OPENAI_MODEL
        };
        let model = config.model.as_deref().unwrap_or(default_model);
        return create_vision_provider(name, model);
    }

    if let (Some(prov), Some(model)) = (
        env_non_empty("EDGEQUAKE_LLM_PROVIDER"),
        env_non_empty("EDGEQUAKE_MODEL"),
    ) {
        return create_vision_provider(&prov, &model);
    }

    if env_non_empty("OPENAI_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
        return create_vision_provider("openai", model);
    }

    if env_non_empty("GEMINI_API_KEY").is_some() {
        let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
        return create_vision_provider("gemini", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| VoterListError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY, or ANTHROPIC_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_not_retryable() {
        let e = classify_provider_error("HTTP 401 Unauthorized: invalid api key");
        assert!(matches!(e, InferenceError::Rejected(_)));
        assert!(!e.is_retryable());
    }

    #[test]
    fn rate_limits_and_outages_are_retryable() {
        for msg in ["HTTP 429 Too Many Requests", "503 Service Unavailable", "connection reset"] {
            let e = classify_provider_error(msg);
            assert!(e.is_retryable(), "{msg} should be retryable");
        }
        assert!(InferenceError::Timeout { secs: 30 }.is_retryable());
    }

    #[test]
    fn prompt_override_is_used() {
        let config = ExtractionConfig::builder()
            .system_prompt("custom")
            .temperature(0.3)
            .build()
            .unwrap();
        assert_eq!(
            config.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT),
            "custom"
        );
    }
}
