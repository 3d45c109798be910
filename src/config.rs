//! Configuration types for voter-list extraction.
//!
//! All job behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across jobs and to log exactly what a run used.

use crate::error::VoterListError;
use crate::pipeline::rasterize::CancelToken;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Lowest DPI at which dense small-font voter-list text stays legible.
pub const MIN_DPI: u32 = 150;
/// Highest DPI accepted; beyond this images exceed provider upload limits.
pub const MAX_DPI: u32 = 400;

/// Configuration for a voter-list extraction job.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use voterlist_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .concurrency(4)
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each page. Range: 150–400. Default: 200.
    ///
    /// Voter lists print three columns of small Devanagari text per page;
    /// below 150 DPI conjunct characters and EPIC digits blur together and
    /// extraction accuracy drops sharply.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2800.
    ///
    /// Caps memory for oversized pages regardless of DPI. An A4 page at 200
    /// DPI is about 1654 × 2339 px and stays under the cap.
    pub max_rendered_pixels: u32,

    /// Send pages to the model as 8-bit grayscale PNG. Default: true.
    pub grayscale: bool,

    /// Number of concurrent inference calls. Default: 4.
    ///
    /// Output order is always page order regardless of this value. Lower it
    /// if the provider answers with rate-limit errors.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4.1-mini", "gemini-2.0-flash".
    /// If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "anthropic").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 — transcription, not generation.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 8192.
    ///
    /// A full page of ~30 electors serialised as JSON with Devanagari text
    /// runs to several thousand tokens; truncation yields unparseable JSON.
    pub max_tokens: usize,

    /// Retries per page on a transient inference failure. Default: 2.
    ///
    /// Malformed or empty responses are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-inference-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom extraction instruction. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Receives status and percentage updates while the job runs.
    pub progress_callback: Option<ProgressCallback>,

    /// Checked between pages; cancelling aborts the job with
    /// [`VoterListError::Cancelled`].
    pub cancel_token: Option<CancelToken>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2800,
            grayscale: true,
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            password: None,
            system_prompt: None,
            progress_callback: None,
            cancel_token: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("grayscale", &self.grayscale)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("system_prompt", &self.system_prompt.is_some())
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(MIN_DPI, MAX_DPI);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px;
        self
    }

    pub fn grayscale(mut self, on: bool) -> Self {
        self.config.grayscale = on;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.config.cancel_token = Some(token);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, VoterListError> {
        let c = &self.config;
        if c.max_rendered_pixels < 1000 {
            return Err(VoterListError::InvalidConfig(format!(
                "max_rendered_pixels must be ≥ 1000 for legible text, got {}",
                c.max_rendered_pixels
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(VoterListError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(VoterListError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_legible() {
        let c = ExtractionConfig::default();
        assert!(c.dpi >= MIN_DPI);
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.max_retries, 2);
    }

    #[test]
    fn builder_clamps_dpi_and_concurrency() {
        let c = ExtractionConfig::builder()
            .dpi(72)
            .concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, MIN_DPI);
        assert_eq!(c.concurrency, 1);

        let c = ExtractionConfig::builder().dpi(1200).build().unwrap();
        assert_eq!(c.dpi, MAX_DPI);
    }

    #[test]
    fn builder_rejects_tiny_pixel_cap() {
        let err = ExtractionConfig::builder()
            .max_rendered_pixels(300)
            .build()
            .unwrap_err();
        assert!(matches!(err, VoterListError::InvalidConfig(_)));
    }

    #[test]
    fn debug_redacts_password() {
        let c = ExtractionConfig::builder()
            .password("hunter2")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }
}
