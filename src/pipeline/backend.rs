//! The model contract shared by the detector and the extractor.
//!
//! A [`VisionBackend`] takes one [`VisionRequest`] (prompt + page image, plus
//! a JSON schema for structured extraction) and returns either the model's
//! text or a classified [`ModelError`]. The pipeline never sees provider
//! types; [`LlmBackend`] adapts any `edgequake_llm` provider, and tests plug
//! in scripted backends.

use crate::error::{MagnifierError, ModelError};
use crate::pipeline::encode::encode_page;
use crate::pipeline::render::PageImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// One model call.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    /// Optional system message (extraction rules + schema).
    pub system: Option<String>,
    /// User-turn text sent alongside the image.
    pub prompt: String,
    pub image: PageImage,
    /// Response schema for structured extraction.
    pub schema: Option<Value>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

/// The model's answer to one [`VisionRequest`].
#[derive(Debug, Clone, Default)]
pub struct VisionResponse {
    pub content: String,
    /// Model that actually answered.
    pub model: String,
    pub confidence: Option<f32>,
}

/// A vision-capable model endpoint.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Model identity recorded on every result.
    fn model_id(&self) -> &str;

    /// Perform exactly one model call.
    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, ModelError>;
}

/// [`VisionBackend`] over an `edgequake_llm` provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl VisionBackend for LlmBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &VisionRequest) -> Result<VisionResponse, ModelError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = request.system {
            messages.push(ChatMessage::system(system.as_str()));
        }
        messages.push(ChatMessage::user_with_images(
            request.prompt.as_str(),
            vec![encode_page(&request.image)],
        ));

        let options = completion_options(request);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_llm_error(&e))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.model, response.prompt_tokens, response.completion_tokens
        );

        Ok(VisionResponse {
            content: response.content,
            model: self.model.clone(),
            confidence: None,
        })
    }
}

/// Sampling options for one request. A schema switches on JSON mode.
pub(crate) fn completion_options(request: &VisionRequest) -> CompletionOptions {
    let base = if request.schema.is_some() {
        CompletionOptions::json_mode()
    } else {
        CompletionOptions::default()
    };
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: request.max_tokens,
        ..base
    }
}

static RE_SERVER_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:status|http|code)\D{0,8}\b(?:500|502|503|504|529)\b|\b(?:500|502|503|504|529) (?:internal|bad gateway|service unavailable|gateway timeout|overloaded)",
    )
    .unwrap()
});
static RE_RATE_LIMIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b429\b|rate[ _-]?limit|too many requests").unwrap());

/// Map a provider error to the retry classes.
///
/// Typed variants decide on their own; only the catch-all variants, which
/// carry nothing but the provider's message, go through
/// [`classify_provider_error`].
pub fn classify_llm_error(err: &LlmError) -> ModelError {
    let detail = err.to_string();
    match err {
        LlmError::RateLimited(_) => ModelError::RateLimited { detail },
        LlmError::Timeout => ModelError::Timeout { detail },
        LlmError::NetworkError(_) => ModelError::Server { detail },
        LlmError::AuthError(_)
        | LlmError::InvalidRequest(_)
        | LlmError::ConfigError(_)
        | LlmError::ModelNotFound(_)
        | LlmError::TokenLimitExceeded { .. }
        | LlmError::NotSupported(_)
        | LlmError::SerializationError(_) => ModelError::Provider { detail },
        LlmError::ApiError(_) | LlmError::ProviderError(_) | LlmError::Unknown(_) => {
            classify_provider_error(&detail)
        }
    }
}

/// Classify a bare provider message as transient or permanent.
///
/// Status codes only count next to "status"/"HTTP"/"code" or their reason
/// phrase, so token counts and ids never look like a 5xx. Anything not
/// recognised is permanent.
pub fn classify_provider_error(message: &str) -> ModelError {
    let lower = message.to_lowercase();
    let detail = message.to_string();

    if lower.contains("content_filter")
        || lower.contains("content filter")
        || lower.contains("content policy")
        || lower.contains("safety")
        || lower.contains("refused to")
        || lower.contains("refusal")
    {
        ModelError::PolicyRefusal { detail }
    } else if RE_RATE_LIMIT.is_match(&lower) {
        ModelError::RateLimited { detail }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ModelError::Timeout { detail }
    } else if RE_SERVER_STATUS.is_match(&lower)
        || lower.contains("overloaded")
        || lower.contains("service unavailable")
        || lower.contains("internal server error")
        || lower.contains("bad gateway")
        || lower.contains("connection")
    {
        ModelError::Server { detail }
    } else if lower.contains("image")
        && (lower.contains("invalid") || lower.contains("unsupported") || lower.contains("decode"))
    {
        ModelError::InvalidImage { detail }
    } else {
        ModelError::Provider { detail }
    }
}

/// Guess the provider from a model id: `gemini-*`, `gpt-*`/`o*`, `claude-*`.
fn provider_for_model(model: &str) -> Option<&'static str> {
    let m = model.to_lowercase();
    if m.starts_with("gemini") {
        Some("gemini")
    } else if m.starts_with("gpt") || m.starts_with("o1") || m.starts_with("o3") || m.starts_with("o4") {
        Some("openai")
    } else if m.starts_with("claude") {
        Some("anthropic")
    } else if m.starts_with("pixtral") || m.starts_with("mistral") {
        Some("mistral")
    } else {
        None
    }
}

fn create_vision_backend(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn VisionBackend>, MagnifierError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        MagnifierError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(LlmBackend::new(provider, model)))
}

/// Resolve the backend for one stage, from most- to least-specific:
///
/// 1. pre-built backend from the config
/// 2. named provider + the stage's model
/// 3. `EDGEQUAKE_LLM_PROVIDER` + the stage's model
/// 4. provider inferred from the model id
/// 5. `ProviderFactory::from_env` auto-detection
pub fn resolve_backend(
    prebuilt: Option<&Arc<dyn VisionBackend>>,
    provider_name: Option<&str>,
    model: &str,
) -> Result<Arc<dyn VisionBackend>, MagnifierError> {
    if let Some(backend) = prebuilt {
        return Ok(Arc::clone(backend));
    }

    if let Some(name) = provider_name {
        return create_vision_backend(name, model);
    }

    if let Ok(prov) = std::env::var("EDGEQUAKE_LLM_PROVIDER") {
        if !prov.is_empty() {
            return create_vision_backend(&prov, model);
        }
    }

    if let Some(name) = provider_for_model(model) {
        return create_vision_backend(name, model);
    }

    warn!("No provider known for model '{model}', falling back to environment auto-detection");
    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| MagnifierError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY or ANTHROPIC_API_KEY, or name a provider.\n\
                Error: {e}"
            ),
        })?;
    Ok(Arc::new(LlmBackend::new(llm_provider, model)))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend for unit tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays queued answers; repeats the last one once the queue drains.
    pub struct ScriptedBackend {
        answers: Mutex<VecDeque<Result<String, ModelError>>>,
        last: Mutex<Option<Result<String, ModelError>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedBackend {
        pub fn new(answers: Vec<Result<String, ModelError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                last: Mutex::new(None),
                calls: AtomicU32::new(0),
            }
        }

        pub fn always(answer: Result<String, ModelError>) -> Self {
            Self::new(vec![answer])
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedBackend {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: &VisionRequest) -> Result<VisionResponse, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.answers.lock().unwrap().pop_front();
            let answer = match next {
                Some(a) => {
                    *self.last.lock().unwrap() = Some(a.clone());
                    a
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Err(ModelError::Provider { detail: "no script".into() })),
            };
            answer.map(|content| VisionResponse {
                content,
                model: "scripted".into(),
                ..Default::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit() {
        let e = classify_provider_error("HTTP 429 Too Many Requests");
        assert!(matches!(e, ModelError::RateLimited { .. }));
        assert!(e.is_transient());
    }

    #[test]
    fn typed_errors_keep_their_class() {
        let network = LlmError::NetworkError(
            "Connection failed: error sending request: Connection refused (os error 111)".into(),
        );
        assert!(matches!(classify_llm_error(&network), ModelError::Server { .. }));
        assert!(classify_llm_error(&network).is_transient());

        assert!(matches!(
            classify_llm_error(&LlmError::Timeout),
            ModelError::Timeout { .. }
        ));
        assert!(matches!(
            classify_llm_error(&LlmError::RateLimited("slow down".into())),
            ModelError::RateLimited { .. }
        ));
    }

    #[test]
    fn permanent_typed_errors_are_not_retried() {
        let permanent = [
            LlmError::TokenLimitExceeded { max: 500, got: 812 },
            LlmError::AuthError("invalid_api_key".into()),
            LlmError::InvalidRequest("bad image_url".into()),
            LlmError::ConfigError("missing key".into()),
            LlmError::ModelNotFound("gpt-5-vision".into()),
            LlmError::NotSupported("vision".into()),
        ];
        for err in &permanent {
            let classified = classify_llm_error(err);
            assert!(matches!(classified, ModelError::Provider { .. }), "{err}");
            assert!(!classified.is_transient());
        }
    }

    #[test]
    fn catch_all_variants_use_the_message() {
        let e = classify_llm_error(&LlmError::ApiError("HTTP 503 Service Unavailable".into()));
        assert!(matches!(e, ModelError::Server { .. }));
        let e = classify_llm_error(&LlmError::ProviderError(
            "finish_reason=content_filter".into(),
        ));
        assert!(matches!(e, ModelError::PolicyRefusal { .. }));
        let e = classify_llm_error(&LlmError::Unknown("something odd".into()));
        assert!(matches!(e, ModelError::Provider { .. }));
    }

    #[test]
    fn connection_refused_is_not_a_policy_refusal() {
        let e = classify_provider_error("Connection failed: Connection refused (os error 111)");
        assert!(matches!(e, ModelError::Server { .. }));
    }

    #[test]
    fn bare_numbers_are_not_status_codes() {
        let e = classify_provider_error("Token limit exceeded: max 500, got 812");
        assert!(matches!(e, ModelError::Provider { .. }));
        let e = classify_provider_error("request id 502 rejected: invalid schema");
        assert!(!e.is_transient());
    }

    #[test]
    fn schema_requests_use_json_mode() {
        let image = PageImage::from_png("doc", 0, 200, vec![0u8], 1, 1);
        let mut request = VisionRequest {
            system: None,
            prompt: "Is there a magnifier symbol?".into(),
            image,
            schema: None,
            temperature: 0.0,
            max_tokens: Some(16),
        };
        let plain = completion_options(&request);
        assert_eq!(plain.response_format, None);
        assert_eq!(plain.max_tokens, Some(16));

        request.schema = Some(serde_json::json!({"type": "object"}));
        let structured = completion_options(&request);
        assert_eq!(structured.response_format.as_deref(), Some("json_object"));
        assert_eq!(structured.temperature, Some(0.0));
    }

    #[tokio::test]
    async fn llm_backend_returns_content_and_model() {
        let provider = edgequake_llm::MockProvider::new();
        provider.add_response("yes").await;
        let backend = LlmBackend::new(Arc::new(provider), "gpt-4.1-nano");
        let request = VisionRequest {
            system: None,
            prompt: "Is there a magnifier symbol?".into(),
            image: PageImage::from_png("doc", 0, 200, vec![0u8], 1, 1),
            schema: None,
            temperature: 0.0,
            max_tokens: Some(16),
        };
        let response = backend.complete(&request).await.unwrap();
        assert_eq!(response.content, "yes");
        assert_eq!(response.model, "gpt-4.1-nano");
        assert_eq!(response.confidence, None);
    }

    #[test]
    fn classifies_server_errors() {
        assert!(classify_provider_error("API error: 503 Service Unavailable").is_transient());
        assert!(classify_provider_error("model is overloaded").is_transient());
        assert!(classify_provider_error("request timed out").is_transient());
    }

    #[test]
    fn token_counts_are_not_status_codes() {
        let e = classify_provider_error("max_tokens 1500 exceeds limit");
        assert!(matches!(e, ModelError::Provider { .. }));
    }

    #[test]
    fn classifies_policy_refusal() {
        let e = classify_provider_error("finish_reason=content_filter");
        assert!(matches!(e, ModelError::PolicyRefusal { .. }));
        assert!(!e.is_transient());
    }

    #[test]
    fn classifies_invalid_image() {
        let e = classify_provider_error("Invalid image: could not decode");
        assert!(matches!(e, ModelError::InvalidImage { .. }));
    }

    #[test]
    fn unknown_errors_are_permanent() {
        let e = classify_provider_error("401 Unauthorized: bad api key");
        assert!(!e.is_transient());
    }

    #[test]
    fn provider_inferred_from_model() {
        assert_eq!(provider_for_model("gemini-2.0-flash"), Some("gemini"));
        assert_eq!(provider_for_model("gpt-4o-2024-08-06"), Some("openai"));
        assert_eq!(provider_for_model("claude-sonnet-4-20250514"), Some("anthropic"));
        assert_eq!(provider_for_model("llava"), None);
    }

    #[test]
    fn prebuilt_backend_wins() {
        let scripted: Arc<dyn VisionBackend> =
            Arc::new(testing::ScriptedBackend::always(Ok("yes".into())));
        let resolved = resolve_backend(Some(&scripted), Some("openai"), "gpt-4o").unwrap();
        assert_eq!(resolved.model_id(), "scripted");
    }
}
