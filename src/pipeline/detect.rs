//! Symbol detection: one yes/no question per page.

use crate::config::RunConfig;
use crate::error::ModelError;
use crate::output::DetectionResult;
use crate::pipeline::backend::{VisionBackend, VisionRequest};
use crate::pipeline::render::PageImage;
use crate::pipeline::response;
use crate::pipeline::retry::{call_with_retry, Attempted, RetryPolicy};
use crate::prompts::DETECTION_PROMPT;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Detection answers are a single word; this leaves room for a trailing period.
const DETECTION_MAX_TOKENS: usize = 16;

/// Asks a vision model whether a page carries the magnifier symbol.
#[derive(Clone)]
pub struct Detector {
    backend: Arc<dyn VisionBackend>,
    policy: RetryPolicy,
    temperature: f32,
}

impl Detector {
    pub fn new(backend: Arc<dyn VisionBackend>, policy: RetryPolicy, temperature: f32) -> Self {
        Self {
            backend,
            policy,
            temperature,
        }
    }

    pub fn from_config(backend: Arc<dyn VisionBackend>, config: &RunConfig) -> Self {
        Self::new(backend, RetryPolicy::from_config(config), config.temperature)
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub(crate) fn request(&self, page: &PageImage) -> VisionRequest {
        VisionRequest {
            system: None,
            prompt: DETECTION_PROMPT.to_string(),
            image: page.clone(),
            schema: None,
            temperature: self.temperature,
            max_tokens: Some(DETECTION_MAX_TOKENS),
        }
    }

    /// One logical submission, retried on transient errors.
    pub async fn submit(
        &self,
        page: &PageImage,
    ) -> Result<Attempted<DetectionResult>, Attempted<ModelError>> {
        let request = self.request(page);
        let label = format!("Page {} detect", page.page_index + 1);
        let backend = &self.backend;
        let request = &request;

        let answered = call_with_retry(&self.policy, &label, move |_| async move {
            let response = backend.complete(request).await?;
            let has_symbol = parse_answer(&response.content)?;
            Ok::<_, ModelError>((has_symbol, response))
        })
        .await?;

        let (has_symbol, response) = answered.value;
        debug!(
            "Page {}: symbol {} ({:?})",
            page.page_index + 1,
            if has_symbol { "present" } else { "absent" },
            response.content
        );

        let model = if response.model.is_empty() {
            self.backend.model_id().to_string()
        } else {
            response.model
        };

        Ok(Attempted {
            value: DetectionResult {
                page_index: page.page_index,
                has_symbol,
                raw_model_output: response.content,
                confidence: response.confidence,
                model,
                attempt: answered.attempts,
                timestamp: Utc::now(),
            },
            attempts: answered.attempts,
        })
    }
}

/// Map a model answer to presence of the symbol.
///
/// Surrounding whitespace, quotes and punctuation are ignored, case too.
/// Anything other than yes/true/no/false is a schema violation, never a
/// silent "no".
pub fn parse_answer(raw: &str) -> Result<bool, ModelError> {
    let cleaned = response::clean(raw);
    let word = cleaned
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    match word.as_str() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        _ => Err(ModelError::schema(format!(
            "detector answered {:?}, expected 'yes' or 'no'",
            raw
        ))),
    }
}
