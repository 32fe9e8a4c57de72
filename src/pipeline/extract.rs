//! Structured extraction for pages that carry the symbol.
//!
//! The model's JSON is validated strictly at this boundary: every key is
//! required, unknown keys are rejected and no type is coerced (`"3"` is not
//! a cycle id). Any deviation is a [`ModelError::SchemaViolation`], which is
//! permanent, so a malformed answer fails the page instead of being retried
//! into a guess.

use crate::config::RunConfig;
use crate::error::ModelError;
use crate::output::ExtractionRecord;
use crate::pipeline::backend::{VisionBackend, VisionRequest};
use crate::pipeline::page_number::{self, PageNumberField};
use crate::pipeline::render::PageImage;
use crate::pipeline::response;
use crate::pipeline::retry::{call_with_retry, Attempted, RetryPolicy};
use crate::prompts::{extraction_request, extraction_schema, extraction_system_prompt};
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// The extraction response exactly as the schema describes it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAnnotation {
    page_id: i64,
    cycle_id: u64,
    /// Required but nullable: absent is an error, `null` is not.
    #[serde(deserialize_with = "present")]
    page_number: Option<Value>,
    text: String,
}

/// Deserialize a key that must be present even when its value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Pulls the annotation out of a positive page.
#[derive(Clone)]
pub struct Extractor {
    backend: Arc<dyn VisionBackend>,
    policy: RetryPolicy,
    temperature: f32,
    max_tokens: usize,
    system_prompt: Arc<str>,
    schema: Value,
}

impl Extractor {
    pub fn new(
        backend: Arc<dyn VisionBackend>,
        policy: RetryPolicy,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        let schema = extraction_schema();
        Self {
            backend,
            policy,
            temperature,
            max_tokens,
            system_prompt: extraction_system_prompt(&schema).into(),
            schema,
        }
    }

    pub fn from_config(backend: Arc<dyn VisionBackend>, config: &RunConfig) -> Self {
        Self::new(
            backend,
            RetryPolicy::from_config(config),
            config.temperature,
            config.max_tokens,
        )
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub(crate) fn request(&self, page: &PageImage, page_id: u32) -> VisionRequest {
        VisionRequest {
            system: Some(self.system_prompt.to_string()),
            prompt: extraction_request(page_id),
            image: page.clone(),
            schema: Some(self.schema.clone()),
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
        }
    }

    /// One logical submission, retried on transient errors.
    pub async fn submit(
        &self,
        page: &PageImage,
    ) -> Result<Attempted<ExtractionRecord>, Attempted<ModelError>> {
        let page_id = page_id_of(page.page_index)
            .map_err(|value| Attempted { value, attempts: 0 })?;
        let request = self.request(page, page_id);
        let label = format!("Page {} extract", page_id);
        let backend = &self.backend;
        let request = &request;

        let answered = call_with_retry(&self.policy, &label, move |_| async move {
            let response = backend.complete(request).await?;
            let record = parse_annotation(&response.content, page.page_index)?;
            Ok::<_, ModelError>((record, response.model))
        })
        .await?;

        let (annotation, model) = answered.value;
        debug!(
            "Page {}: cycle {} page_number {:?}",
            page_id, annotation.cycle_id, annotation.page_number
        );

        let model_used = if model.is_empty() {
            self.backend.model_id().to_string()
        } else {
            model
        };

        Ok(Attempted {
            value: ExtractionRecord {
                page_id,
                cycle_id: annotation.cycle_id,
                page_number: annotation.page_number,
                extracted_text: annotation.text,
                source_page_index: page.page_index,
                model_used,
                timestamp: Utc::now(),
            },
            attempts: answered.attempts,
        })
    }
}

/// A validated annotation, before it is stamped with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub cycle_id: u64,
    pub page_number: Option<page_number::PageNumber>,
    pub text: String,
}

fn page_id_of(page_index: usize) -> Result<u32, ModelError> {
    u32::try_from(page_index + 1)
        .map_err(|_| ModelError::schema(format!("page index {page_index} out of range")))
}

/// Validate one extraction response for the page at `page_index`.
pub fn parse_annotation(raw: &str, page_index: usize) -> Result<Annotation, ModelError> {
    let cleaned = response::clean(raw);
    let parsed: RawAnnotation = serde_json::from_str(&cleaned)
        .map_err(|e| ModelError::schema(format!("invalid extraction JSON: {e}")))?;

    let expected = page_index as i64 + 1;
    if parsed.page_id != expected {
        return Err(ModelError::schema(format!(
            "page_id {} does not match requested page {}",
            parsed.page_id, expected
        )));
    }

    if parsed.text.trim().is_empty() {
        return Err(ModelError::schema("text is empty"));
    }

    let page_number = match parsed.page_number.as_ref().map(page_number::interpret) {
        None => None,
        Some(PageNumberField::Value(v)) => v,
        Some(PageNumberField::WrongType) => {
            return Err(ModelError::schema(format!(
                "page_number must be an integer, string or null, got {}",
                parsed.page_number.unwrap_or(Value::Null)
            )));
        }
    };

    Ok(Annotation {
        cycle_id: parsed.cycle_id,
        page_number,
        text: parsed.text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::completion_options;
    use crate::pipeline::backend::testing::ScriptedBackend;
    use crate::pipeline::page_number::PageNumber;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::time::Duration;

    fn page(index: usize) -> PageImage {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])));
        PageImage::from_image("doc", index, 200, &img).unwrap()
    }

    fn extractor(backend: Arc<ScriptedBackend>) -> Extractor {
        let policy = RetryPolicy {
            max_retries: 2,
            base_backoff_ms: 1,
            attempt_timeout: Duration::from_secs(5),
        };
        Extractor::new(backend, policy, 0.0, 500)
    }

    fn is_schema(r: Result<Annotation, ModelError>) -> bool {
        matches!(r, Err(ModelError::SchemaViolation { .. }))
    }

    #[test]
    fn extraction_requests_ask_for_json() {
        let backend = Arc::new(ScriptedBackend::always(Ok(String::new())));
        let request = extractor(backend).request(&page(3), 4);
        let options = completion_options(&request);
        assert_eq!(options.response_format.as_deref(), Some("json_object"));
        assert_eq!(options.max_tokens, Some(500));
        assert!(request.prompt.contains('4'));
    }

    #[test]
    fn valid_response() {
        let a = parse_annotation(
            r#"{"page_id": 2, "cycle_id": 7, "page_number": 12, "text": "See clause 4"}"#,
            1,
        )
        .unwrap();
        assert_eq!(a.cycle_id, 7);
        assert_eq!(a.page_number, Some(PageNumber::Arabic(12)));
        assert_eq!(a.text, "See clause 4");
    }

    #[test]
    fn fenced_response_and_roman_page() {
        let raw = "```json\n{\"page_id\": 1, \"cycle_id\": 0, \"page_number\": \"xiv\", \"text\": \"t\"}\n```";
        let a = parse_annotation(raw, 0).unwrap();
        assert_eq!(a.page_number.unwrap().label(), "xiv");
    }

    #[test]
    fn null_page_number_is_none() {
        let a = parse_annotation(
            r#"{"page_id": 1, "cycle_id": 3, "page_number": null, "text": "x"}"#,
            0,
        )
        .unwrap();
        assert_eq!(a.page_number, None);
    }

    #[test]
    fn wrong_types_are_violations() {
        assert!(is_schema(parse_annotation(
            r#"{"page_id": 1, "cycle_id": "3", "page_number": 1, "text": "x"}"#,
            0
        )));
        assert!(is_schema(parse_annotation(
            r#"{"page_id": 1, "cycle_id": -3, "page_number": 1, "text": "x"}"#,
            0
        )));
        assert!(is_schema(parse_annotation(
            r#"{"page_id": 1, "cycle_id": 3, "page_number": 2.5, "text": "x"}"#,
            0
        )));
        assert!(is_schema(parse_annotation(
            r#"{"page_id": 1, "cycle_id": 3, "page_number": true, "text": "x"}"#,
            0
        )));
    }

    #[test]
    fn missing_and_unknown_keys_are_violations() {
        assert!(is_schema(parse_annotation(
            r#"{"page_id": 1, "cycle_id": 3, "text": "x"}"#,
            0
        )));
        assert!(is_schema(parse_annotation(
            r#"{"page_id": 1, "cycle_id": 3, "page_number": null, "text": "x", "note": "?"}"#,
            0
        )));
        assert!(is_schema(parse_annotation("not json at all", 0)));
    }

    #[test]
    fn page_id_must_match_and_text_must_not_be_empty() {
        assert!(is_schema(parse_annotation(
            r#"{"page_id": 5, "cycle_id": 3, "page_number": null, "text": "x"}"#,
            0
        )));
        assert!(is_schema(parse_annotation(
            r#"{"page_id": 1, "cycle_id": 3, "page_number": null, "text": "   "}"#,
            0
        )));
    }

    #[tokio::test]
    async fn submit_builds_record() {
        let backend = Arc::new(ScriptedBackend::always(Ok(
            r#"{"page_id": 3, "cycle_id": 42, "page_number": "7", "text": "Check totals"}"#.into(),
        )));
        let out = extractor(backend).submit(&page(2)).await.unwrap();
        let record = out.value;
        assert_eq!(out.attempts, 1);
        assert_eq!(record.page_id, 3);
        assert_eq!(record.source_page_index, 2);
        assert_eq!(record.cycle_id, 42);
        assert_eq!(record.page_number, Some(PageNumber::Arabic(7)));
        assert_eq!(record.model_used, "scripted");
    }

    #[tokio::test]
    async fn schema_violation_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::always(Ok("{\"page_id\": 1}".into())));
        let err = extractor(backend.clone()).submit(&page(0)).await.unwrap_err();
        assert!(matches!(err.value, ModelError::SchemaViolation { .. }));
        assert_eq!(err.attempts, 1);
        assert_eq!(backend.call_count(), 1);
    }
}
