//! Prompts and the extraction schema.
//!
//! Every model-facing string lives here so wording changes touch exactly one
//! file and tests can inspect the prompts without a live model.

use serde_json::{json, Value};

/// Detection prompt: a strict yes/no question about the page margins.
pub const DETECTION_PROMPT: &str = "Is there a magnifier symbol (a small magnifying-glass glyph) \
in this page's margins? Answer with exactly one word: 'yes' or 'no'.";

/// System prompt for the extraction stage.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You read scanned document pages that carry a magnifier symbol (a small magnifying-glass glyph) in the margin.

Extract the annotation marked by the symbol and answer with ONE JSON object that matches the schema below. Rules:

1. page_id: copy the value given in the user message.
2. cycle_id: the integer cycle identifier printed next to the symbol.
3. page_number: the page number printed on the page.
   - Arabic numerals: a JSON integer, e.g. 12
   - Roman numerals: a JSON string exactly as printed, e.g. "xiv"
   - Missing or not legible: null. Never guess.
4. text: the text that follows the magnifier symbol, verbatim.

Output ONLY the JSON object. No Markdown fences, no commentary."#;

/// User-turn text for the extraction stage of one page.
pub fn extraction_request(page_id: u32) -> String {
    format!("page_id: {page_id}\nExtract the magnifier annotation from this page.")
}

/// JSON Schema of the extraction response.
///
/// Every property is required and no others are allowed; `page_number` is
/// the only nullable field.
pub fn extraction_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "MagnifierAnnotation",
        "type": "object",
        "properties": {
            "page_id": {
                "type": "integer",
                "description": "Page id given in the request"
            },
            "cycle_id": {
                "type": "integer",
                "minimum": 0,
                "description": "Cycle identifier printed next to the symbol"
            },
            "page_number": {
                "type": ["integer", "string", "null"],
                "description": "Printed page number; roman numerals as strings; null when absent or illegible"
            },
            "text": {
                "type": "string",
                "description": "The text that follows the magnifier symbol"
            }
        },
        "required": ["page_id", "cycle_id", "page_number", "text"],
        "additionalProperties": false
    })
}

/// Full system prompt sent with the extraction request: rules + schema.
pub fn extraction_system_prompt(schema: &Value) -> String {
    format!(
        "{EXTRACTION_SYSTEM_PROMPT}\n\nJSON Schema:\n{}",
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requires_every_field() {
        let schema = extraction_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["page_id", "cycle_id", "page_number", "text"]);
        assert_eq!(schema["additionalProperties"], Value::Bool(false));
    }

    #[test]
    fn system_prompt_embeds_schema() {
        let prompt = extraction_system_prompt(&extraction_schema());
        assert!(prompt.contains("\"additionalProperties\": false"));
        assert!(prompt.contains("Never guess"));
    }

    #[test]
    fn extraction_request_names_page() {
        assert!(extraction_request(4).starts_with("page_id: 4"));
    }
}
