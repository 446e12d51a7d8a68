//! Extraction prompt templates and response validation
//!
//! The structured-output contract is fixed: the model must return exactly
//! the `ExtractionPayload` shape. Responses failing validation are retried
//! with an instruction-stiffened prompt before being quarantined. A
//! rule-based fallback produces a low-confidence payload when the endpoint
//! is unavailable and policy allows degraded operation.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// System prompt for structured extraction.
pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are an analyst for medical-device service work orders. Extract the \
following fields from the user's text and answer with a single JSON object, \
no prose: keywords (array of strings), primary_symptom, root_cause, summary, \
solution, solution_type, components (array of strings), processes (array of \
strings), main_component, main_process, confidence (number between 0 and 1). \
Unknown fields must be null, never invented.";

/// Appended on validation-failure retries.
pub const STIFFEN_SUFFIX: &str = "\
 Respond with RAW JSON only: no markdown fences, no commentary, all eleven \
keys present exactly as named.";

/// One few-shot example guiding the output shape.
pub fn few_shot_example() -> (serde_json::Value, serde_json::Value) {
    (
        json!("Pump A failed due to overheating, bearing worn out. Replaced bearing and tested."),
        json!({
            "keywords": ["pump", "overheating", "bearing"],
            "primary_symptom": "overheating",
            "root_cause": "worn bearing",
            "summary": "Pump A overheated; bearing replaced",
            "solution": "replace bearing, test pump",
            "solution_type": "repair",
            "components": ["pump", "bearing"],
            "processes": ["replacement", "testing"],
            "main_component": "pump",
            "main_process": "replacement",
            "confidence": 0.9
        }),
    )
}

/// Chat messages for an extraction request.
pub fn build_messages(redacted_text: &str, stiffened: bool) -> Vec<serde_json::Value> {
    let system = if stiffened {
        format!("{}{}", EXTRACTION_SYSTEM_PROMPT, STIFFEN_SUFFIX)
    } else {
        EXTRACTION_SYSTEM_PROMPT.to_string()
    };
    let (example_in, example_out) = few_shot_example();
    vec![
        json!({ "role": "system", "content": system }),
        json!({ "role": "user", "content": example_in }),
        json!({ "role": "assistant", "content": example_out.to_string() }),
        json!({ "role": "user", "content": redacted_text }),
    ]
}

/// The fixed response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(default)]
    pub keywords: Vec<String>,
    pub primary_symptom: Option<String>,
    pub root_cause: Option<String>,
    pub summary: Option<String>,
    pub solution: Option<String>,
    pub solution_type: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub processes: Vec<String>,
    pub main_component: Option<String>,
    pub main_process: Option<String>,
    pub confidence: f64,
}

/// Parse and validate a model response against the contract.
pub fn parse_extraction(content: &str) -> Result<ExtractionPayload, String> {
    // Tolerate fenced output once; the shape itself is not negotiable.
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let payload: ExtractionPayload =
        serde_json::from_str(trimmed).map_err(|e| format!("not valid extraction JSON: {}", e))?;

    if !(0.0..=1.0).contains(&payload.confidence) {
        return Err(format!(
            "confidence {} outside [0, 1]",
            payload.confidence
        ));
    }
    Ok(payload)
}

/// Rule-based fallback when the endpoint cannot be used: unique long tokens
/// as keywords, a symptom guess from fault vocabulary, truncated summary,
/// low confidence.
pub fn fallback_extraction(redacted_text: &str) -> ExtractionPayload {
    let tokens: Vec<&str> = redacted_text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()))
        .filter(|w| !w.is_empty())
        .collect();

    let mut keywords: Vec<String> = tokens
        .iter()
        .filter(|t| t.len() > 4 && !t.contains("REDACTED"))
        .map(|t| t.to_lowercase())
        .collect();
    keywords.sort();
    keywords.dedup();
    keywords.truncate(10);

    let primary_symptom = tokens
        .iter()
        .find(|t| {
            let lower = t.to_lowercase();
            lower.contains("error")
                || lower.contains("fault")
                || lower.contains("fail")
                || lower.contains("defekt")
        })
        .map(|t| t.to_string());

    let summary: String = redacted_text.chars().take(200).collect();

    ExtractionPayload {
        keywords,
        primary_symptom,
        root_cause: None,
        summary: Some(summary),
        solution: None,
        solution_type: None,
        components: Vec::new(),
        processes: Vec::new(),
        main_component: None,
        main_process: None,
        confidence: 0.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_few_shot_and_user_text() {
        let messages = build_messages("pump leaking", false);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[3]["content"], "pump leaking");
    }

    #[test]
    fn stiffened_prompt_adds_suffix() {
        let messages = build_messages("x", true);
        let system = messages[0]["content"].as_str().unwrap();
        assert!(system.contains("RAW JSON only"));
        let plain = build_messages("x", false);
        assert!(!plain[0]["content"].as_str().unwrap().contains("RAW JSON"));
    }

    #[test]
    fn parses_valid_payload() {
        let (_, example) = few_shot_example();
        let payload = parse_extraction(&example.to_string()).unwrap();
        assert_eq!(payload.main_component.as_deref(), Some("pump"));
        assert_eq!(payload.keywords.len(), 3);
        assert!((payload.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn tolerates_fenced_json() {
        let (_, example) = few_shot_example();
        let fenced = format!("```json\n{}\n```", example);
        assert!(parse_extraction(&fenced).is_ok());
    }

    #[test]
    fn rejects_prose_and_bad_confidence() {
        assert!(parse_extraction("Sure! Here is the JSON you asked for").is_err());
        let bad = json!({
            "keywords": [], "primary_symptom": null, "root_cause": null,
            "summary": null, "solution": null, "solution_type": null,
            "components": [], "processes": [], "main_component": null,
            "main_process": null, "confidence": 1.7
        });
        let err = parse_extraction(&bad.to_string()).unwrap_err();
        assert!(err.contains("confidence"));
    }

    #[test]
    fn fallback_produces_low_confidence_keywords() {
        let payload =
            fallback_extraction("Pump motor failure detected, bearing replaced after inspection");
        assert!(payload.confidence < 0.5);
        assert!(payload.keywords.contains(&"bearing".to_string()));
        assert_eq!(payload.primary_symptom.as_deref(), Some("failure"));
        assert!(payload.summary.is_some());
    }

    #[test]
    fn fallback_ignores_redaction_tokens() {
        let payload = fallback_extraction("[REDACTED:NAME] reported compressor issue");
        assert!(!payload.keywords.iter().any(|k| k.contains("redacted")));
    }
}
