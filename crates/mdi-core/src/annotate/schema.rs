//! Annotation schema and validation of raw model output.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Tone of a text relative to monetary tightening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Hawkish,
    Dovish,
    Neutral,
    Mixed,
    Irrelevant,
}

impl Stance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::Hawkish => "hawkish",
            Stance::Dovish => "dovish",
            Stance::Neutral => "neutral",
            Stance::Mixed => "mixed",
            Stance::Irrelevant => "irrelevant",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schema-valid annotation. Only [`AnnotationValidator`] can build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmAnnotation {
    stance: Stance,
    strength: u8,
    reasons: Vec<String>,
    mentions_key_rate: bool,
    evidence: Vec<String>,
    notes: Option<String>,
}

impl LlmAnnotation {
    pub fn stance(&self) -> Stance {
        self.stance
    }

    /// 0..=3
    pub fn strength(&self) -> u8 {
        self.strength
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn mentions_key_rate(&self) -> bool {
        self.mentions_key_rate
    }

    pub fn evidence(&self) -> &[String] {
        &self.evidence
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }
}

// Shape after the JSON schema has accepted the value.
#[derive(Deserialize)]
struct RawAnnotation {
    stance: Stance,
    strength: f64,
    #[serde(default)]
    reasons: Vec<String>,
    mentions_key_rate: bool,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// JSON Schema the model output must satisfy.
pub fn annotation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["stance", "strength", "mentions_key_rate"],
        "properties": {
            "stance": {
                "type": "string",
                "enum": ["hawkish", "dovish", "neutral", "mixed", "irrelevant"]
            },
            "strength": { "type": "integer", "minimum": 0, "maximum": 3 },
            "reasons": { "type": "array", "items": { "type": "string" } },
            "mentions_key_rate": { "type": "boolean" },
            "evidence": { "type": "array", "items": { "type": "string" } },
            "notes": { "type": ["string", "null"] }
        }
    })
}

/// Short structural example embedded in prompts.
pub fn schema_hint() -> serde_json::Value {
    serde_json::json!({
        "stance": "hawkish|dovish|neutral|mixed|irrelevant",
        "strength": 0,
        "reasons": ["..."],
        "mentions_key_rate": true,
        "evidence": ["..."],
        "notes": "..."
    })
}

/// Slice from the first `{` to the last `}`; the trimmed input when there is
/// no such span.
pub fn extract_json_span(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => text[start..=end].trim(),
        _ => text.trim(),
    }
}

/// Compiled annotation schema.
pub struct AnnotationValidator {
    validator: jsonschema::Validator,
}

impl AnnotationValidator {
    pub fn new() -> Result<Self, AppError> {
        let validator = jsonschema::validator_for(&annotation_schema())
            .map_err(|e| AppError::ConfigError(format!("Invalid annotation schema: {e}")))?;
        Ok(Self { validator })
    }

    /// Parse raw model output into an annotation.
    ///
    /// Surrounding prose is tolerated: only the outermost `{...}` span is
    /// parsed.
    pub fn validate(&self, raw: &str) -> Result<LlmAnnotation, AppError> {
        let span = extract_json_span(raw);
        let value: serde_json::Value = serde_json::from_str(span)
            .map_err(|e| AppError::SchemaValidationError(format!("json parse failed: {e}")))?;

        let violations: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|e| e.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(AppError::SchemaValidationError(format!(
                "schema validation failed: {}",
                violations.join("; ")
            )));
        }

        let parsed: RawAnnotation = serde_json::from_value(value).map_err(|e| {
            AppError::SchemaValidationError(format!("schema validation failed: {e}"))
        })?;

        Ok(LlmAnnotation {
            stance: parsed.stance,
            strength: parsed.strength as u8,
            reasons: parsed.reasons,
            mentions_key_rate: parsed.mentions_key_rate,
            evidence: parsed.evidence,
            notes: parsed.notes,
        })
    }
}
