use serde::Serialize;

use super::schema::{LlmAnnotation, Stance};

/// One document to annotate, after column mapping and text normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    pub event_id: String,
    pub doc_id: String,
    /// Lower-cased.
    pub source_type: String,
    pub source_name: String,
    pub published_at: Option<String>,
    pub title: String,
    pub lead: String,
    /// Title, lead and body joined and truncated for the prompt.
    pub text_focus: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    Ok,
    Failed,
}

/// One row of the annotation output table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRow {
    pub event_id: String,
    pub doc_id: String,
    pub source_type: String,
    pub source_name: String,
    pub published_at: Option<String>,
    pub title: Option<String>,
    pub stance: Stance,
    pub strength: u8,
    pub reasons: String,
    pub mentions_key_rate: bool,
    pub evidence: String,
    pub notes: Option<String>,
    pub annotator: String,
    pub attempts: u32,
    pub status: AnnotationStatus,
    pub error: Option<String>,
}

impl OutputRow {
    pub const COLUMNS: [&'static str; 16] = [
        "event_id",
        "doc_id",
        "source_type",
        "source_name",
        "published_at",
        "title",
        "stance",
        "strength",
        "reasons",
        "mentions_key_rate",
        "evidence",
        "notes",
        "annotator",
        "attempts",
        "status",
        "error",
    ];

    pub fn annotated(
        doc: &DocumentRow,
        annotation: &LlmAnnotation,
        annotator: &str,
        attempts: u32,
    ) -> Self {
        Self {
            stance: annotation.stance(),
            strength: annotation.strength(),
            reasons: annotation.reasons().join("; "),
            mentions_key_rate: annotation.mentions_key_rate(),
            evidence: annotation.evidence().join(" ||| "),
            notes: annotation.notes().map(str::to_string),
            status: AnnotationStatus::Ok,
            error: None,
            ..Self::base(doc, annotator, attempts)
        }
    }

    /// Safe default row for a document the model never annotated validly.
    pub fn failed(doc: &DocumentRow, error: Option<&str>, annotator: &str, attempts: u32) -> Self {
        let error = error
            .filter(|e| !e.is_empty())
            .unwrap_or("unknown error")
            .to_string();
        Self {
            error: Some(error),
            ..Self::base(doc, annotator, attempts)
        }
    }

    fn base(doc: &DocumentRow, annotator: &str, attempts: u32) -> Self {
        Self {
            event_id: doc.event_id.clone(),
            doc_id: doc.doc_id.clone(),
            source_type: doc.source_type.clone(),
            source_name: doc.source_name.clone(),
            published_at: doc.published_at.clone(),
            title: Some(doc.title.clone()).filter(|t| !t.is_empty()),
            stance: Stance::Irrelevant,
            strength: 0,
            reasons: String::new(),
            mentions_key_rate: false,
            evidence: String::new(),
            notes: None,
            annotator: annotator.to_string(),
            attempts,
            status: AnnotationStatus::Failed,
            error: None,
        }
    }
}
