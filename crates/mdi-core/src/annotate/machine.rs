//! Annotate → validate → repair state machine for a single document.

use std::sync::Arc;

use super::policy::RequestPolicy;
use super::prompt::{build_prompt, build_repair_prompt};
use super::rows::{DocumentRow, OutputRow};
use super::schema::{AnnotationValidator, LlmAnnotation};
use crate::error::AppError;
use crate::traits::LlmClient;

/// Everything known about one document while it moves through the machine.
#[derive(Debug, Clone)]
pub struct AnnotationState {
    pub row: DocumentRow,
    pub prompt: String,
    /// Last raw model output. Kept across a failed invocation so the repair
    /// prompt can still show it.
    pub raw: String,
    pub parsed: Option<LlmAnnotation>,
    pub error: Option<String>,
    /// Repair attempts made so far.
    pub attempt: u32,
    pub max_retries: u32,
    invocation_failed: bool,
}

impl AnnotationState {
    pub fn new(row: DocumentRow, max_retries: u32) -> Self {
        Self {
            row,
            prompt: String::new(),
            raw: String::new(),
            parsed: None,
            error: None,
            attempt: 0,
            max_retries,
            invocation_failed: false,
        }
    }

    pub fn route(&self) -> Route {
        if self.parsed.is_some() {
            Route::Ok
        } else if self.attempt < self.max_retries {
            Route::Repair
        } else {
            Route::Fail
        }
    }

    pub fn into_output(self, annotator: &str) -> OutputRow {
        match &self.parsed {
            Some(annotation) => OutputRow::annotated(&self.row, annotation, annotator, self.attempt),
            None => OutputRow::failed(&self.row, self.error.as_deref(), annotator, self.attempt),
        }
    }
}

/// Where validation sends the document next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Ok,
    Repair,
    Fail,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Annotate,
    Validate,
    Repair,
}

/// Drives documents through prompt, LLM call, validation and repair.
///
/// Cheap to clone: the client and the compiled schema are shared.
#[derive(Clone)]
pub struct AnnotationMachine<L: LlmClient> {
    llm: L,
    policy: RequestPolicy,
    validator: Arc<AnnotationValidator>,
    max_retries: u32,
}

impl<L: LlmClient> AnnotationMachine<L> {
    pub fn new(llm: L, policy: RequestPolicy, max_retries: u32) -> Result<Self, AppError> {
        Ok(Self {
            llm,
            policy,
            validator: Arc::new(AnnotationValidator::new()?),
            max_retries,
        })
    }

    /// Run one document to a terminal state.
    pub async fn run(&self, row: DocumentRow) -> AnnotationState {
        let mut state = AnnotationState::new(row, self.max_retries);
        let mut step = Step::Annotate;

        loop {
            step = match step {
                Step::Annotate => {
                    state.prompt = build_prompt(&state.row);
                    let prompt = state.prompt.clone();
                    self.call(&mut state, &prompt).await;
                    Step::Validate
                }
                Step::Validate => {
                    self.validate(&mut state);
                    match state.route() {
                        Route::Ok | Route::Fail => break,
                        Route::Repair => Step::Repair,
                    }
                }
                Step::Repair => {
                    state.attempt += 1;
                    tracing::debug!(
                        doc_id = %state.row.doc_id,
                        attempt = state.attempt,
                        error = state.error.as_deref().unwrap_or_default(),
                        "Repairing annotation"
                    );
                    let prompt = build_repair_prompt(
                        state.error.as_deref().unwrap_or("unknown error"),
                        &state.raw,
                    );
                    self.call(&mut state, &prompt).await;
                    Step::Validate
                }
            };
        }

        state
    }

    async fn call(&self, state: &mut AnnotationState, prompt: &str) {
        match self.policy.invoke(&self.llm, prompt).await {
            Ok(raw) => {
                state.raw = raw;
                state.invocation_failed = false;
            }
            Err(e) => {
                tracing::warn!(doc_id = %state.row.doc_id, error = %e, "LLM invocation failed");
                state.error = Some(e.to_string());
                state.invocation_failed = true;
            }
        }
    }

    fn validate(&self, state: &mut AnnotationState) {
        state.parsed = None;
        if state.invocation_failed {
            return;
        }
        match self.validator.validate(&state.raw) {
            Ok(annotation) => {
                state.parsed = Some(annotation);
                state.error = None;
            }
            Err(AppError::SchemaValidationError(message)) => state.error = Some(message),
            Err(e) => state.error = Some(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::annotate::rows::AnnotationStatus;
    use crate::annotate::schema::Stance;
    use crate::testutil::{MockLlm, make_document};

    const VALID: &str = r#"{"stance": "dovish", "strength": 1, "reasons": ["a", "b"], "mentions_key_rate": true, "evidence": ["x"]}"#;

    fn machine(llm: MockLlm, max_retries: u32) -> AnnotationMachine<MockLlm> {
        let policy = RequestPolicy {
            request_sleep: Duration::ZERO,
            max_retries: 3,
            backoff_base: Duration::from_millis(1),
            timeout_backoff: Duration::from_millis(1),
        };
        AnnotationMachine::new(llm, policy, max_retries).unwrap()
    }

    #[tokio::test]
    async fn noisy_valid_output_needs_no_repair() {
        let llm = MockLlm::with_responses(vec![Ok(format!("Ответ: {VALID} конец"))]);
        let state = machine(llm.clone(), 2).run(make_document("d1")).await;

        assert_eq!(state.route(), Route::Ok);
        assert_eq!(state.attempt, 0);
        assert!(state.error.is_none());
        assert_eq!(llm.prompts().len(), 1);

        let row = state.into_output("tester");
        assert_eq!(row.status, AnnotationStatus::Ok);
        assert_eq!(row.stance, Stance::Dovish);
        assert_eq!(row.reasons, "a; b");
        assert_eq!(row.evidence, "x");
        assert_eq!(row.annotator, "tester");
    }

    #[tokio::test]
    async fn persistent_schema_error_fails_safely() {
        let invalid = r#"{"stance": "hawkish", "strength": 3}"#;
        let llm = MockLlm::with_responses(vec![
            Ok(invalid.into()),
            Ok(invalid.into()),
            Ok(invalid.into()),
        ]);
        let state = machine(llm.clone(), 2).run(make_document("d1")).await;

        assert_eq!(state.route(), Route::Fail);
        assert_eq!(state.attempt, 2);
        assert_eq!(llm.prompts().len(), 3);
        assert!(llm.prompts()[1].contains("mentions_key_rate"));
        assert!(llm.prompts()[1].contains(invalid));

        let row = state.into_output("tester");
        assert_eq!(row.status, AnnotationStatus::Failed);
        assert_eq!(row.stance, Stance::Irrelevant);
        assert_eq!(row.strength, 0);
        assert!(!row.mentions_key_rate);
        assert_eq!(row.attempts, 2);
        assert!(row.error.unwrap().contains("mentions_key_rate"));
    }

    #[tokio::test]
    async fn repair_recovers() {
        let llm = MockLlm::with_responses(vec![Ok("not json".into()), Ok(VALID.into())]);
        let state = machine(llm.clone(), 2).run(make_document("d1")).await;

        assert_eq!(state.route(), Route::Ok);
        assert_eq!(state.attempt, 1);
        assert!(llm.prompts()[1].contains("json parse failed"));
        assert_eq!(state.into_output("t").attempts, 1);
    }

    #[tokio::test]
    async fn rate_limits_are_absorbed_by_request_policy() {
        let llm = MockLlm::with_responses(vec![
            Err(AppError::RateLimitExceeded),
            Err(AppError::RateLimitExceeded),
            Ok(VALID.into()),
        ]);
        let state = machine(llm, 2).run(make_document("d1")).await;

        assert_eq!(state.route(), Route::Ok);
        assert_eq!(state.attempt, 0);
        assert_eq!(state.parsed.unwrap().stance(), Stance::Dovish);
    }

    #[tokio::test]
    async fn invocation_error_is_kept_without_parsing() {
        let llm = MockLlm::with_responses(vec![Err(AppError::HttpError("boom".into()))]);
        let state = machine(llm, 0).run(make_document("d1")).await;

        assert_eq!(state.route(), Route::Fail);
        let row = state.into_output("t");
        assert_eq!(row.error.as_deref(), Some("HTTP error: boom"));
    }

    #[tokio::test]
    async fn repair_after_invocation_error_reuses_last_raw() {
        let llm = MockLlm::with_responses(vec![
            Ok("{broken".into()),
            Err(AppError::HttpError("boom".into())),
            Ok(VALID.into()),
        ]);
        let state = machine(llm.clone(), 3).run(make_document("d1")).await;

        assert_eq!(state.route(), Route::Ok);
        assert_eq!(state.attempt, 2);
        let prompts = llm.prompts();
        assert!(prompts[2].contains("HTTP error: boom"));
        assert!(prompts[2].contains("{broken"));
    }
}
