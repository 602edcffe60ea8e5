// src/retry.rs

//! The extract → validate → re-prompt loop for one request.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use time::Date;
use tokio::time::timeout;
use tracing::{Instrument, debug, info_span};

use crate::error::{ExtractionError, LlmError};
use crate::events;
use crate::extract::FieldExtractor;
use crate::llm::LanguageModel;
use crate::prompt::{Prompt, PromptOptions};
use crate::schema::SchemaSpec;
use crate::validate::{ValidationEngine, ValidationPolicy, ValidationVerdict, VerdictStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Completions allowed after the first one.
    pub retry_budget: u32,
    /// Upper bound on a single model call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: 2,
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything that shapes a request, passed in by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionPolicy {
    pub validation: ValidationPolicy,
    pub retry: RetryPolicy,
    pub prompt: PromptOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub request_id: String,
    pub ocr_text: String,
}

impl ExtractionRequest {
    /// Request id derived from the OCR text, so reruns of the same document
    /// share an id.
    pub fn new(ocr_text: impl Into<String>) -> Self {
        let ocr_text = ocr_text.into();
        Self {
            request_id: request_id_for(&ocr_text),
            ocr_text,
        }
    }

    pub fn with_id(request_id: impl Into<String>, ocr_text: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ocr_text: ocr_text.into(),
        }
    }
}

/// SHA-256 of the document text, hex encoded.
pub fn request_id_for(ocr_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ocr_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One completion and its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryAttempt {
    pub index: u32,
    /// Corrections sent with this attempt's prompt; `None` for attempt 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub completion: String,
    pub verdict: ValidationVerdict,
}

/// The attempts of a request that ran to a verdict. Always holds at least
/// one attempt; the last one is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionOutcome {
    pub request_id: String,
    pub attempts: Vec<RetryAttempt>,
}

impl ExtractionOutcome {
    pub fn final_attempt(&self) -> &RetryAttempt {
        self.attempts
            .last()
            .expect("an outcome holds at least one attempt")
    }

    pub fn final_verdict(&self) -> &ValidationVerdict {
        &self.final_attempt().verdict
    }

    pub fn status(&self) -> VerdictStatus {
        self.final_verdict().status
    }
}

/// Corrective feedback: every error-severity defect, in verdict order.
pub fn build_feedback(verdict: &ValidationVerdict) -> String {
    verdict
        .errors()
        .map(|d| format!("- {d}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn should_retry(verdict: &ValidationVerdict, retries_used: u32, budget: u32) -> bool {
    verdict.is_rejected() && retries_used < budget
}

/// Drives one request through the language model until a verdict is
/// accepted, the retry budget runs out, or the model fails.
pub struct RetryOrchestrator<'a, M: LanguageModel + ?Sized> {
    model: &'a M,
    schema: &'a SchemaSpec,
    policy: &'a ExtractionPolicy,
    today: Option<Date>,
}

impl<'a, M: LanguageModel + ?Sized> RetryOrchestrator<'a, M> {
    pub fn new(model: &'a M, schema: &'a SchemaSpec, policy: &'a ExtractionPolicy) -> Self {
        Self {
            model,
            schema,
            policy,
            today: None,
        }
    }

    /// Fix the reference date for date plausibility checks.
    pub fn with_today(mut self, today: Date) -> Self {
        self.today = Some(today);
        self
    }

    pub async fn run(&self, request: &ExtractionRequest) -> Result<ExtractionOutcome, ExtractionError> {
        let short_id: String = request.request_id.chars().take(12).collect();
        let span = info_span!("extraction", request_id = %short_id, model = %self.model.name());
        self.run_attempts(request).instrument(span).await
    }

    async fn run_attempts(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let extractor = FieldExtractor::new(self.schema);
        let mut engine = ValidationEngine::new(self.schema, self.policy.validation.clone());
        if let Some(today) = self.today {
            engine = engine.with_today(today);
        }

        let budget = self.policy.retry.retry_budget;
        let base = Prompt::initial(self.schema, &request.ocr_text, &self.policy.prompt);
        let mut prompt = base.clone();
        let mut feedback: Option<String> = None;
        let mut attempts: Vec<RetryAttempt> = Vec::new();

        loop {
            let index = attempts.len() as u32;
            debug!(attempt = index, retry = feedback.is_some(), "Prompting model");

            let completion = match self.complete(&prompt).await {
                Ok(completion) => completion,
                Err(source) => {
                    events::request_failed(&request.request_id, index, &source);
                    return Err(ExtractionError::Collaborator {
                        request_id: request.request_id.clone(),
                        attempt: index,
                        source,
                        completed: attempts,
                    });
                }
            };

            let verdict = engine.validate(extractor.extract(&completion));
            events::attempt_finished(&request.request_id, index, &verdict);

            let next = should_retry(&verdict, index, budget).then(|| build_feedback(&verdict));
            if let Some(next) = &next {
                prompt = base.clone().with_retry(&completion, next.clone());
            }
            attempts.push(RetryAttempt {
                index,
                feedback: feedback.take(),
                completion,
                verdict,
            });

            match next {
                Some(next) => feedback = Some(next),
                None => break,
            }
        }

        let outcome = ExtractionOutcome {
            request_id: request.request_id.clone(),
            attempts,
        };
        events::request_finished(&outcome);
        Ok(outcome)
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let limit = self.policy.retry.call_timeout;
        match timeout(limit, self.model.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::InvoiceRecord;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use time::macros::date;

    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("{}".to_string())
        }
    }

    fn rejected_verdict(schema: &SchemaSpec) -> ValidationVerdict {
        let record = InvoiceRecord::builder(schema)
            .date("invoice_date", date!(2024 - 05 - 02))
            .amount("subtotal", Decimal::new(10000, 2))
            .amount("tax", Decimal::new(1000, 2))
            .amount("total", Decimal::new(11500, 2))
            .build();
        ValidationEngine::new(schema, ValidationPolicy::default())
            .with_today(date!(2024 - 06 - 01))
            .validate(record)
    }

    #[test]
    fn test_request_id_is_stable_sha256() {
        let a = ExtractionRequest::new("Invoice 1");
        let b = ExtractionRequest::new("Invoice 1");
        let c = ExtractionRequest::new("Invoice 2");
        assert_eq!(a.request_id, b.request_id);
        assert_ne!(a.request_id, c.request_id);
        assert_eq!(a.request_id.len(), 64);
    }

    #[test]
    fn test_feedback_lists_errors_in_order() {
        let schema = SchemaSpec::invoice_default();
        let verdict = rejected_verdict(&schema);
        let feedback = build_feedback(&verdict);
        let lines: Vec<&str> = feedback.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "- invoice_number [missing]: required field not found");
        assert!(lines[1].starts_with("- total [numeric-inconsistency]: expected 110.00"));
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let schema = SchemaSpec::invoice_default();
        let verdict = rejected_verdict(&schema);
        assert!(should_retry(&verdict, 0, 2));
        assert!(should_retry(&verdict, 1, 2));
        assert!(!should_retry(&verdict, 2, 2));
        assert!(!should_retry(&verdict, 0, 0));
    }

    #[tokio::test]
    async fn test_timeout_is_collaborator_failure() {
        let schema = SchemaSpec::invoice_default();
        let policy = ExtractionPolicy {
            retry: RetryPolicy {
                retry_budget: 2,
                call_timeout: Duration::from_millis(50),
            },
            ..ExtractionPolicy::default()
        };
        let orchestrator = RetryOrchestrator::new(&SlowModel, &schema, &policy);
        let err = orchestrator
            .run(&ExtractionRequest::new("Invoice 1"))
            .await
            .unwrap_err();

        let ExtractionError::Collaborator {
            attempt,
            source,
            completed,
            ..
        } = err;
        assert_eq!(attempt, 0);
        assert!(matches!(source, LlmError::Timeout(d) if d == Duration::from_millis(50)));
        assert!(completed.is_empty());
    }
}
