// src/events.rs

//! Structured tracing events for attempts and requests.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::error::LlmError;
use crate::retry::ExtractionOutcome;
use crate::validate::{ValidationVerdict, VerdictStatus};

/// Final state of a request, as logged and printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeSummary {
    pub request_id: String,
    pub attempts: usize,
    pub status: VerdictStatus,
    pub defects_by_field: BTreeMap<String, usize>,
    pub errors: usize,
    pub warnings: usize,
}

impl OutcomeSummary {
    pub fn from_outcome(outcome: &ExtractionOutcome) -> Self {
        let verdict = outcome.final_verdict();
        Self {
            request_id: outcome.request_id.clone(),
            attempts: outcome.attempts.len(),
            status: verdict.status,
            defects_by_field: verdict
                .defect_counts_by_field()
                .into_iter()
                .map(|(field, n)| (field.to_string(), n))
                .collect(),
            errors: verdict.errors().count(),
            warnings: verdict.warning_count(),
        }
    }
}

pub fn attempt_finished(request_id: &str, index: u32, verdict: &ValidationVerdict) {
    let (filled, total) = verdict.record.coverage();
    let by_field = verdict.defect_counts_by_field();
    info!(
        request_id = %request_id,
        attempt = index,
        status = %verdict.status,
        filled,
        total,
        parse = ?verdict.record.parse_method(),
        defects = ?by_field,
        "Attempt validated"
    );
}

pub fn request_finished(outcome: &ExtractionOutcome) -> OutcomeSummary {
    let summary = OutcomeSummary::from_outcome(outcome);
    match summary.status {
        VerdictStatus::Rejected => warn!(
            request_id = %summary.request_id,
            attempts = summary.attempts,
            errors = summary.errors,
            warnings = summary.warnings,
            defects = ?summary.defects_by_field,
            "Request rejected"
        ),
        status => info!(
            request_id = %summary.request_id,
            attempts = summary.attempts,
            status = %status,
            warnings = summary.warnings,
            "Request accepted"
        ),
    }
    summary
}

pub fn request_failed(request_id: &str, attempt: u32, err: &LlmError) {
    error!(
        request_id = %request_id,
        attempt,
        error = %err,
        "Language model failed; request abandoned"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::InvoiceRecord;
    use crate::retry::RetryAttempt;
    use crate::schema::SchemaSpec;
    use crate::validate::{ValidationEngine, ValidationPolicy};

    #[test]
    fn test_summary_counts_defects_by_field() {
        let schema = SchemaSpec::invoice_default();
        let verdict = ValidationEngine::new(&schema, ValidationPolicy::default())
            .validate(InvoiceRecord::empty(&schema));
        let outcome = ExtractionOutcome {
            request_id: "abc".to_string(),
            attempts: vec![RetryAttempt {
                index: 0,
                feedback: None,
                completion: String::new(),
                verdict,
            }],
        };

        let summary = request_finished(&outcome);
        assert_eq!(summary.status, VerdictStatus::Rejected);
        assert_eq!(summary.attempts, 1);
        assert_eq!(summary.errors, 5);
        assert_eq!(summary.warnings, 0);
        assert_eq!(summary.defects_by_field["invoice_number"], 1);
        assert!(!summary.defects_by_field.contains_key("due_date"));
    }
}
