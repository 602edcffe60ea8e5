// src/lib.rs

//! Validation and extraction core for turning OCR'd invoice text into
//! schema-conformant records, with reconciliation of aggregate amounts and a
//! bounded retry loop around the language model.

pub mod config;
pub mod defect;
pub mod error;
pub mod events;
pub mod extract;
pub mod format;
pub mod heuristics;
pub mod llm;
pub mod prompt;
pub mod reconcile;
pub mod record;
pub mod retry;
pub mod schema;
pub mod store;
pub mod validate;

pub use defect::{Defect, DefectKind, Severity};
pub use error::{ExtractionError, LlmError, SchemaError};
pub use extract::FieldExtractor;
pub use format::TextFormat;
pub use heuristics::HeuristicModel;
pub use llm::{ChatClient, LanguageModel};
pub use reconcile::NumericReconciler;
pub use record::{FieldEntry, FieldState, FieldValue, InvoiceRecord, ParseMethod, Provenance};
pub use retry::{
    ExtractionOutcome, ExtractionPolicy, ExtractionRequest, RetryAttempt, RetryOrchestrator,
    RetryPolicy,
};
pub use schema::{FieldRole, FieldType, NumericRule, SchemaField, SchemaSpec};
pub use validate::{ValidationEngine, ValidationPolicy, ValidationVerdict, VerdictStatus};
