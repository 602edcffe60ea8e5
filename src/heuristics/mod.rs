// src/heuristics/mod.rs

mod generic;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::LanguageModel;
use crate::prompt::Prompt;

/// Label-anchored values found in OCR text, kept as the raw strings printed
/// on the invoice. Coercion happens downstream like for any model output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvoiceFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_vat_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
}

impl InvoiceFields {
    /// How many fields were found, out of those the heuristics look for.
    pub fn coverage(&self) -> (usize, usize) {
        let found = [
            &self.invoice_number,
            &self.invoice_date,
            &self.due_date,
            &self.supplier_vat_number,
            &self.currency,
            &self.subtotal,
            &self.tax,
            &self.total,
        ];
        let filled = found.iter().filter(|v| v.is_some()).count();
        (filled, found.len())
    }
}

/// Extract invoice fields from raw OCR text.
pub fn extract_invoice(text: &str) -> InvoiceFields {
    generic::extract(text)
}

/// Offline stand-in for a language model: answers every prompt with the
/// regex heuristics' JSON. Deterministic, so retries repeat the answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicModel;

#[async_trait]
impl LanguageModel for HeuristicModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let fields = extract_invoice(&prompt.document);
        let (filled, total) = fields.coverage();
        debug!(filled, total, "Heuristic extraction");
        serde_json::to_string_pretty(&fields)
            .map_err(|e| LlmError::Unavailable(format!("cannot encode heuristic result: {e}")))
    }

    fn name(&self) -> &str {
        "heuristics"
    }
}
