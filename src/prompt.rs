// src/prompt.rs

use serde::Serialize;

use crate::schema::{FieldType, SchemaSpec};

/// Limits applied when building prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptOptions {
    /// OCR text longer than this is truncated to stay within context limits.
    pub max_chars: usize,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self { max_chars: 12_000 }
    }
}

/// What the model saw last time and what it got wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryContext {
    pub previous_completion: String,
    pub feedback: String,
}

/// One request to the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryContext>,
}

impl Prompt {
    pub fn initial(schema: &SchemaSpec, ocr_text: &str, options: &PromptOptions) -> Self {
        Self {
            system: system_prompt(schema),
            document: truncate_chars(ocr_text, options.max_chars).to_string(),
            retry: None,
        }
    }

    pub fn with_retry(mut self, previous_completion: &str, feedback: String) -> Self {
        self.retry = Some(RetryContext {
            previous_completion: previous_completion.to_string(),
            feedback,
        });
        self
    }

    pub fn user_message(&self) -> String {
        format!(
            "Extract invoice data from the following OCR text:\n\n{}",
            self.document
        )
    }

    pub fn retry_message(&self) -> Option<String> {
        self.retry.as_ref().map(|r| {
            format!(
                "Your previous answer had these problems:\n{}\n\n\
                 Re-read the invoice text and return the corrected JSON object only.",
                r.feedback
            )
        })
    }
}

/// Instructions listing every schema field with its expected JSON shape.
pub fn system_prompt(schema: &SchemaSpec) -> String {
    let mut out = String::from(
        "You are an invoice data extraction assistant.\n\
         Given raw OCR text of an invoice, extract structured data and return ONLY valid JSON.\n\n\
         The JSON must be a single flat object with exactly these keys:\n{\n",
    );

    let count = schema.fields().len();
    for (i, field) in schema.fields().iter().enumerate() {
        let shape = match field.field_type {
            FieldType::String => "string or null",
            FieldType::Date => "string (YYYY-MM-DD) or null",
            FieldType::CurrencyAmount => "number or null",
            FieldType::Integer => "integer or null",
        };
        let comma = if i + 1 < count { "," } else { "" };
        let required = if field.required { " (required)" } else { "" };
        let hint = field.format.map(|f| format!(" [{f}]")).unwrap_or_default();
        out.push_str(&format!("  \"{}\": {shape}{hint}{required}{comma}\n", field.name));
    }
    out.push_str("}\n");

    if !schema.rules().is_empty() {
        out.push_str("\nThese relationships must hold between the amounts:\n");
        for rule in schema.rules() {
            out.push_str(&format!("- {rule}\n"));
        }
    }

    out.push_str(
        "\nNotes:\n\
         - The text may be garbled by OCR. Do your best to reconstruct the data.\n\
         - Write amounts as plain numbers without currency symbols or thousands separators.\n\
         - Use null for fields you cannot determine.\n\
         - Return ONLY the JSON object, no markdown fences, no commentary.",
    );
    out
}

/// Longest prefix of at most `max_chars` characters.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_fields_and_rules() {
        let schema = SchemaSpec::invoice_default();
        let prompt = system_prompt(&schema);
        assert!(prompt.contains("\"invoice_number\": string or null (required),"));
        assert!(prompt.contains("\"total\": number or null (required)\n}"));
        assert!(prompt.contains("- total = subtotal + tax"));
        assert!(prompt.contains("\"supplier_email\": string or null [email],"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("££££", 2), "££");
        assert_eq!(truncate_chars("abc", 10), "abc");

        let options = PromptOptions { max_chars: 3 };
        let prompt = Prompt::initial(&SchemaSpec::invoice_default(), "€€€€€", &options);
        assert_eq!(prompt.document, "€€€");
    }

    #[test]
    fn test_retry_message_only_on_retry() {
        let schema = SchemaSpec::invoice_default();
        let prompt = Prompt::initial(&schema, "Invoice 1", &PromptOptions::default());
        assert!(prompt.retry_message().is_none());
        assert!(prompt.user_message().ends_with("Invoice 1"));

        let retry = prompt.with_retry("{}", "- total: missing".to_string());
        let message = retry.retry_message().unwrap();
        assert!(message.contains("- total: missing"));
        assert_eq!(retry.retry.unwrap().previous_completion, "{}");
    }
}
