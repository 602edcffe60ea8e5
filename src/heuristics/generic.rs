// src/heuristics/generic.rs

use regex::Regex;
use std::sync::LazyLock;

use super::InvoiceFields;

/// Main extraction entry point: keyword-anchored regex patterns.
pub fn extract(text: &str) -> InvoiceFields {
    InvoiceFields {
        invoice_number: extract_invoice_no(text),
        invoice_date: extract_labelled_date(text, &INVOICE_DATE_RE),
        due_date: extract_labelled_date(text, &DUE_DATE_RE),
        supplier_vat_number: extract_vat_number(text),
        currency: extract_currency(text),
        subtotal: labelled_amount(text, &SUBTOTAL_RE),
        tax: labelled_amount(text, &TAX_RE),
        total: labelled_amount(text, &TOTAL_RE),
    }
}

// ---------------------------------------------------------------------------
// Scalar field extractors
// ---------------------------------------------------------------------------

const DATE: &str =
    r"([A-Za-z]+\s+\d{1,2},?\s+\d{4}|\d{1,2}\s+[A-Za-z]+\s+\d{4}|\d{4}-\d{2}-\d{2}|\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4})";

static INVOICE_NO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Invoice\s*(?:number|no|#)\.?\s*:?\s*([A-Za-z0-9\-/]+)")
        .expect("invoice number pattern compiles")
});

static INVOICE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(?:Invoice|Issue)\s*Date\s*:?\s*{DATE}"))
        .expect("invoice date pattern compiles")
});

static DUE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(?:Due|Payment\s+due)\s*date\s*:?\s*{DATE}"))
        .expect("due date pattern compiles")
});

static VAT_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)VAT\s*(?:No|Number|Reg(?:istration)?)\.?\s*:?\s*([A-Z]{2}[A-Z0-9 ]{4,}?)\s*$")
        .expect("vat number pattern compiles")
});

static CURRENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(US\$|\b(?:USD|SGD|EUR|GBP|CHF|THB|JPY)\b)").expect("currency pattern compiles")
});

fn extract_invoice_no(text: &str) -> Option<String> {
    // "Invoice No." / "Invoice number" / "Invoice #" then the value
    INVOICE_NO_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
}

fn extract_labelled_date(text: &str, re: &Regex) -> Option<String> {
    re.captures(text).map(|c| c[1].trim().to_string())
}

fn extract_vat_number(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| VAT_NUMBER_RE.captures(line.trim()))
        .map(|c| c[1].trim().to_string())
}

fn extract_currency(text: &str) -> Option<String> {
    let cap = CURRENCY_RE.captures(text)?;
    let raw = cap[1].to_uppercase();
    // Normalise "US$" → "USD"
    Some(if raw == "US$" { "USD".to_string() } else { raw })
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

const AMOUNT: &str = r"(?P<amount>[-(]?\s*[$€£]?\s*\d[\d.,' ]*\)?(?:\s*[A-Z]{3})?)";

fn label_line(label: &str) -> Regex {
    Regex::new(&format!(r"(?i)^\s*(?:{label})\s*[:\-]?\s*{AMOUNT}?\s*$"))
        .expect("amount label pattern compiles")
}

static AMOUNT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^\s*{AMOUNT}\s*$")).expect("amount pattern compiles"));

static SUBTOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| label_line(r"net\s*total|sub\s*-?\s*total|total\s*net|net\s*amount"));

static TAX_RE: LazyLock<Regex> = LazyLock::new(|| {
    label_line(r"(?:vat|tax|gst)(?:\s*amount)?(?:\s*\(?\d+(?:[.,]\d+)?\s*%\)?)?|total\s*(?:vat|tax)")
});

static TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    label_line(r"total\s*amount\s*due|amount\s*due|grand\s*total|total\s*due|total\s*amount|total")
});

/// The amount for a label, either on the label's own line or on the next
/// non-empty line (OCR often splits table cells onto separate lines).
fn labelled_amount(text: &str, label: &Regex) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();

    for (i, line) in lines.iter().enumerate() {
        let Some(cap) = label.captures(line) else {
            continue;
        };
        if let Some(amount) = cap.name("amount") {
            return Some(amount.as_str().trim().to_string());
        }
        let next = lines[i + 1..].iter().find(|l| !l.trim().is_empty());
        if let Some(amount) = next.and_then(|l| AMOUNT_LINE_RE.captures(l)) {
            return Some(amount["amount"].trim().to_string());
        }
    }
    None
}
