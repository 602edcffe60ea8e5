// src/format.rs

//! Shapes of free-text vendor details (email, phone, website, VAT number,
//! currency code) and their canonical spellings.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("email pattern compiles")
});

static WEBSITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}(?:[/?#]\S*)?$")
        .expect("website pattern compiles")
});

/// Two-letter country prefix, or a bare national number.
static VAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Z]{2}[0-9A-Z]{8,12}|[0-9]{8,12})$").expect("vat pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextFormat {
    Email,
    Phone,
    Website,
    VatNumber,
    CurrencyCode,
}

impl TextFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Website => "website",
            Self::VatNumber => "vat-number",
            Self::CurrencyCode => "currency-code",
        }
    }

    /// Canonical spelling of `raw`, or `None` when it does not have this
    /// shape. Canonical values normalize to themselves.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        match self {
            Self::Email => EMAIL_RE.is_match(raw).then(|| raw.to_lowercase()),
            Self::Phone => normalize_phone(raw),
            Self::Website => {
                let url = if raw.starts_with("http://") || raw.starts_with("https://") {
                    raw.to_string()
                } else {
                    format!("https://{raw}")
                };
                WEBSITE_RE.is_match(&url).then_some(url)
            }
            Self::VatNumber => {
                let cleaned: String = raw
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_uppercase();
                VAT_RE.is_match(&cleaned).then_some(cleaned)
            }
            Self::CurrencyCode => (!raw.is_empty()).then(|| raw.to_uppercase()),
        }
    }

    pub fn is_plausible(&self, value: &str) -> bool {
        self.normalize(value).is_some()
    }
}

impl fmt::Display for TextFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digits with an optional leading `+`; 7 to 15 digits.
fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if !(7..=15).contains(&digits.len()) {
        return None;
    }
    if raw.starts_with('+') {
        Some(format!("+{digits}"))
    } else {
        Some(digits)
    }
}
