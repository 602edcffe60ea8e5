// src/extract/coerce.rs

//! Per-type coercion of raw model values into canonical `FieldValue`s.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::record::FieldValue;
use crate::schema::FieldType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoerceError {
    #[error("'{0}' is not a recognizable amount")]
    Amount(String),
    #[error("'{0}' is not a recognizable date")]
    Date(String),
    #[error("'{0}' is not a whole number")]
    Integer(String),
    #[error("expected a scalar value, found {0}")]
    NotScalar(String),
}

/// A value as it came out of the model: a JSON scalar, or text found by
/// line scanning.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Json(Value),
    Text(String),
}

impl RawValue {
    /// The value as text, for messages and for `malformed` entries.
    pub fn display(&self) -> String {
        match self {
            Self::Json(Value::String(s)) | Self::Text(s) => s.clone(),
            Self::Json(other) => other.to_string(),
        }
    }

    /// `null`, blank strings and the usual "no value" placeholders.
    pub fn is_placeholder(&self) -> bool {
        let text = match self {
            Self::Json(Value::Null) => return true,
            Self::Json(Value::String(s)) | Self::Text(s) => s,
            Self::Json(_) => return false,
        };
        let lowered = text.trim().trim_matches(['"', '\'']).trim().to_lowercase();
        matches!(
            lowered.as_str(),
            "" | "null" | "none" | "nil" | "n/a" | "na" | "-" | "--" | "unknown" | "not found"
                | "not available" | "not specified"
        )
    }
}

pub fn coerce(field_type: FieldType, raw: &RawValue) -> Result<FieldValue, CoerceError> {
    match raw {
        RawValue::Text(s) | RawValue::Json(Value::String(s)) => coerce_str(field_type, s),
        RawValue::Json(Value::Number(n)) => match field_type {
            FieldType::String => Ok(FieldValue::Text(n.to_string())),
            FieldType::CurrencyAmount => number_to_decimal(n)
                .map(|d| FieldValue::Amount(canonical_amount(d)))
                .ok_or_else(|| CoerceError::Amount(n.to_string())),
            FieldType::Integer => number_to_integer(n)
                .map(FieldValue::Integer)
                .ok_or_else(|| CoerceError::Integer(n.to_string())),
            // Some models emit dates as yyyymmdd numbers.
            FieldType::Date => coerce_str(field_type, &n.to_string()),
        },
        RawValue::Json(Value::Bool(b)) => match field_type {
            FieldType::String => Ok(FieldValue::Text(b.to_string())),
            _ => Err(CoerceError::NotScalar(format!("boolean {b}"))),
        },
        RawValue::Json(other) => Err(CoerceError::NotScalar(kind_of(other).to_string())),
    }
}

pub fn coerce_str(field_type: FieldType, s: &str) -> Result<FieldValue, CoerceError> {
    match field_type {
        FieldType::String => Ok(FieldValue::Text(clean_text(s))),
        FieldType::CurrencyAmount => parse_amount(s)
            .map(FieldValue::Amount)
            .ok_or_else(|| CoerceError::Amount(s.trim().to_string())),
        FieldType::Integer => parse_integer(s)
            .map(FieldValue::Integer)
            .ok_or_else(|| CoerceError::Integer(s.trim().to_string())),
        FieldType::Date => parse_date(s)
            .map(FieldValue::Date)
            .ok_or_else(|| CoerceError::Date(s.trim().to_string())),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Collapse runs of whitespace.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹', '₩', '₽', '₺', '₫', '฿', '¢'];

fn is_currency_noise(c: char) -> bool {
    c.is_alphabetic() || c.is_whitespace() || CURRENCY_SYMBOLS.contains(&c)
}

fn number_to_decimal(n: &serde_json::Number) -> Option<Decimal> {
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn number_to_integer(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        let d = number_to_decimal(n)?;
        if d.fract().is_zero() {
            d.trunc().to_i64()
        } else {
            None
        }
    })
}

/// At least two fractional digits; more are kept as given.
fn canonical_amount(mut value: Decimal) -> Decimal {
    if value.scale() < 2 {
        value.rescale(2);
    }
    value
}

/// Parse a money amount written in common locale styles:
/// `1,234.56`, `1.234,56`, `60,00 GBP`, `$ 1 234.56`, `(12.00)`, `-5`.
pub fn parse_amount(input: &str) -> Option<Decimal> {
    let mut s = input.trim();
    let mut negative = false;

    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        negative = true;
        s = inner;
    }

    s = s.trim_matches(is_currency_noise);
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest;
    } else if let Some(rest) = s.strip_suffix('-') {
        negative = !negative;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    s = s.trim_matches(is_currency_noise);

    let body: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '\'' | '’'))
        .collect();
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.') {
        return None;
    }

    let mut value = Decimal::from_str(&normalize_separators(&body)?).ok()?;
    if negative {
        value.set_sign_negative(true);
    }
    Some(canonical_amount(value))
}

/// Rewrite digits with `,`/`.` separators into `1234.56` form, or `None`
/// when the grouping is inconsistent.
fn normalize_separators(body: &str) -> Option<String> {
    let last_comma = body.rfind(',');
    let last_dot = body.rfind('.');

    let (decimal, group) = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => (Some(','), Some('.')),
        (Some(_), Some(_)) => (Some('.'), Some(',')),
        (Some(c), None) => {
            let single = body.matches(',').count() == 1;
            let frac_len = body.len() - c - 1;
            // "1,234" groups thousands; "60,00" is a decimal comma.
            if single && frac_len != 3 {
                (Some(','), None)
            } else {
                (None, Some(','))
            }
        }
        (None, Some(_)) => {
            if body.matches('.').count() == 1 {
                (Some('.'), None)
            } else {
                (None, Some('.'))
            }
        }
        (None, None) => (None, None),
    };

    let (int_part, frac_part) = match decimal {
        Some(sep) => {
            let (i, f) = body.rsplit_once(sep)?;
            (i, Some(f))
        }
        None => (body, None),
    };

    let digits = match group {
        Some(sep) => {
            let groups: Vec<&str> = int_part.split(sep).collect();
            let (first, rest) = groups.split_first()?;
            let first_ok = (1..=3).contains(&first.len());
            if !first_ok || rest.iter().any(|g| g.len() != 3) {
                return None;
            }
            groups.concat()
        }
        None => int_part.to_string(),
    };
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = if digits.is_empty() { "0".to_string() } else { digits };
    match frac_part {
        Some(f) if !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()) => {
            Some(format!("{digits}.{f}"))
        }
        Some(_) => None,
        None => Some(digits),
    }
}

// ---------------------------------------------------------------------------
// Integers
// ---------------------------------------------------------------------------

/// Signs and parentheses follow `parse_amount`; out-of-range values are `None`.
pub fn parse_integer(input: &str) -> Option<i64> {
    // "12.0" and "12,00" are whole numbers too.
    let amount = parse_amount(input)?;
    if !amount.fract().is_zero() {
        return None;
    }
    amount.trunc().to_i64()
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Tried in order; day-first before month-first.
const DATE_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month padding:none]-[day padding:none]"),
    format_description!("[day padding:none]/[month padding:none]/[year]"),
    format_description!("[month padding:none]/[day padding:none]/[year]"),
    format_description!("[day padding:none]-[month padding:none]-[year]"),
    format_description!("[year]/[month padding:none]/[day padding:none]"),
    format_description!("[day padding:none].[month padding:none].[year]"),
    format_description!("[year][month][day]"),
    format_description!("[month repr:long case_sensitive:false] [day padding:none], [year]"),
    format_description!("[month repr:long case_sensitive:false] [day padding:none] [year]"),
    format_description!("[month repr:short case_sensitive:false] [day padding:none], [year]"),
    format_description!("[month repr:short case_sensitive:false] [day padding:none] [year]"),
    format_description!("[day padding:none] [month repr:long case_sensitive:false] [year]"),
    format_description!("[day padding:none] [month repr:short case_sensitive:false] [year]"),
];

pub fn parse_date(input: &str) -> Option<Date> {
    let s = clean_text(input);
    // Drop a time component: "2024-03-05T00:00:00Z".
    let s = match s.find('T') {
        Some(10) if s.as_bytes()[4] == b'-' => &s[..10],
        _ => s.as_str(),
    };
    DATE_FORMATS
        .iter()
        .find_map(|format| Date::parse(s, *format).ok())
}
