// src/defect.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What went wrong with a field. The declaration order is the order defects
/// are reported in for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefectKind {
    Missing,
    TypeMismatch,
    NumericInconsistency,
    Implausible,
}

impl DefectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::TypeMismatch => "type-mismatch",
            Self::NumericInconsistency => "numeric-inconsistency",
            Self::Implausible => "implausible",
        }
    }
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded problem with an extracted field or a relationship
/// between fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    pub field: String,
    pub kind: DefectKind,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Decimal>,
}

impl Defect {
    fn new(field: &str, kind: DefectKind, severity: Severity, message: String) -> Self {
        Self {
            field: field.to_string(),
            kind,
            message,
            severity,
            expected: None,
            actual: None,
        }
    }

    pub fn missing(field: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self::new(field, DefectKind::Missing, severity, message.into())
    }

    pub fn type_mismatch(field: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self::new(field, DefectKind::TypeMismatch, severity, message.into())
    }

    pub fn numeric(
        field: &str,
        severity: Severity,
        expected: Decimal,
        actual: Decimal,
        message: impl Into<String>,
    ) -> Self {
        Self {
            expected: Some(expected),
            actual: Some(actual),
            ..Self::new(field, DefectKind::NumericInconsistency, severity, message.into())
        }
    }

    /// A rule whose expected value does not fit in a decimal.
    pub fn numeric_overflow(
        field: &str,
        severity: Severity,
        actual: Decimal,
        message: impl Into<String>,
    ) -> Self {
        Self {
            actual: Some(actual),
            ..Self::new(field, DefectKind::NumericInconsistency, severity, message.into())
        }
    }

    pub fn implausible(field: &str, message: impl Into<String>) -> Self {
        Self::new(field, DefectKind::Implausible, Severity::Warning, message.into())
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.field, self.kind, self.message)
    }
}
