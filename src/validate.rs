// src/validate.rs

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use time::{Date, OffsetDateTime};

use crate::defect::{Defect, Severity};
use crate::reconcile::{DEFAULT_TOLERANCE, NumericReconciler};
use crate::record::{FieldValue, InvoiceRecord};
use crate::schema::SchemaSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerdictStatus {
    Accepted,
    AcceptedWithWarnings,
    Rejected,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::AcceptedWithWarnings => "accepted-with-warnings",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The decision for one candidate record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationVerdict {
    pub record: InvoiceRecord,
    pub defects: Vec<Defect>,
    pub status: VerdictStatus,
}

impl ValidationVerdict {
    pub fn is_rejected(&self) -> bool {
        self.status == VerdictStatus::Rejected
    }

    pub fn errors(&self) -> impl Iterator<Item = &Defect> {
        self.defects.iter().filter(|d| d.is_error())
    }

    pub fn warning_count(&self) -> usize {
        self.defects.iter().filter(|d| !d.is_error()).count()
    }

    pub fn defect_counts_by_field(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for defect in &self.defects {
            *counts.entry(defect.field.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    /// Default tolerance for numeric rules.
    pub tolerance: Decimal,
    /// Dates further than this from today get an implausible warning.
    /// `None` disables the check.
    pub max_date_skew_years: Option<u32>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_date_skew_years: Some(10),
        }
    }
}

/// Applies presence checks, merges extraction and numeric defects, and
/// decides the status. Pure: the same record always yields the same verdict.
pub struct ValidationEngine<'a> {
    schema: &'a SchemaSpec,
    reconciler: NumericReconciler<'a>,
    policy: ValidationPolicy,
    today: Date,
}

impl<'a> ValidationEngine<'a> {
    pub fn new(schema: &'a SchemaSpec, policy: ValidationPolicy) -> Self {
        Self {
            schema,
            reconciler: NumericReconciler::new(schema, policy.tolerance),
            policy,
            today: OffsetDateTime::now_utc().date(),
        }
    }

    /// Fix the reference date for the plausibility check.
    pub fn with_today(mut self, today: Date) -> Self {
        self.today = today;
        self
    }

    pub fn validate(&self, record: InvoiceRecord) -> ValidationVerdict {
        let mut defects = Vec::new();

        for field in self.schema.fields() {
            let absent = record.entry(&field.name).is_none_or(|e| e.is_absent());
            if field.required && absent {
                defects.push(Defect::missing(
                    &field.name,
                    Severity::Error,
                    "required field not found",
                ));
            }
        }

        defects.extend(record.extraction_defects().iter().cloned());

        let reconciliation = self.reconciler.evaluate(&record);
        defects.extend(reconciliation.defects);

        let mut warned: Vec<&str> = Vec::new();
        for (name, rule) in &reconciliation.unresolved {
            let optional = self.schema.field(name).is_some_and(|f| !f.required);
            if optional && !warned.contains(&name.as_str()) {
                warned.push(name);
                defects.push(Defect::missing(
                    name,
                    Severity::Warning,
                    format!("needed to check '{rule}'"),
                ));
            }
        }

        defects.extend(self.plausibility(&record));

        // Stable: ties keep insertion order.
        defects.sort_by_key(|d| (self.schema.position(&d.field).unwrap_or(usize::MAX), d.kind));

        let status = if defects.iter().any(Defect::is_error) {
            VerdictStatus::Rejected
        } else if defects.is_empty() {
            VerdictStatus::Accepted
        } else {
            VerdictStatus::AcceptedWithWarnings
        };

        ValidationVerdict {
            record,
            defects,
            status,
        }
    }

    fn plausibility(&self, record: &InvoiceRecord) -> Vec<Defect> {
        let mut out = Vec::new();
        for (name, entry) in record.iter() {
            match entry.value() {
                Some(FieldValue::Amount(amount)) if amount.is_sign_negative() && !amount.is_zero() => {
                    out.push(Defect::implausible(name, format!("negative amount {amount}")));
                }
                Some(FieldValue::Date(date)) => {
                    if let Some(years) = self.policy.max_date_skew_years {
                        // Julian years: 365.25 days.
                        let days = (*date - self.today).whole_days().unsigned_abs();
                        if days * 100 > u64::from(years) * 36_525 {
                            out.push(Defect::implausible(
                                name,
                                format!("{date} is more than {years} years from today"),
                            ));
                        }
                    }
                }
                Some(FieldValue::Text(text)) => {
                    let format = self.schema.field(name).and_then(|f| f.format);
                    if let Some(format) = format.filter(|f| !f.is_plausible(text)) {
                        out.push(Defect::implausible(
                            name,
                            format!("'{text}' does not look like a {format}"),
                        ));
                    }
                }
                _ => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defect::DefectKind;
    use crate::record::FieldEntry;
    use time::macros::date;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn engine(schema: &SchemaSpec) -> ValidationEngine<'_> {
        ValidationEngine::new(schema, ValidationPolicy::default()).with_today(date!(2024 - 06 - 01))
    }

    fn valid(schema: &SchemaSpec) -> InvoiceRecord {
        InvoiceRecord::builder(schema)
            .text("invoice_number", "INV-100")
            .date("invoice_date", date!(2024 - 05 - 02))
            .text("supplier_name", "Acme Ltd")
            .amount("subtotal", d("100.00"))
            .amount("tax", d("10.00"))
            .amount("total", d("110.00"))
            .build()
    }

    #[test]
    fn test_valid_record_accepted() {
        let schema = SchemaSpec::invoice_default();
        let verdict = engine(&schema).validate(valid(&schema));
        assert_eq!(verdict.status, VerdictStatus::Accepted);
        assert!(verdict.defects.is_empty());
    }

    #[test]
    fn test_removing_any_required_field_rejects_with_one_missing_defect() {
        let schema = SchemaSpec::invoice_default();
        let engine = engine(&schema);
        for field in schema.fields().iter().filter(|f| f.required) {
            let verdict = engine.validate(valid(&schema).without(&field.name));
            assert_eq!(verdict.status, VerdictStatus::Rejected, "{}", field.name);
            assert_eq!(verdict.defects.len(), 1, "{}: {:?}", field.name, verdict.defects);
            assert_eq!(verdict.defects[0].kind, DefectKind::Missing);
            assert_eq!(verdict.defects[0].field, field.name);
        }
    }

    #[test]
    fn test_inconsistent_total_rejected() {
        let schema = SchemaSpec::invoice_default();
        let record = InvoiceRecord::builder(&schema)
            .text("invoice_number", "INV-100")
            .date("invoice_date", date!(2024 - 05 - 02))
            .amount("subtotal", d("100.00"))
            .amount("tax", d("10.00"))
            .amount("total", d("115.00"))
            .build();
        let verdict = engine(&schema).validate(record);

        assert!(verdict.is_rejected());
        assert_eq!(verdict.defects.len(), 1);
        assert_eq!(verdict.defects[0].field, "total");
        assert_eq!(verdict.defects[0].kind, DefectKind::NumericInconsistency);
        assert_eq!(verdict.defects[0].expected, Some(d("110.00")));
        assert_eq!(verdict.defects[0].actual, Some(d("115.00")));
    }

    #[test]
    fn test_optional_operand_absent_warns_once() {
        let amount = |name: &str| {
            crate::schema::SchemaField::new(
                name,
                crate::schema::FieldType::CurrencyAmount,
                crate::schema::FieldRole::AggregateAmount,
            )
        };
        let rules = vec![
            crate::schema::NumericRule::parse("total = subtotal + shipping").unwrap(),
            crate::schema::NumericRule::parse("gross = total + shipping").unwrap(),
        ];
        let schema = SchemaSpec::new(
            vec![
                amount("subtotal").required(),
                amount("shipping"),
                amount("total").required(),
                amount("gross"),
            ],
            rules,
        )
        .unwrap();
        let record = InvoiceRecord::builder(&schema)
            .amount("subtotal", d("10.00"))
            .amount("total", d("12.00"))
            .amount("gross", d("12.00"))
            .build();
        let verdict = engine(&schema).validate(record);

        assert_eq!(verdict.status, VerdictStatus::AcceptedWithWarnings);
        assert_eq!(verdict.defects.len(), 1);
        assert_eq!(verdict.defects[0].field, "shipping");
        assert_eq!(verdict.defects[0].severity, Severity::Warning);
    }

    #[test]
    fn test_malformed_required_field_is_type_mismatch_only() {
        let schema = SchemaSpec::invoice_default();
        let record = crate::extract::FieldExtractor::new(&schema).extract(
            r#"{"invoice_number": "INV-1", "invoice_date": "2024-05-02",
                "subtotal": "100.00", "tax": "ten", "total": "110.00"}"#,
        );
        let verdict = engine(&schema).validate(record);

        assert!(verdict.is_rejected());
        assert_eq!(verdict.defects.len(), 1);
        assert_eq!(verdict.defects[0].field, "tax");
        assert_eq!(verdict.defects[0].kind, DefectKind::TypeMismatch);
        assert!(matches!(
            verdict.record.entry("tax"),
            Some(FieldEntry { state: crate::record::FieldState::Malformed { .. }, .. })
        ));
    }

    #[test]
    fn test_implausible_values_warn() {
        let schema = SchemaSpec::invoice_default();
        let record = InvoiceRecord::builder(&schema)
            .text("invoice_number", "INV-100")
            .date("invoice_date", date!(1998 - 05 - 02))
            .amount("subtotal", d("-100.00"))
            .amount("tax", d("0.00"))
            .amount("total", d("-100.00"))
            .build();
        let verdict = engine(&schema).validate(record);

        assert_eq!(verdict.status, VerdictStatus::AcceptedWithWarnings);
        let fields: Vec<&str> = verdict.defects.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["invoice_date", "subtotal", "total"]);
        assert!(verdict.defects.iter().all(|d| d.kind == DefectKind::Implausible));

        let lenient = ValidationPolicy {
            max_date_skew_years: None,
            ..ValidationPolicy::default()
        };
        let verdict = ValidationEngine::new(&schema, lenient)
            .with_today(date!(2024 - 06 - 01))
            .validate(verdict.record);
        assert_eq!(verdict.defects.len(), 2);
    }

    #[test]
    fn test_date_skew_counts_days_not_calendar_years() {
        let schema = SchemaSpec::invoice_default();
        let engine = engine(&schema);
        let dated = |due| {
            InvoiceRecord::builder(&schema)
                .text("invoice_number", "INV-100")
                .date("invoice_date", date!(2024 - 05 - 02))
                .date("due_date", due)
                .amount("subtotal", d("100.00"))
                .amount("tax", d("10.00"))
                .amount("total", d("110.00"))
                .build()
        };

        // Ten calendar years back, but ten years and five months of days.
        let verdict = engine.validate(dated(date!(2014 - 01 - 02)));
        assert_eq!(verdict.defects.len(), 1);
        assert_eq!(verdict.defects[0].field, "due_date");
        assert_eq!(verdict.defects[0].kind, DefectKind::Implausible);

        let verdict = engine.validate(dated(date!(2014 - 06 - 03)));
        assert!(verdict.defects.is_empty(), "{:?}", verdict.defects);
        let verdict = engine.validate(dated(date!(2034 - 05 - 30)));
        assert!(verdict.defects.is_empty(), "{:?}", verdict.defects);
    }

    #[test]
    fn test_malformed_vendor_details_warn() {
        let schema = SchemaSpec::invoice_default();
        let record = crate::extract::FieldExtractor::new(&schema).extract(
            r#"{"invoice_number": "INV-1", "invoice_date": "2024-05-02",
                "subtotal": "100.00", "tax": "10.00", "total": "110.00",
                "supplier_email": "billing at acme", "supplier_phone_number": "12-34",
                "supplier_website": "acme", "supplier_vat_number": "VAT?",
                "currency": "eur"}"#,
        );
        let verdict = engine(&schema).validate(record);

        assert_eq!(verdict.status, VerdictStatus::AcceptedWithWarnings);
        let fields: Vec<&str> = verdict.defects.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "supplier_email",
                "supplier_phone_number",
                "supplier_website",
                "supplier_vat_number",
            ]
        );
        assert!(verdict.defects.iter().all(|d| d.kind == DefectKind::Implausible));
        assert_eq!(
            verdict.record.value("currency"),
            Some(&FieldValue::Text("EUR".into()))
        );
    }

    #[test]
    fn test_overflowing_amounts_yield_a_verdict() {
        let schema = SchemaSpec::invoice_default();
        let record = crate::extract::FieldExtractor::new(&schema).extract(
            r#"{"invoice_number": "INV-1", "invoice_date": "2024-05-02",
                "subtotal": "79228162514264337593543950335",
                "tax": "79228162514264337593543950335", "total": "1"}"#,
        );
        let verdict = engine(&schema).validate(record);

        assert!(verdict.is_rejected());
        assert_eq!(verdict.defects.len(), 1);
        assert_eq!(verdict.defects[0].field, "total");
        assert_eq!(verdict.defects[0].kind, DefectKind::NumericInconsistency);
        assert_eq!(verdict.defects[0].expected, None);
    }

    #[test]
    fn test_defects_ordered_by_declaration_then_kind() {
        let schema = SchemaSpec::invoice_default();
        let record = crate::extract::FieldExtractor::new(&schema).extract(
            r#"{"invoice_date": "someday", "subtotal": "100.00", "tax": "10.00", "total": "-120.00"}"#,
        );
        let verdict = engine(&schema).validate(record);

        let order: Vec<(&str, DefectKind)> = verdict
            .defects
            .iter()
            .map(|d| (d.field.as_str(), d.kind))
            .collect();
        assert_eq!(
            order,
            vec![
                ("invoice_number", DefectKind::Missing),
                ("invoice_date", DefectKind::TypeMismatch),
                ("total", DefectKind::NumericInconsistency),
                ("total", DefectKind::Implausible),
            ]
        );
        assert_eq!(verdict.errors().count(), 3);
        assert_eq!(verdict.warning_count(), 1);
        assert_eq!(verdict.defect_counts_by_field()["total"], 2);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let schema = SchemaSpec::invoice_default();
        let engine = engine(&schema);
        let record = valid(&schema).without("tax");
        assert_eq!(engine.validate(record.clone()), engine.validate(record));
    }
}
