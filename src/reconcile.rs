// src/reconcile.rs

//! Cross-checks of aggregate amounts. Flags inconsistencies; never corrects.

use rust_decimal::Decimal;
use tracing::debug;

use crate::defect::Defect;
use crate::record::{FieldState, InvoiceRecord};
use crate::schema::{NumericRule, SchemaSpec, Sign};

/// Default tolerance: one minor currency unit.
pub const DEFAULT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Result of evaluating one rule against one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Holds,
    Fails {
        expected: Decimal,
        actual: Decimal,
        off_by: Decimal,
    },
    /// The constituents, or their difference from the target, exceed the
    /// decimal range.
    Overflow { actual: Decimal },
    /// A referenced field is absent or malformed.
    Skipped { absent: Vec<String> },
}

/// Everything the reconciler found in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub defects: Vec<Defect>,
    /// `(field, rule)` for each absent field that made a rule unevaluable.
    pub unresolved: Vec<(String, String)>,
}

pub struct NumericReconciler<'a> {
    schema: &'a SchemaSpec,
    tolerance: Decimal,
}

impl<'a> NumericReconciler<'a> {
    pub fn new(schema: &'a SchemaSpec, tolerance: Decimal) -> Self {
        Self {
            schema,
            tolerance: tolerance.abs(),
        }
    }

    pub fn evaluate(&self, record: &InvoiceRecord) -> Reconciliation {
        let mut out = Reconciliation::default();

        for rule in self.schema.rules() {
            match self.check_rule(rule, record) {
                RuleOutcome::Holds => {}
                RuleOutcome::Fails {
                    expected,
                    actual,
                    off_by,
                } => {
                    debug!(rule = %rule, %expected, %actual, "Numeric rule failed");
                    out.defects.push(Defect::numeric(
                        &rule.target,
                        rule.severity,
                        expected,
                        actual,
                        format!(
                            "expected {expected} ({}), got {actual}, off by {off_by}",
                            rule.describe_terms()
                        ),
                    ));
                }
                RuleOutcome::Overflow { actual } => {
                    debug!(rule = %rule, %actual, "Numeric rule overflowed");
                    out.defects.push(Defect::numeric_overflow(
                        &rule.target,
                        rule.severity,
                        actual,
                        format!(
                            "{} is out of range, got {actual}",
                            rule.describe_terms()
                        ),
                    ));
                }
                RuleOutcome::Skipped { absent } => {
                    debug!(rule = %rule, ?absent, "Numeric rule skipped");
                    for field in absent {
                        let entry = (field, rule.to_string());
                        if !out.unresolved.contains(&entry) {
                            out.unresolved.push(entry);
                        }
                    }
                }
            }
        }

        out
    }

    pub fn check_rule(&self, rule: &NumericRule, record: &InvoiceRecord) -> RuleOutcome {
        let mut absent = Vec::new();
        let mut skipped = false;

        let mut value_of = |name: &str| -> Option<Decimal> {
            let entry = record.entry(name);
            match entry.map(|e| &e.state) {
                Some(FieldState::Present { value }) => {
                    let v = value.as_decimal();
                    skipped |= v.is_none();
                    v
                }
                Some(FieldState::Malformed { .. }) => {
                    skipped = true;
                    None
                }
                Some(FieldState::Absent) | None => {
                    skipped = true;
                    absent.push(name.to_string());
                    None
                }
            }
        };

        let actual = value_of(&rule.target);
        // None once the running sum leaves the decimal range.
        let mut expected = Some(Decimal::ZERO);
        for term in &rule.terms {
            for name in self.schema.resolve(&term.operand) {
                if let Some(v) = value_of(name) {
                    expected = expected.and_then(|sum| match term.sign {
                        Sign::Plus => sum.checked_add(v),
                        Sign::Minus => sum.checked_sub(v),
                    });
                }
            }
        }

        let actual = match actual {
            Some(actual) if !skipped => actual,
            _ => return RuleOutcome::Skipped { absent },
        };
        let Some((expected, off_by)) =
            expected.and_then(|e| actual.checked_sub(e).map(|diff| (e, diff.abs())))
        else {
            return RuleOutcome::Overflow { actual };
        };

        let tolerance = rule.tolerance.map(|t| t.abs()).unwrap_or(self.tolerance);
        if off_by <= tolerance {
            RuleOutcome::Holds
        } else {
            RuleOutcome::Fails {
                expected,
                actual,
                off_by,
            }
        }
    }
}
