// src/schema.rs

//! Declarative invoice schema: the fields a record may carry and the numeric
//! relationships that must hold between them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::defect::Severity;
use crate::error::SchemaError;
use crate::extract::coerce;
use crate::format::TextFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldType {
    String,
    Date,
    CurrencyAmount,
    Integer,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Date => "date",
            Self::CurrencyAmount => "currency-amount",
            Self::Integer => "integer",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::CurrencyAmount | Self::Integer)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldRole {
    Identifier,
    Date,
    LineAmount,
    AggregateAmount,
    VendorInfo,
}

impl FieldRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::Date => "date",
            Self::LineAmount => "line-amount",
            Self::AggregateAmount => "aggregate-amount",
            Self::VendorInfo => "vendor-info",
        }
    }
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "identifier" => Ok(Self::Identifier),
            "date" => Ok(Self::Date),
            "line-amount" => Ok(Self::LineAmount),
            "aggregate-amount" => Ok(Self::AggregateAmount),
            "vendor-info" => Ok(Self::VendorInfo),
            other => Err(format!("unknown field role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    pub role: FieldRole,
    /// Other keys a model may use for this field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Literal applied when an optional field is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Expected shape of a string value; normalized on extraction, warned
    /// about on validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<TextFormat>,
}

impl SchemaField {
    pub fn new(name: &str, field_type: FieldType, role: FieldRole) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            role,
            aliases: Vec::new(),
            default: None,
            format: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Normalized lookup keys: the name first, then aliases in order.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .map(|k| normalize_key(k))
    }
}

/// Lowercase, with every run of non-alphanumerics collapsed to `_`.
/// `"Invoice No."` becomes `invoice_no`.
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

// ---------------------------------------------------------------------------
// Numeric rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Field(String),
    /// Every schema field with this role, in declaration order.
    SumOfRole(FieldRole),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub sign: Sign,
    pub operand: Operand,
}

/// `target = term (+|- term)*`, e.g. `total = subtotal + tax` or
/// `subtotal = sum(line-amount) - discount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleDef", into = "RuleDef")]
pub struct NumericRule {
    pub target: String,
    pub terms: Vec<Term>,
    /// Overrides the policy tolerance for this rule.
    pub tolerance: Option<Decimal>,
    pub severity: Severity,
}

impl NumericRule {
    pub fn parse(expr: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidRule {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let (lhs, rhs) = expr.split_once('=').ok_or_else(|| invalid("missing '='"))?;
        let target = lhs.trim();
        if !is_identifier(target) {
            return Err(invalid("left side must be a single field name"));
        }
        let terms = parse_terms(rhs).map_err(|reason| invalid(&reason))?;

        Ok(Self {
            target: target.to_string(),
            terms,
            tolerance: None,
            severity: Severity::Error,
        })
    }

    pub fn with_tolerance(mut self, tolerance: Decimal) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// The right-hand side as written, e.g. `subtotal + tax`.
    pub fn describe_terms(&self) -> String {
        let mut out = String::new();
        for (i, term) in self.terms.iter().enumerate() {
            match (i, term.sign) {
                (0, Sign::Plus) => {}
                (0, Sign::Minus) => out.push('-'),
                (_, Sign::Plus) => out.push_str(" + "),
                (_, Sign::Minus) => out.push_str(" - "),
            }
            match &term.operand {
                Operand::Field(name) => out.push_str(name),
                Operand::SumOfRole(role) => out.push_str(&format!("sum({role})")),
            }
        }
        out
    }
}

impl fmt::Display for NumericRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.target, self.describe_terms())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_terms(rhs: &str) -> Result<Vec<Term>, String> {
    let mut terms = Vec::new();
    let mut rest = rhs.trim();
    let mut sign = Sign::Plus;

    if let Some(tail) = rest.strip_prefix('-') {
        sign = Sign::Minus;
        rest = tail.trim_start();
    }

    loop {
        let (operand, tail) = parse_operand(rest)?;
        terms.push(Term { sign, operand });
        rest = tail.trim_start();

        let Some(op) = rest.chars().next() else {
            return Ok(terms);
        };
        sign = match op {
            '+' => Sign::Plus,
            '-' => Sign::Minus,
            other => return Err(format!("unexpected '{other}'")),
        };
        rest = rest[1..].trim_start();
    }
}

fn parse_operand(s: &str) -> Result<(Operand, &str), String> {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    let ident = &s[..end];
    if !is_identifier(ident) {
        return Err(if s.is_empty() {
            "expected a field name".to_string()
        } else {
            format!("expected a field name at '{s}'")
        });
    }

    let tail = s[end..].trim_start();
    if ident == "sum" && tail.starts_with('(') {
        let close = tail.find(')').ok_or("unclosed 'sum('")?;
        let role = tail[1..close].parse::<FieldRole>()?;
        return Ok((Operand::SumOfRole(role), &tail[close + 1..]));
    }
    Ok((Operand::Field(ident.to_string()), &s[end..]))
}

#[derive(Serialize, Deserialize)]
struct RuleDef {
    expr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tolerance: Option<Decimal>,
    #[serde(default = "default_rule_severity")]
    severity: Severity,
}

fn default_rule_severity() -> Severity {
    Severity::Error
}

impl TryFrom<RuleDef> for NumericRule {
    type Error = SchemaError;

    fn try_from(def: RuleDef) -> Result<Self, Self::Error> {
        let mut rule = NumericRule::parse(&def.expr)?.with_severity(def.severity);
        rule.tolerance = def.tolerance;
        Ok(rule)
    }
}

impl From<NumericRule> for RuleDef {
    fn from(rule: NumericRule) -> Self {
        RuleDef {
            expr: rule.to_string(),
            tolerance: rule.tolerance,
            severity: rule.severity,
        }
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A validated set of fields and numeric rules. Immutable once built; shared
/// by reference across concurrent requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef", into = "SchemaDef")]
pub struct SchemaSpec {
    fields: Vec<SchemaField>,
    rules: Vec<NumericRule>,
}

#[derive(Serialize, Deserialize)]
struct SchemaDef {
    fields: Vec<SchemaField>,
    #[serde(default)]
    rules: Vec<NumericRule>,
}

impl TryFrom<SchemaDef> for SchemaSpec {
    type Error = SchemaError;

    fn try_from(def: SchemaDef) -> Result<Self, Self::Error> {
        SchemaSpec::new(def.fields, def.rules)
    }
}

impl From<SchemaSpec> for SchemaDef {
    fn from(spec: SchemaSpec) -> Self {
        SchemaDef {
            fields: spec.fields,
            rules: spec.rules,
        }
    }
}

impl SchemaSpec {
    pub fn new(fields: Vec<SchemaField>, rules: Vec<NumericRule>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut owners: HashMap<String, &str> = HashMap::new();
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            for key in field.keys() {
                match owners.get(&key) {
                    Some(other) if *other != field.name => {
                        return Err(SchemaError::AliasCollision {
                            alias: key,
                            field: field.name.clone(),
                            other: other.to_string(),
                        });
                    }
                    _ => {
                        owners.insert(key, &field.name);
                    }
                }
            }

            if field.format.is_some() && field.field_type != FieldType::String {
                return Err(SchemaError::FormatOnNonString(field.name.clone()));
            }

            if let Some(default) = &field.default {
                if field.required {
                    return Err(SchemaError::DefaultOnRequired(field.name.clone()));
                }
                coerce::coerce_str(field.field_type, default).map_err(|e| {
                    SchemaError::InvalidDefault {
                        field: field.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
            }
        }

        let spec = Self { fields, rules };
        for rule in &spec.rules {
            spec.check_rule(rule)?;
        }
        Ok(spec)
    }

    fn check_rule(&self, rule: &NumericRule) -> Result<(), SchemaError> {
        let check_field = |name: &str| match self.field(name) {
            None => Err(SchemaError::UnknownField {
                rule: rule.to_string(),
                field: name.to_string(),
            }),
            Some(f) if !f.field_type.is_numeric() => Err(SchemaError::NonNumericField {
                rule: rule.to_string(),
                field: name.to_string(),
            }),
            Some(_) => Ok(()),
        };

        check_field(&rule.target)?;
        for term in &rule.terms {
            match &term.operand {
                Operand::Field(name) => check_field(name)?,
                Operand::SumOfRole(role) => {
                    let members: Vec<&str> = self.fields_with_role(*role).collect();
                    if members.is_empty() {
                        return Err(SchemaError::EmptyRoleSum {
                            rule: rule.to_string(),
                            role: role.to_string(),
                        });
                    }
                    for name in members {
                        check_field(name)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn rules(&self) -> &[NumericRule] {
        &self.rules
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declaration index, used to order defects.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn fields_with_role(&self, role: FieldRole) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(move |f| f.role == role)
            .map(|f| f.name.as_str())
    }

    /// Field names an operand stands for.
    pub fn resolve<'s>(&'s self, operand: &'s Operand) -> Vec<&'s str> {
        match operand {
            Operand::Field(name) => vec![name.as_str()],
            Operand::SumOfRole(role) => self.fields_with_role(*role).collect(),
        }
    }

    /// The general-purpose invoice schema used when no schema is configured.
    pub fn invoice_default() -> Self {
        let text = |name: &str, role| SchemaField::new(name, FieldType::String, role);
        let date = |name: &str| SchemaField::new(name, FieldType::Date, FieldRole::Date);
        let money = |name: &str| {
            SchemaField::new(name, FieldType::CurrencyAmount, FieldRole::AggregateAmount)
        };

        let fields = vec![
            text("invoice_number", FieldRole::Identifier)
                .required()
                .with_aliases(&["invoice_no", "invoice_id", "invoice"]),
            date("invoice_date")
                .required()
                .with_aliases(&["expense_date", "issue_date", "date"]),
            date("due_date").with_aliases(&["payment_due"]),
            text("supplier_name", FieldRole::VendorInfo).with_aliases(&[
                "seller_name",
                "vendor_name",
                "supplier",
                "seller",
                "vendor",
            ]),
            text("supplier_address", FieldRole::VendorInfo).with_aliases(&[
                "seller_address",
                "vendor_address",
                "address",
            ]),
            text("supplier_email", FieldRole::VendorInfo)
                .with_aliases(&["seller_email", "vendor_email", "email"])
                .with_format(TextFormat::Email),
            text("supplier_phone_number", FieldRole::VendorInfo)
                .with_aliases(&[
                    "supplier_phone",
                    "seller_phone_number",
                    "vendor_phone",
                    "phone_number",
                    "phone",
                ])
                .with_format(TextFormat::Phone),
            text("supplier_website", FieldRole::VendorInfo)
                .with_aliases(&["seller_website", "vendor_website", "website"])
                .with_format(TextFormat::Website),
            text("supplier_vat_number", FieldRole::VendorInfo)
                .with_aliases(&["seller_vat_number", "vat_number", "vat_no"])
                .with_format(TextFormat::VatNumber),
            text("currency", FieldRole::Identifier)
                .with_aliases(&["currency_code"])
                .with_format(TextFormat::CurrencyCode),
            money("subtotal")
                .required()
                .with_aliases(&["total_net", "net_total", "net_amount"]),
            money("tax")
                .required()
                .with_aliases(&["total_tax", "tax_amount", "total_vat", "vat_amount", "vat"]),
            money("total").required().with_aliases(&[
                "total_amount",
                "total_due",
                "total_amount_due",
                "grand_total",
                "amount_due",
                "total_amount_incl_tax",
            ]),
        ];

        let rules = vec![NumericRule::parse("total = subtotal + tax").expect("built-in rule parses")];

        Self::new(fields, rules).expect("built-in invoice schema is valid")
    }
}
